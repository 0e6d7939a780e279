//! Bounded waits for components that become available asynchronously
//! (embedded widgets, remote tables). Every wait has a deadline and can be
//! cancelled; nothing polls forever.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::ReadinessConfig;
use crate::error::{ReinoError, Result};

/// Cancels every wait holding one of its tokens
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelHandle {
    pub fn new() -> (Self, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, CancelToken { rx })
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelToken {
    /// A token nobody can cancel
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    async fn cancelled(mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Handle dropped without cancelling
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Poll `probe` every `poll_interval` until it reports ready.
///
/// Returns how long the wait took, `ReadinessTimeout` once `timeout` has
/// elapsed, or `Cancelled` if `cancel` fires first.
pub async fn wait_until_ready<F>(
    component: &str,
    mut probe: F,
    config: &ReadinessConfig,
    cancel: CancelToken,
) -> Result<Duration>
where
    F: FnMut() -> bool,
{
    let started = Instant::now();
    let mut ticker = tokio::time::interval(config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut attempts: u32 = 0;
    let poll = async {
        loop {
            ticker.tick().await;
            attempts += 1;
            if probe() {
                return;
            }
        }
    };

    let outcome = tokio::select! {
        res = tokio::time::timeout(config.timeout(), poll) => res.map_err(|_| {
            ReinoError::ReadinessTimeout {
                component: component.to_string(),
                waited_ms: started.elapsed().as_millis() as u64,
            }
        }),
        _ = cancel.cancelled() => Err(ReinoError::Cancelled),
    };

    match outcome {
        Ok(()) => {
            let waited = started.elapsed();
            info!(component, attempts, waited_ms = waited.as_millis() as u64, "component ready");
            Ok(waited)
        }
        Err(e) => {
            debug!(component, attempts, error = %e, "readiness wait ended without success");
            Err(e)
        }
    }
}

/// Like [`wait_until_ready`], but a failure runs `on_failure` and the caller
/// carries on without the component. Returns whether it became ready.
pub async fn wait_or_degrade<F, C>(
    component: &str,
    probe: F,
    config: &ReadinessConfig,
    cancel: CancelToken,
    on_failure: C,
) -> bool
where
    F: FnMut() -> bool,
    C: FnOnce(&ReinoError),
{
    match wait_until_ready(component, probe, config, cancel).await {
        Ok(_) => true,
        Err(e) => {
            warn!(component, error = %e, "continuing without component");
            on_failure(&e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    fn fast(timeout_ms: u64) -> ReadinessConfig {
        ReadinessConfig {
            timeout_ms,
            poll_interval_ms: 5,
        }
    }

    #[tokio::test]
    async fn test_ready_after_a_few_polls() {
        let calls = AtomicU32::new(0);
        let waited = wait_until_ready(
            "widget",
            || calls.fetch_add(1, Ordering::SeqCst) >= 2,
            &fast(1_000),
            CancelToken::never(),
        )
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(waited < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_times_out() {
        let err = wait_until_ready("widget", || false, &fast(30), CancelToken::never())
            .await
            .unwrap_err();
        match err {
            ReinoError::ReadinessTimeout { component, waited_ms } => {
                assert_eq!(component, "widget");
                assert!(waited_ms >= 30);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled() {
        let (handle, token) = CancelHandle::new();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        });
        let err = wait_until_ready("widget", || false, &fast(5_000), token)
            .await
            .unwrap_err();
        assert!(matches!(err, ReinoError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (handle, token) = CancelHandle::new();
        handle.cancel();
        assert!(token.is_cancelled());
        let err = wait_until_ready("widget", || false, &fast(5_000), token)
            .await
            .unwrap_err();
        assert!(matches!(err, ReinoError::Cancelled));
    }

    #[tokio::test]
    async fn test_degrade_runs_failure_callback() {
        let failed = AtomicBool::new(false);
        let ready = wait_or_degrade("chat", || false, &fast(20), CancelToken::never(), |e| {
            assert!(matches!(e, ReinoError::ReadinessTimeout { .. }));
            failed.store(true, Ordering::SeqCst);
        })
        .await;
        assert!(!ready);
        assert!(failed.load(Ordering::SeqCst));

        let ready = wait_or_degrade("chat", || true, &fast(20), CancelToken::never(), |_| {
            panic!("callback must not run when ready")
        })
        .await;
        assert!(ready);
    }
}
