use reino::config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Console logging on stderr (stdout carries command output), plus a daily
/// rotated file under `REINO_LOG_DIR` when that directory is writable.
///
/// The returned guard flushes the file writer; keep it alive until exit.
pub fn init_logging(config: &LoggingConfig, force_json: bool) -> Option<WorkerGuard> {
    let default_directives = if config.level == "info" {
        "info,reino=debug".to_string()
    } else {
        config.level.clone()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let json = force_json || config.json;
    let (file_layer, guard) = match std::env::var("REINO_LOG_DIR") {
        Ok(log_dir) => match file_writer(&log_dir) {
            Some((writer, guard)) => (
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_target(true),
                ),
                Some(guard),
            ),
            None => (None, None),
        },
        Err(_) => (None, None),
    };

    let console_layer = (!json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
    });
    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(false)
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(json_layer)
        .with(file_layer)
        .try_init();

    guard
}

/// `tracing_appender::rolling::daily` panics if it cannot create its first
/// file, so check the directory is writable before handing it over.
fn file_writer(
    log_dir: &str,
) -> Option<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    if let Err(e) = std::fs::create_dir_all(log_dir) {
        eprintln!(
            "Warning: Could not create log directory {} ({}), file logging disabled",
            log_dir, e
        );
        return None;
    }

    let probe = std::path::Path::new(log_dir).join(".reino_write_test");
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&probe)
    {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe);
            let appender = tracing_appender::rolling::daily(log_dir, "reino.log");
            Some(tracing_appender::non_blocking(appender))
        }
        Err(e) => {
            eprintln!(
                "Warning: Could not write to log directory {} ({}), file logging disabled",
                log_dir, e
            );
            None
        }
    }
}
