//! Composition root: wires the store, the commission calculator and the
//! view bridge together in a fixed order, and hands integrations a
//! read-only view of the result.

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bridge::{DomSyncBridge, ViewSink};
use crate::commission::{
    default_provider, CommissionCalculator, CommissionRateProvider, RateTable, RotationTable,
};
use crate::config::{AppConfig, RatesConfig};
use crate::domain::ContactInfo;
use crate::error::{ReinoError, Result};
use crate::events::Subscription;
use crate::integration::chat;
use crate::integration::outbound::{LeadSink, LeadSubmission, OutboundSnapshot};
use crate::navigation::StepGate;
use crate::readiness::{self, CancelToken};
use crate::store::StateStore;
use crate::validation::{StateValidation, StateValidator};

pub struct CalculatorApp {
    config: AppConfig,
    store: Arc<StateStore>,
    calculator: Arc<CommissionCalculator>,
    gate: StepGate,
    validator: StateValidator,
    bridge: Option<Arc<DomSyncBridge>>,
    _commission_attachment: Subscription,
}

#[derive(Default)]
pub struct CalculatorAppBuilder {
    config: AppConfig,
    rates: Option<Arc<RateTable>>,
    rotation: Option<Arc<RotationTable>>,
    provider: Option<Arc<dyn CommissionRateProvider>>,
    view: Option<Arc<dyn ViewSink>>,
}

impl CalculatorAppBuilder {
    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    pub fn rate_table(mut self, table: RateTable) -> Self {
        self.rates = Some(Arc::new(table));
        self
    }

    pub fn rotation_table(mut self, table: RotationTable) -> Self {
        self.rotation = Some(Arc::new(table));
        self
    }

    /// Use a ready-made provider instead of the rate tables
    pub fn provider(mut self, provider: Arc<dyn CommissionRateProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn view(mut self, sink: Arc<dyn ViewSink>) -> Self {
        self.view = Some(sink);
        self
    }

    /// Fails with `MissingDependency` when no rate source was given
    pub fn build(self) -> Result<CalculatorApp> {
        let provider = match (self.provider, self.rates) {
            (Some(provider), _) => provider,
            (None, Some(rates)) => {
                let rotation = self
                    .rotation
                    .unwrap_or_else(|| Arc::new(RotationTable::empty()));
                default_provider(rates, rotation)
            }
            (None, None) => {
                return Err(ReinoError::MissingDependency(
                    "commission rate table or provider".to_string(),
                ))
            }
        };

        let validator = StateValidator::from_config(&self.config.calculator);
        let gate = StepGate::new(validator.clone());
        let store = Arc::new(StateStore::new(&self.config.calculator));
        let calculator = Arc::new(CommissionCalculator::new(provider));

        // The calculator subscribes first so commission updates always
        // follow the state update that caused them
        let commission_attachment = calculator.attach(&store);

        let bridge = self.view.map(|sink| {
            let bridge = Arc::new(DomSyncBridge::new(store.clone(), sink, gate.clone()));
            bridge.connect(&calculator);
            bridge
        });

        info!(view = bridge.is_some(), "calculator ready");

        Ok(CalculatorApp {
            config: self.config,
            store,
            calculator,
            gate,
            validator,
            bridge,
            _commission_attachment: commission_attachment,
        })
    }
}

/// Configured rate files, or the built-in tables where no path is set
pub fn load_rate_tables(config: &RatesConfig) -> Result<(RateTable, RotationTable)> {
    let rates = match &config.table_path {
        Some(path) => RateTable::from_path(path)?,
        None => RateTable::builtin(),
    };
    let rotation = match &config.rotation_path {
        Some(path) => RotationTable::from_path(path)?,
        None => RotationTable::builtin(),
    };
    Ok((rates, rotation))
}

impl CalculatorApp {
    pub fn builder() -> CalculatorAppBuilder {
        CalculatorAppBuilder::default()
    }

    /// Build from configuration, loading rate files when configured and
    /// falling back to the built-in tables otherwise
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let (rates, rotation) = load_rate_tables(&config.rates)?;
        Self::builder()
            .config(config)
            .rate_table(rates)
            .rotation_table(rotation)
            .build()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn calculator(&self) -> &Arc<CommissionCalculator> {
        &self.calculator
    }

    pub fn gate(&self) -> &StepGate {
        &self.gate
    }

    pub fn bridge(&self) -> Option<&Arc<DomSyncBridge>> {
        self.bridge.as_ref()
    }

    pub fn validate(&self) -> StateValidation {
        self.validator.validate(&self.store.snapshot())
    }

    /// Current state plus a fresh commission computed from that same state
    pub fn outbound_snapshot(&self) -> OutboundSnapshot {
        let state = self.store.snapshot();
        let commission = self.calculator.compute(&state);
        OutboundSnapshot {
            state: (*state).clone(),
            commission,
        }
    }

    /// Hand the current snapshot to `sink`. Sink failures are logged and
    /// swallowed; the calculator keeps working either way.
    pub async fn submit_lead(&self, sink: &dyn LeadSink) -> Option<Uuid> {
        let submission = LeadSubmission::new(self.outbound_snapshot());
        match sink.submit(&submission).await {
            Ok(()) => {
                info!(sink = sink.name(), submission_id = %submission.id, "lead submitted");
                Some(submission.id)
            }
            Err(e) => {
                warn!(sink = sink.name(), error = %e, "lead submission failed");
                None
            }
        }
    }

    /// Feed one raw chat message; completions update the contact
    pub fn accept_chat_message(&self, raw: &str) -> Result<Option<ContactInfo>> {
        chat::apply_completion(&self.store, raw)
    }

    /// Wait for an external component using the configured bounds
    pub async fn await_component<F>(
        &self,
        component: &str,
        probe: F,
        cancel: CancelToken,
    ) -> Result<std::time::Duration>
    where
        F: FnMut() -> bool,
    {
        readiness::wait_until_ready(component, probe, &self.config.readiness, cancel).await
    }
}

impl Drop for CalculatorApp {
    fn drop(&mut self) {
        if let Some(bridge) = &self.bridge {
            bridge.disconnect();
        }
    }
}
