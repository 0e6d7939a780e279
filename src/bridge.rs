//! DOM Sync Bridge
//!
//! The only component that talks to presentation. Outbound it turns state
//! and commission notifications into element writes on a [`ViewSink`];
//! inbound it sanitizes raw field values and forwards them to store
//! operations. It never holds a mutable handle to the state itself.

use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::commission::{CommissionCalculator, CommissionChanged};
use crate::domain::AssetKey;
use crate::error::ReinoError;
use crate::events::Subscription;
use crate::format::{format_brl, format_percent, parse_brl_amount};
use crate::navigation::StepGate;
use crate::store::{ChangeKind, MutationOutcome, StateChanged, StateStore};

/// Presentation target (the page, a test double, a terminal)
pub trait ViewSink: Send + Sync {
    fn set_text(&self, element: &str, text: &str);
    fn set_attribute(&self, element: &str, name: &str, value: &str);
    fn set_enabled(&self, element: &str, enabled: bool);
}

/// Element identifiers written by the bridge
pub mod elements {
    use crate::domain::AssetKey;
    use crate::navigation::Step;

    pub const PATRIMONIO: &str = "patrimonio-display";
    pub const REMAINING: &str = "allocation-remaining";
    pub const ALLOCATED_PCT: &str = "allocation-total-pct";
    pub const ROTATION: &str = "rotation-index";
    pub const COMMISSION_TOTAL: &str = "commission-total";

    pub fn allocation(key: &AssetKey) -> String {
        format!("allocation[{}]", key)
    }

    pub fn share(key: &AssetKey) -> String {
        format!("share[{}]", key)
    }

    pub fn cost(key: &AssetKey) -> String {
        format!("cost[{}]", key)
    }

    pub fn next_button(step: Step) -> String {
        format!("next[{}]", step)
    }
}

/// Raw user input as it arrives from the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Patrimonio { raw: String },
    ToggleAsset { category: String, product: String, selected: bool },
    Allocation { category: String, product: String, raw: String },
    Rotation { raw: String },
}

pub struct DomSyncBridge {
    store: Arc<StateStore>,
    sink: Arc<dyn ViewSink>,
    gate: StepGate,
    subscriptions: Mutex<Vec<Subscription>>,
    /// Assets whose allocation and share elements were last written
    shown_assets: Mutex<BTreeSet<AssetKey>>,
    /// Assets whose cost element was last written
    shown_costs: Mutex<BTreeSet<AssetKey>>,
}

impl DomSyncBridge {
    pub fn new(store: Arc<StateStore>, sink: Arc<dyn ViewSink>, gate: StepGate) -> Self {
        Self {
            store,
            sink,
            gate,
            subscriptions: Mutex::new(Vec::new()),
            shown_assets: Mutex::new(BTreeSet::new()),
            shown_costs: Mutex::new(BTreeSet::new()),
        }
    }

    /// Start reacting to state and commission notifications and render the
    /// current state once
    pub fn connect(self: &Arc<Self>, calculator: &CommissionCalculator) {
        let state_sub = {
            let weak = Arc::downgrade(self);
            self.store.subscribe(move |event: &StateChanged| {
                if let Some(bridge) = weak.upgrade() {
                    bridge.render_state(event);
                }
            })
        };
        let commission_sub = {
            let weak = Arc::downgrade(self);
            calculator.subscribe(move |event: &CommissionChanged| {
                if let Some(bridge) = weak.upgrade() {
                    bridge.render_commission(event);
                }
            })
        };
        {
            let mut subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
            subs.push(state_sub);
            subs.push(commission_sub);
        }

        self.render_state(&StateChanged {
            snapshot: self.store.snapshot(),
            source: "connect".to_string(),
            change: ChangeKind::Reset,
        });
        let latest = calculator.latest();
        self.render_commission(&CommissionChanged {
            total: latest.total_annual_cost,
            formatted_total: format_brl(latest.total_annual_cost),
            source: "connect".to_string(),
            breakdown: latest.breakdown,
            rotation_index: latest.rotation_index,
        });
    }

    /// Stop reacting; later notifications are no longer rendered
    pub fn disconnect(&self) {
        let subs: Vec<Subscription> = self
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        debug!(count = subs.len(), "bridge disconnected");
        for sub in subs {
            sub.unsubscribe();
        }
    }

    /// Sanitize and forward one input event to the store
    pub fn handle_input(&self, input: InputEvent) -> MutationOutcome {
        match input {
            InputEvent::Patrimonio { raw } => match parse_brl_amount(&raw) {
                Ok(value) => self.store.set_patrimonio(value, "dom:patrimonio"),
                Err(err) => Self::reject("patrimonio", err),
            },
            InputEvent::ToggleAsset {
                category,
                product,
                selected: true,
            } => self
                .store
                .add_selected_asset(&category, &product, "dom:asset-toggle"),
            InputEvent::ToggleAsset {
                category,
                product,
                selected: false,
            } => self
                .store
                .remove_selected_asset(&category, &product, "dom:asset-toggle"),
            InputEvent::Allocation {
                category,
                product,
                raw,
            } => match parse_brl_amount(&raw) {
                Ok(amount) => self
                    .store
                    .set_allocation(&category, &product, amount, "dom:allocation"),
                Err(err) => Self::reject("allocation", err),
            },
            InputEvent::Rotation { raw } => match raw.trim().parse::<i64>() {
                Ok(value) => self.store.set_rotation_index(value, "dom:rotation"),
                Err(_) => Self::reject(
                    "rotation",
                    ReinoError::InvalidInput(format!("rotation index '{}' is not a number", raw)),
                ),
            },
        }
    }

    fn reject(field: &str, err: ReinoError) -> MutationOutcome {
        warn!(field, error = %err, "input ignored");
        MutationOutcome::Rejected(err)
    }

    fn render_state(&self, event: &StateChanged) {
        let state = &event.snapshot;
        let patrimonio = state.patrimonio();

        let remaining = patrimonio
            .checked_sub(state.total_allocated())
            .unwrap_or(Decimal::MIN);
        self.sink.set_text(elements::PATRIMONIO, &format_brl(patrimonio));
        self.sink.set_text(elements::REMAINING, &format_brl(remaining));
        self.sink.set_text(
            elements::ALLOCATED_PCT,
            &format_percent(state.allocated_fraction()),
        );

        let fractions = state.allocation_fractions();
        for key in state.selected_assets() {
            let amount = state.allocation(key).unwrap_or_default();
            self.sink.set_text(&elements::allocation(key), &format_brl(amount));
            let share = fractions.get(key).copied().unwrap_or_default();
            self.sink.set_text(&elements::share(key), &format_percent(share));
        }
        for key in Self::replace_shown(&self.shown_assets, state.selected_assets().clone()) {
            self.sink.set_text(&elements::allocation(&key), "");
            self.sink.set_text(&elements::share(&key), "");
        }

        self.sink.set_attribute(
            elements::ROTATION,
            "data-rotation",
            &state.rotation_index().to_string(),
        );

        for status in self.gate.evaluate(state) {
            self.sink
                .set_enabled(&elements::next_button(status.step), status.enabled);
        }
    }

    fn render_commission(&self, event: &CommissionChanged) {
        self.sink
            .set_text(elements::COMMISSION_TOTAL, &event.formatted_total);
        for line in &event.breakdown {
            let element = elements::cost(&line.asset_key);
            self.sink.set_text(&element, &format_brl(line.cost));
            self.sink.set_attribute(
                &element,
                "data-unmatched",
                if line.unmatched { "true" } else { "false" },
            );
        }

        let current: BTreeSet<AssetKey> = event
            .breakdown
            .iter()
            .map(|line| line.asset_key.clone())
            .collect();
        for key in Self::replace_shown(&self.shown_costs, current) {
            let element = elements::cost(&key);
            self.sink.set_text(&element, "");
            self.sink.set_attribute(&element, "data-unmatched", "false");
        }
    }

    /// Store `current` as the shown set and return the keys that dropped out
    fn replace_shown(
        shown: &Mutex<BTreeSet<AssetKey>>,
        current: BTreeSet<AssetKey>,
    ) -> Vec<AssetKey> {
        let mut shown = shown.lock().unwrap_or_else(|e| e.into_inner());
        let stale = shown.difference(&current).cloned().collect();
        *shown = current;
        stale
    }
}

/// One write recorded by [`RecordingSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewWrite {
    Text(String),
    Attribute(String, String),
    Enabled(bool),
}

/// In-memory sink; keeps the latest value per element and a write log
#[derive(Debug, Default)]
pub struct RecordingSink {
    texts: Mutex<BTreeMap<String, String>>,
    attributes: Mutex<BTreeMap<(String, String), String>>,
    enabled: Mutex<BTreeMap<String, bool>>,
    log: Mutex<Vec<(String, ViewWrite)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self, element: &str) -> Option<String> {
        self.texts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(element)
            .cloned()
    }

    pub fn attribute(&self, element: &str, name: &str) -> Option<String> {
        self.attributes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(element.to_string(), name.to_string()))
            .cloned()
    }

    pub fn is_enabled(&self, element: &str) -> Option<bool> {
        self.enabled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(element)
            .copied()
    }

    pub fn write_count(&self) -> usize {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn record(&self, element: &str, write: ViewWrite) {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((element.to_string(), write));
    }
}

impl ViewSink for RecordingSink {
    fn set_text(&self, element: &str, text: &str) {
        self.texts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(element.to_string(), text.to_string());
        self.record(element, ViewWrite::Text(text.to_string()));
    }

    fn set_attribute(&self, element: &str, name: &str, value: &str) {
        self.attributes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((element.to_string(), name.to_string()), value.to_string());
        self.record(
            element,
            ViewWrite::Attribute(name.to_string(), value.to_string()),
        );
    }

    fn set_enabled(&self, element: &str, enabled: bool) {
        self.enabled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(element.to_string(), enabled);
        self.record(element, ViewWrite::Enabled(enabled));
    }
}
