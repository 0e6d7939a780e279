//! Commission Calculator
//!
//! Derives the annual commission estimate from a state snapshot. The result
//! is always recomputed in full; nothing is patched incrementally.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::provider::{CommissionRateProvider, RateLookup};
use crate::domain::{checked_total, ApplicationState, AssetKey, RotationIndex};
use crate::events::{EventBus, Subscription};
use crate::format::format_brl;
use crate::store::{StateChanged, StateStore};

/// Cost line for one allocated asset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetCost {
    pub asset_key: AssetKey,
    pub amount: Decimal,
    pub rate: RateLookup,
    pub cost: Decimal,
    /// No rate exists for this asset; `cost` is zero
    pub unmatched: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommissionResult {
    pub total_annual_cost: Decimal,
    pub breakdown: Vec<AssetCost>,
    pub rotation_index: RotationIndex,
    pub computed_at: DateTime<Utc>,
}

impl CommissionResult {
    pub fn empty(rotation_index: RotationIndex) -> Self {
        Self {
            total_annual_cost: Decimal::ZERO,
            breakdown: Vec::new(),
            rotation_index,
            computed_at: Utc::now(),
        }
    }

    pub fn unmatched(&self) -> impl Iterator<Item = &AssetCost> {
        self.breakdown.iter().filter(|line| line.unmatched)
    }

    pub fn cost_for(&self, key: &AssetKey) -> Option<Decimal> {
        self.breakdown
            .iter()
            .find(|line| &line.asset_key == key)
            .map(|line| line.cost)
    }
}

/// Notification sent after every recompute
#[derive(Debug, Clone, Serialize)]
pub struct CommissionChanged {
    pub total: Decimal,
    pub formatted_total: String,
    pub source: String,
    pub breakdown: Vec<AssetCost>,
    pub rotation_index: RotationIndex,
}

pub struct CommissionCalculator {
    provider: Arc<dyn CommissionRateProvider>,
    latest: RwLock<CommissionResult>,
    bus: EventBus<CommissionChanged>,
}

impl CommissionCalculator {
    pub fn new(provider: Arc<dyn CommissionRateProvider>) -> Self {
        Self {
            provider,
            latest: RwLock::new(CommissionResult::empty(RotationIndex::DEFAULT)),
            bus: EventBus::new("commission"),
        }
    }

    /// Cost of `amount` allocated to `key` at `rotation`. Never fails: an
    /// unknown asset yields a zero-cost line flagged `unmatched`.
    pub fn cost_for(&self, key: &AssetKey, amount: Decimal, rotation: RotationIndex) -> AssetCost {
        let rate = self.provider.lookup(key, rotation);
        if rate.is_unmatched() {
            warn!(
                asset = %key,
                provider = self.provider.name(),
                "no commission rate, counting as zero"
            );
        }
        AssetCost {
            asset_key: key.clone(),
            amount,
            cost: rate.cost(amount),
            unmatched: rate.is_unmatched(),
            rate,
        }
    }

    /// Full recompute over every allocation in `state`
    pub fn compute(&self, state: &ApplicationState) -> CommissionResult {
        let rotation = state.rotation_index();
        let breakdown: Vec<AssetCost> = state
            .allocations()
            .iter()
            .map(|(key, amount)| self.cost_for(key, *amount, rotation))
            .collect();
        let total_annual_cost = checked_total(breakdown.iter().map(|line| line.cost));

        CommissionResult {
            total_annual_cost,
            breakdown,
            rotation_index: rotation,
            computed_at: Utc::now(),
        }
    }

    /// Last result produced by [`Self::recompute`]
    pub fn latest(&self) -> CommissionResult {
        self.latest
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Compute, remember and broadcast
    pub fn recompute(&self, state: &ApplicationState, source: &str) -> CommissionResult {
        let result = self.compute(state);
        *self.latest.write().unwrap_or_else(|e| e.into_inner()) = result.clone();

        let event = CommissionChanged {
            total: result.total_annual_cost,
            formatted_total: format_brl(result.total_annual_cost),
            source: source.to_string(),
            breakdown: result.breakdown.clone(),
            rotation_index: result.rotation_index,
        };
        debug!(
            total = %event.total,
            assets = event.breakdown.len(),
            source,
            "commission recomputed"
        );
        self.bus.emit(&event);
        result
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&CommissionChanged) + Send + Sync + 'static,
    {
        self.bus.subscribe(listener)
    }

    pub fn subscribe_channel(&self) -> broadcast::Receiver<CommissionChanged> {
        self.bus.subscribe_channel()
    }

    /// Recompute on every store change that can move the total. Holds only
    /// a weak reference, so dropping the calculator ends the reaction.
    pub fn attach(self: &Arc<Self>, store: &StateStore) -> Subscription {
        let weak = Arc::downgrade(self);
        let subscription = store.subscribe(move |event: &StateChanged| {
            if !event.change.affects_commission() {
                return;
            }
            if let Some(calculator) = weak.upgrade() {
                calculator.recompute(&event.snapshot, &event.source);
            }
        });
        // Seed `latest` with whatever the store already holds
        self.recompute(&store.snapshot(), "attach");
        subscription
    }
}
