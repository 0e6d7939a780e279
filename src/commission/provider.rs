//! Rate providers
//!
//! A provider answers "which rate applies to this asset at this rotation
//! index". Providers compose: [`RotationAdjustedProvider`] wraps another
//! provider and answers first when it has an override for the asset.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;

use super::rates::{CommissionRate, RateTable, RotationTable};
use crate::domain::{AssetKey, RotationIndex};

/// Rate resolved for one asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RateLookup {
    /// Static table hit; cost uses `media`
    Static { rate: CommissionRate },
    /// Rotation override; replaces the static rate entirely
    Rotation { index: RotationIndex, annual_pct: Decimal },
    /// No rate known for the asset
    Unmatched,
}

impl RateLookup {
    /// Annual percentage that will be applied to the allocated amount
    pub fn applied_pct(&self) -> Decimal {
        match self {
            RateLookup::Static { rate } => rate.media,
            RateLookup::Rotation { annual_pct, .. } => *annual_pct,
            RateLookup::Unmatched => Decimal::ZERO,
        }
    }

    /// Annual cost for `amount` under this rate, saturating at
    /// `Decimal::MAX` instead of overflowing
    pub fn cost(&self, amount: Decimal) -> Decimal {
        amount
            .checked_mul(self.applied_pct())
            .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED))
            .unwrap_or(Decimal::MAX)
    }

    pub fn is_unmatched(&self) -> bool {
        matches!(self, RateLookup::Unmatched)
    }
}

pub trait CommissionRateProvider: Send + Sync {
    fn lookup(&self, key: &AssetKey, rotation: RotationIndex) -> RateLookup;

    /// Short label for logs
    fn name(&self) -> &str;
}

/// Answers from the static rate table only
#[derive(Debug, Clone)]
pub struct StaticRateProvider {
    table: Arc<RateTable>,
}

impl StaticRateProvider {
    pub fn new(table: Arc<RateTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &RateTable {
        &self.table
    }
}

impl CommissionRateProvider for StaticRateProvider {
    fn lookup(&self, key: &AssetKey, _rotation: RotationIndex) -> RateLookup {
        match self.table.get(key) {
            Some(rate) => RateLookup::Static { rate: *rate },
            None => RateLookup::Unmatched,
        }
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Overrides the inner provider wherever the rotation table has an entry
pub struct RotationAdjustedProvider<P> {
    inner: P,
    rotation: Arc<RotationTable>,
}

impl<P: CommissionRateProvider> RotationAdjustedProvider<P> {
    pub fn new(inner: P, rotation: Arc<RotationTable>) -> Self {
        Self { inner, rotation }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: CommissionRateProvider> CommissionRateProvider for RotationAdjustedProvider<P> {
    fn lookup(&self, key: &AssetKey, rotation: RotationIndex) -> RateLookup {
        match self.rotation.rate_pct(key, rotation) {
            Some(annual_pct) => RateLookup::Rotation {
                index: rotation,
                annual_pct,
            },
            None => self.inner.lookup(key, rotation),
        }
    }

    fn name(&self) -> &str {
        "rotation_adjusted"
    }
}

impl<T: CommissionRateProvider + ?Sized> CommissionRateProvider for Arc<T> {
    fn lookup(&self, key: &AssetKey, rotation: RotationIndex) -> RateLookup {
        (**self).lookup(key, rotation)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Standard composition: static table, rotation overrides on top
pub fn default_provider(
    table: Arc<RateTable>,
    rotation: Arc<RotationTable>,
) -> Arc<dyn CommissionRateProvider> {
    Arc::new(RotationAdjustedProvider::new(
        StaticRateProvider::new(table),
        rotation,
    ))
}
