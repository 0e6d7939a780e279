pub mod calculator;
pub mod provider;
pub mod rates;

pub use calculator::{AssetCost, CommissionCalculator, CommissionChanged, CommissionResult};
pub use provider::{
    default_provider, CommissionRateProvider, RateLookup, RotationAdjustedProvider,
    StaticRateProvider,
};
pub use rates::{CommissionRate, RateTable, RotationTable};
