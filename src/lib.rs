pub mod app;
pub mod bridge;
pub mod cli;
pub mod commission;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod format;
pub mod integration;
pub mod navigation;
pub mod readiness;
pub mod store;
pub mod validation;

pub use app::{CalculatorApp, CalculatorAppBuilder};
pub use bridge::{DomSyncBridge, InputEvent, RecordingSink, ViewSink};
pub use commission::{
    CommissionCalculator, CommissionChanged, CommissionRate, CommissionRateProvider,
    CommissionResult, RateTable, RotationTable,
};
pub use config::AppConfig;
pub use domain::{normalize_asset_key, ApplicationState, AssetKey, ContactInfo, RotationIndex};
pub use error::{ReinoError, Result};
pub use events::{EventBus, Subscription};
pub use navigation::{Step, StepGate};
pub use readiness::{wait_until_ready, CancelHandle, CancelToken};
pub use store::{ChangeKind, MutationOutcome, StateChanged, StateStore};
pub use validation::{StateValidator, ValidationResult};
