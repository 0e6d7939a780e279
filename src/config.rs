use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Hard ceiling for `calculator.max_amount`
pub const MAX_AMOUNT_CEILING: Decimal = dec!(1000000000000000000);

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub calculator: CalculatorConfig,
    #[serde(default)]
    pub rates: RatesConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    #[serde(default)]
    pub integration: IntegrationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalculatorConfig {
    /// Patrimony below this value passes validation with a warning
    #[serde(default = "default_low_patrimonio_threshold")]
    pub low_patrimonio_threshold: Decimal,
    /// Tolerance when comparing the allocation total against 100%
    #[serde(default = "default_allocation_epsilon")]
    pub allocation_epsilon: Decimal,
    /// Rotation index applied at startup and after a reset
    #[serde(default = "default_rotation_index")]
    pub default_rotation_index: u8,
    /// Upper bound on follow-up notification passes triggered by listeners
    /// that write back into the store
    #[serde(default = "default_max_notification_passes")]
    pub max_notification_passes: u32,
    /// Largest patrimony or allocation amount the store accepts
    #[serde(default = "default_max_amount")]
    pub max_amount: Decimal,
}

fn default_low_patrimonio_threshold() -> Decimal {
    dec!(1000)
}

fn default_allocation_epsilon() -> Decimal {
    dec!(0.0001)
}

fn default_rotation_index() -> u8 {
    2
}

fn default_max_notification_passes() -> u32 {
    8
}

fn default_max_amount() -> Decimal {
    dec!(1000000000000)
}

impl Default for CalculatorConfig {
    fn default() -> Self {
        Self {
            low_patrimonio_threshold: default_low_patrimonio_threshold(),
            allocation_epsilon: default_allocation_epsilon(),
            default_rotation_index: default_rotation_index(),
            max_notification_passes: default_max_notification_passes(),
            max_amount: default_max_amount(),
        }
    }
}

/// Where the commission reference data comes from. Missing paths fall back
/// to the built-in tables.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RatesConfig {
    #[serde(default)]
    pub table_path: Option<PathBuf>,
    #[serde(default)]
    pub rotation_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadinessConfig {
    /// Give up waiting for a widget after this long
    #[serde(default = "default_readiness_timeout")]
    pub timeout_ms: u64,
    /// Probe interval while waiting
    #[serde(default = "default_readiness_poll")]
    pub poll_interval_ms: u64,
}

fn default_readiness_timeout() -> u64 {
    10_000
}

fn default_readiness_poll() -> u64 {
    100
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_readiness_timeout(),
            poll_interval_ms: default_readiness_poll(),
        }
    }
}

impl ReadinessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        // A zero interval would spin the runtime
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntegrationConfig {
    /// Base URL of the Supabase project (e.g. https://xyz.supabase.co)
    #[serde(default)]
    pub supabase_url: Option<String>,
    #[serde(default = "default_supabase_table")]
    pub supabase_table: String,
    /// Name of the environment variable holding the API key
    #[serde(default = "default_supabase_key_env")]
    pub supabase_key_env: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_supabase_table() -> String {
    "calculator_submissions".to_string()
}

fn default_supabase_key_env() -> String {
    "REINO_SUPABASE_KEY".to_string()
}

fn default_request_timeout() -> u64 {
    5_000
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            supabase_url: None,
            supabase_table: default_supabase_table(),
            supabase_key_env: default_supabase_key_env(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("calculator.default_rotation_index", 2)?
            .set_default("readiness.timeout_ms", 10_000)?
            .set_default("readiness.poll_interval_ms", 100)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific overrides (e.g. config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("REINO_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // REINO__CALCULATOR__ALLOCATION_EPSILON, etc.
            .add_source(
                Environment::with_prefix("REINO")
                    .separator("__")
                    .try_parsing(true),
            );

        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the core cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=4).contains(&self.calculator.default_rotation_index) {
            return Err(ConfigError::Message(format!(
                "calculator.default_rotation_index must be 1..=4, got {}",
                self.calculator.default_rotation_index
            )));
        }
        if self.calculator.allocation_epsilon < Decimal::ZERO {
            return Err(ConfigError::Message(
                "calculator.allocation_epsilon cannot be negative".to_string(),
            ));
        }
        if self.calculator.max_notification_passes == 0 {
            return Err(ConfigError::Message(
                "calculator.max_notification_passes must be at least 1".to_string(),
            ));
        }
        if self.calculator.max_amount <= Decimal::ZERO
            || self.calculator.max_amount > MAX_AMOUNT_CEILING
        {
            return Err(ConfigError::Message(format!(
                "calculator.max_amount must be in (0, {}], got {}",
                MAX_AMOUNT_CEILING, self.calculator.max_amount
            )));
        }
        Ok(())
    }
}
