use thiserror::Error;

/// Main error type for the calculator core
#[derive(Error, Debug)]
pub enum ReinoError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Input errors (clamped or rejected locally)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // State errors
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("No commission rate for asset: {asset_key}")]
    UnmatchedLookup { asset_key: String },

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Composition errors (fail fast at startup)
    #[error("Missing required dependency: {0}")]
    MissingDependency(String),

    // Readiness errors
    #[error("Component not ready after {waited_ms}ms: {component}")]
    ReadinessTimeout { component: String, waited_ms: u64 },

    // Outbound integration errors
    #[error("Integration failure: {0}")]
    Integration(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type alias for ReinoError
pub type Result<T> = std::result::Result<T, ReinoError>;

impl ReinoError {
    /// Errors that callers are expected to degrade around rather than abort on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ReinoError::InvalidInput(_)
                | ReinoError::InvalidState(_)
                | ReinoError::UnmatchedLookup { .. }
                | ReinoError::Validation(_)
                | ReinoError::ReadinessTimeout { .. }
                | ReinoError::Integration(_)
                | ReinoError::Http(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_dependency_is_fatal() {
        let err = ReinoError::MissingDependency("view sink".to_string());
        assert!(!err.is_recoverable());
        assert_eq!(err.to_string(), "Missing required dependency: view sink");
    }

    #[test]
    fn test_lookup_and_input_errors_are_recoverable() {
        assert!(ReinoError::InvalidInput("negative".into()).is_recoverable());
        assert!(ReinoError::UnmatchedLookup {
            asset_key: "renda fixa:cdb".into()
        }
        .is_recoverable());
    }
}
