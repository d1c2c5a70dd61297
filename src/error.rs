//! ═══════════════════════════════════════════════════════════════════════════════
//! ERROR — Unified Error Type for Thermal Grid
//! ═══════════════════════════════════════════════════════════════════════════════
//! Validation failures carry a specific reason. Data insufficiency is never an
//! error here: it is reported as an outcome value by the model.
//! ═══════════════════════════════════════════════════════════════════════════════

use thiserror::Error;

/// The unified error type for the crate
#[derive(Debug, Error)]
pub enum GridError {
    /// I/O error (event log persistence, config file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    /// Caller supplied a malformed value
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    /// Persisted history was recorded against a different grid layout
    #[error("Topology mismatch: {0}")]
    TopologyMismatch(String),
    /// Internal error (should not happen)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GridError {
    /// Message safe to hand to an outside caller. Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            GridError::Validation(e) => e.to_string(),
            GridError::Config(e) => e.to_string(),
            GridError::TopologyMismatch(_) => "event history does not match grid layout".into(),
            _ => "internal error".into(),
        }
    }
}

/// Configuration-specific errors
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
    /// File not found
    #[error("Config file not found: {0}")]
    FileNotFound(String),
}

impl ConfigError {
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Validation-specific errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Unit id outside the configured grid
    #[error("Invalid unit id {unit_id} (must be 0-{max})")]
    UnitOutOfRange { unit_id: i64, max: usize },
    /// Temperature outside the accepted bounds, or not a number
    #[error("Invalid temperature {value} (must be within {min}-{max})")]
    TemperatureOutOfRange { value: f64, min: f64, max: f64 },
    /// Unknown control mode
    #[error("Invalid mode '{0}' (expected 'standard' or 'ai')")]
    UnknownMode(String),
    /// Timestamp string could not be parsed
    #[error("Invalid timestamp format: {0}")]
    InvalidTimestamp(String),
}

/// Type alias for Result with GridError
pub type GridResult<T> = Result<T, GridError>;
