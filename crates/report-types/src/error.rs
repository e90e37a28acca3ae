//! Error types shared across the report pipeline.

use thiserror::Error;

/// Unified error type for shared pipeline types.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Configuration error (missing endpoint, invalid setting)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
