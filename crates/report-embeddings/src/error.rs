//! Embedding error types.

use thiserror::Error;

/// Errors that can occur when calling the inference service.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Transport failure (connect, timeout, TLS)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Service answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Service did not become ready in time
    #[error("Service not ready: {0}")]
    NotReady(String),

    /// Missing or invalid client configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl EmbeddingError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Config(_))
    }
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            EmbeddingError::Decode(err.to_string())
        } else {
            EmbeddingError::Http(err.to_string())
        }
    }
}

impl From<report_types::ReportError> for EmbeddingError {
    fn from(err: report_types::ReportError) -> Self {
        EmbeddingError::Config(err.to_string())
    }
}
