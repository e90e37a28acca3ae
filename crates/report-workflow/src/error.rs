//! Error types for the embedding workflow.

use report_embeddings::EmbeddingError;
use report_storage::StorageError;
use report_types::ReportError;
use thiserror::Error;

/// Errors that can occur while running the workflow
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// Table or checkpoint store operation failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Inference service call failed
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Missing endpoint or invalid setting
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid workflow input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The report row for a work item is missing, duplicated or empty
    #[error("Report lookup failed for {message_id} on {date}: {reason}")]
    ReportLookup {
        message_id: String,
        date: String,
        reason: String,
    },

    /// Scratch storage failure
    #[error("Scratch error: {0}")]
    Scratch(String),

    /// An activity attempt exceeded its timeout
    #[error("Timed out: {0}")]
    Timeout(String),

    /// An activity failed on every allowed attempt
    #[error("Activity {activity_id} failed after {attempts} attempt(s): {source}")]
    Activity {
        activity_id: String,
        attempts: u32,
        source: Box<WorkflowError>,
    },

    /// Checkpoint load/save issues
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// JSON encoding/decoding errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A spawned activity task panicked or was cancelled
    #[error("Task error: {0}")]
    Join(String),
}

impl WorkflowError {
    /// Whether running the same operation again could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Embedding(e) => e.is_retryable(),
            Self::Storage(StorageError::Integrity(_) | StorageError::Schema(_)) => false,
            Self::Config(_) | Self::InvalidInput(_) | Self::ReportLookup { .. } => false,
            Self::Activity { .. } => false,
            _ => true,
        }
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        WorkflowError::Serialization(err.to_string())
    }
}

impl From<ReportError> for WorkflowError {
    fn from(err: ReportError) -> Self {
        match err {
            ReportError::Config(msg) => WorkflowError::Config(msg),
            ReportError::Serialization(e) => WorkflowError::Serialization(e.to_string()),
            ReportError::InvalidInput(msg) => WorkflowError::InvalidInput(msg),
        }
    }
}

impl From<tokio::task::JoinError> for WorkflowError {
    fn from(err: tokio::task::JoinError) -> Self {
        WorkflowError::Join(err.to_string())
    }
}
