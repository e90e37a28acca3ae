//! Error types for message reading and extraction.

use thiserror::Error;

/// Errors raised while reading or parsing a message.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// IO error reading a message file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Message text is not a well-formed HL7 v2 message
    #[error("Parse error: {0}")]
    Parse(String),

    /// Directory traversal failed
    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// Metadata could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
