//! Storage layer error types.

use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// RocksDB operation failed
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// Filesystem error around the database directory
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Column family not found
    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// Key encoding/decoding error
    #[error("Key error: {0}")]
    Key(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Table does not exist
    #[error("Table not found: {0}")]
    NotFound(String),

    /// Table already exists
    #[error("Table already exists: {0}")]
    AlreadyExists(String),

    /// Rows or merge arguments do not match the table schema
    #[error("Schema error: {0}")]
    Schema(String),

    /// Data read back after a write differs from what was written
    #[error("Integrity violation: {0}")]
    Integrity(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
