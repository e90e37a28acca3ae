//! Key encoding and decoding for storage layer.
//!
//! Row key format: `{partition}\0{key}`
//! - partition: partition column value, or the null partition marker
//! - key: merge key value
//!
//! Rows of one partition share a prefix, so a partition read is a single
//! prefix scan.

use crate::error::StorageError;

const SEPARATOR: u8 = 0;

/// Key for a table row
/// Format: {partition}\0{key}
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RowKey {
    /// Partition the row is stored under
    pub partition: String,
    /// Merge key value
    pub key: String,
}

impl RowKey {
    pub fn new(partition: impl Into<String>, key: impl Into<String>) -> Result<Self, StorageError> {
        let partition = partition.into();
        let key = key.into();
        if partition.as_bytes().contains(&SEPARATOR) {
            return Err(StorageError::Key(format!(
                "Partition value contains NUL: {:?}",
                partition
            )));
        }
        Ok(Self { partition, key })
    }

    /// Encode key to bytes for storage
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Self::partition_prefix(&self.partition);
        bytes.extend_from_slice(self.key.as_bytes());
        bytes
    }

    /// Decode key from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let split = bytes
            .iter()
            .position(|b| *b == SEPARATOR)
            .ok_or_else(|| StorageError::Key("Row key has no partition separator".to_string()))?;
        let partition = std::str::from_utf8(&bytes[..split])
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
        let key = std::str::from_utf8(&bytes[split + 1..])
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
        Ok(Self {
            partition: partition.to_string(),
            key: key.to_string(),
        })
    }

    /// Prefix shared by every row in `partition`
    pub fn partition_prefix(partition: &str) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(partition.len() + 1);
        bytes.extend_from_slice(partition.as_bytes());
        bytes.push(SEPARATOR);
        bytes
    }
}

/// Key for checkpoint entries
/// Format: checkpoint:{workflow_id}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointKey {
    /// Workflow the checkpoint belongs to
    pub workflow_id: String,
}

impl CheckpointKey {
    const PREFIX: &'static str = "checkpoint:";

    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{}{}", Self::PREFIX, self.workflow_id).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
        let workflow_id = s
            .strip_prefix(Self::PREFIX)
            .ok_or_else(|| StorageError::Key(format!("Invalid checkpoint key format: {}", s)))?;
        Ok(Self::new(workflow_id))
    }

    /// Prefix shared by all checkpoint keys
    pub fn prefix() -> &'static [u8] {
        Self::PREFIX.as_bytes()
    }
}
