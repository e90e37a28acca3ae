//! Storage layer for the report pipeline.
//!
//! Provides RocksDB-backed storage with:
//! - Partitioned tables keyed by a merge column
//! - Atomic merge-upserts via WriteBatch
//! - Read-back verification of every write
//! - Checkpoints for resuming interrupted workflows

pub mod checkpoint;
pub mod column_families;
pub mod error;
pub mod keys;
pub mod table;
pub mod writer;

pub use checkpoint::CheckpointStore;
pub use error::StorageError;
pub use keys::{CheckpointKey, RowKey};
pub use table::{MergeStats, PartitionFilter, Row, RowFilter, Table, TableSchema};
pub use writer::{TableWriter, WriteSummary};
