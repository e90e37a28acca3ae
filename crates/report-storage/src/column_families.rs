//! Column family definitions for RocksDB.
//!
//! A table lives in its own RocksDB instance:
//! - rows: row documents keyed by partition then merge key
//! - key_index: merge key to current partition, so upserts can move rows
//! - meta: table schema
//!
//! The workflow state store holds a single `checkpoints` column family.

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for table rows
pub const CF_ROWS: &str = "rows";

/// Column family name for the merge key index
pub const CF_KEY_INDEX: &str = "key_index";

/// Column family name for table metadata
pub const CF_META: &str = "meta";

/// Column family name for workflow checkpoints
pub const CF_CHECKPOINTS: &str = "checkpoints";

/// Column families of a table
pub const TABLE_CF_NAMES: &[&str] = &[CF_ROWS, CF_KEY_INDEX, CF_META];

/// Row documents are JSON text; compress them.
fn rows_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build table column family descriptors
pub fn build_table_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_ROWS, rows_options()),
        ColumnFamilyDescriptor::new(CF_KEY_INDEX, Options::default()),
        ColumnFamilyDescriptor::new(CF_META, Options::default()),
    ]
}

/// Build state store column family descriptors
pub fn build_state_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![ColumnFamilyDescriptor::new(
        CF_CHECKPOINTS,
        Options::default(),
    )]
}
