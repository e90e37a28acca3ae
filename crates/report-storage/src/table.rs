//! Partitioned, keyed table on RocksDB.
//!
//! Rows are JSON objects. Every row is stored under the value of the
//! partition column and addressed by the value of the merge key column.
//! A merge writes all of its inserts, updates and partition moves in one
//! `WriteBatch`.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use report_types::NULL_PARTITION;

use crate::column_families::{build_table_cf_descriptors, CF_KEY_INDEX, CF_META, CF_ROWS, TABLE_CF_NAMES};
use crate::error::StorageError;
use crate::keys::RowKey;

/// One table row.
pub type Row = Map<String, Value>;

const SCHEMA_KEY: &[u8] = b"schema";

/// Partition and merge key columns of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub partition_column: String,
    pub key_column: String,
}

impl TableSchema {
    pub fn new(partition_column: impl Into<String>, key_column: impl Into<String>) -> Self {
        Self {
            partition_column: partition_column.into(),
            key_column: key_column.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TableMeta {
    schema: TableSchema,
    created_at: DateTime<Utc>,
}

/// Which partitions a read visits.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PartitionFilter {
    #[default]
    All,
    In(BTreeSet<String>),
}

impl PartitionFilter {
    /// Single partition.
    pub fn only(partition: impl Into<String>) -> Self {
        Self::In(BTreeSet::from([partition.into()]))
    }
}

/// Row predicate applied after partition pruning.
///
/// Comparisons are on string-valued columns; a null or missing value never
/// matches `Eq` or `In`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RowFilter {
    #[default]
    All,
    Eq { column: String, value: String },
    In { column: String, values: HashSet<String> },
    And(Vec<RowFilter>),
}

impl RowFilter {
    pub fn equals(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn is_in<I, S>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Self::All => true,
            Self::Eq { column, value } => row
                .get(column)
                .and_then(Value::as_str)
                .is_some_and(|v| v == value),
            Self::In { column, values } => row
                .get(column)
                .and_then(Value::as_str)
                .is_some_and(|v| values.contains(v)),
            Self::And(filters) => filters.iter().all(|f| f.matches(row)),
        }
    }
}

/// Counts from one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub inserted: usize,
    pub updated: usize,
    /// Updated rows whose partition changed
    pub moved: usize,
    /// Input rows dropped because a later row had the same key
    pub collapsed: usize,
}

impl MergeStats {
    pub fn written(&self) -> usize {
        self.inserted + self.updated
    }
}

/// String form of a column value used for partitions and keys.
pub fn column_string(row: &Row, column: &str) -> Option<String> {
    match row.get(column) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

/// Collapse rows with the same key, keeping the last occurrence in input order.
pub fn dedup_by_key(rows: Vec<Row>, key_column: &str) -> Result<(Vec<Row>, usize), StorageError> {
    let total = rows.len();
    let mut latest: BTreeMap<String, (usize, Row)> = BTreeMap::new();
    for (position, row) in rows.into_iter().enumerate() {
        let key = column_string(&row, key_column).ok_or_else(|| {
            StorageError::Schema(format!("row {} has no value for key column {}", position, key_column))
        })?;
        latest.insert(key, (position, row));
    }
    let mut kept: Vec<(usize, Row)> = latest.into_values().collect();
    kept.sort_by_key(|(position, _)| *position);
    let collapsed = total - kept.len();
    Ok((kept.into_iter().map(|(_, row)| row).collect(), collapsed))
}

/// A partitioned table backed by its own RocksDB instance.
///
/// Writes are serialized: a merge reads the key index and writes its batch
/// under one lock, so concurrent merges of the same key cannot both miss a
/// row's previous partition.
pub struct Table {
    db: DB,
    path: PathBuf,
    meta: TableMeta,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("path", &self.path)
            .field("schema", &self.meta.schema)
            .finish()
    }
}

impl Table {
    /// Whether a table exists at `path`.
    pub fn exists(path: &Path) -> bool {
        path.join("CURRENT").is_file()
    }

    /// Create a new table. Fails if one already exists at `path`.
    pub fn create(path: &Path, schema: TableSchema) -> Result<Self, StorageError> {
        if Self::exists(path) {
            return Err(StorageError::AlreadyExists(path.display().to_string()));
        }
        info!(
            path = %path.display(),
            partition_column = %schema.partition_column,
            key_column = %schema.key_column,
            "Creating table"
        );

        let db = Self::open_db(path, true)?;
        let meta = TableMeta {
            schema,
            created_at: Utc::now(),
        };
        let cf = db
            .cf_handle(CF_META)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_META.to_string()))?;
        db.put_cf(&cf, SCHEMA_KEY, serde_json::to_vec(&meta)?)?;

        Ok(Self {
            db,
            path: path.to_path_buf(),
            meta,
            write_lock: Mutex::new(()),
        })
    }

    /// Open an existing table.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if !Self::exists(path) {
            return Err(StorageError::NotFound(path.display().to_string()));
        }
        debug!(path = %path.display(), "Opening table");

        let db = Self::open_db(path, false)?;
        let cf = db
            .cf_handle(CF_META)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_META.to_string()))?;
        let bytes = db
            .get_cf(&cf, SCHEMA_KEY)?
            .ok_or_else(|| StorageError::NotFound(format!("{} has no schema", path.display())))?;
        let meta: TableMeta = serde_json::from_slice(&bytes)?;

        Ok(Self {
            db,
            path: path.to_path_buf(),
            meta,
            write_lock: Mutex::new(()),
        })
    }

    /// Open the table at `path`, creating it with `schema` if it does not exist.
    ///
    /// An existing table must have the same schema.
    pub fn open_or_create(path: &Path, schema: TableSchema) -> Result<Self, StorageError> {
        if !Self::exists(path) {
            return Self::create(path, schema);
        }
        let table = Self::open(path)?;
        if table.meta.schema != schema {
            return Err(StorageError::Schema(format!(
                "table {} has schema {:?}, expected {:?}",
                path.display(),
                table.meta.schema,
                schema
            )));
        }
        Ok(table)
    }

    fn open_db(path: &Path, create: bool) -> Result<DB, StorageError> {
        if create {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut db_opts = Options::default();
        db_opts.create_if_missing(create);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);
        Ok(DB::open_cf_descriptors(
            &db_opts,
            path,
            build_table_cf_descriptors(),
        )?)
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        // The guard protects no data, so a poisoned lock is still usable.
        self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &TableSchema {
        &self.meta.schema
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.meta.created_at
    }

    /// Partition a row is stored under.
    pub fn partition_of(&self, row: &Row) -> String {
        column_string(row, &self.meta.schema.partition_column)
            .unwrap_or_else(|| NULL_PARTITION.to_string())
    }

    /// Read rows, optionally projected to `columns`.
    ///
    /// Rows come back ordered by partition, then key.
    pub fn read(
        &self,
        columns: Option<&[&str]>,
        partitions: &PartitionFilter,
        filter: &RowFilter,
    ) -> Result<Vec<Row>, StorageError> {
        let cf = self.cf(CF_ROWS)?;
        let mut rows = Vec::new();

        let mut visit = |value: &[u8]| -> Result<(), StorageError> {
            let row: Row = serde_json::from_slice(value)?;
            if filter.matches(&row) {
                rows.push(project(row, columns));
            }
            Ok(())
        };

        match partitions {
            PartitionFilter::All => {
                for item in self.db.iterator_cf(cf, IteratorMode::Start) {
                    let (_, value) = item?;
                    visit(&value)?;
                }
            }
            PartitionFilter::In(wanted) => {
                for partition in wanted {
                    let prefix = RowKey::partition_prefix(partition);
                    let iter = self
                        .db
                        .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));
                    for item in iter {
                        let (key, value) = item?;
                        if !key.starts_with(&prefix) {
                            break;
                        }
                        visit(&value)?;
                    }
                }
            }
        }

        debug!(path = %self.path.display(), rows = rows.len(), "Read table");
        Ok(rows)
    }

    /// Merge-upsert `rows` on `key_column`.
    ///
    /// Rows whose key already exists replace the stored row, moving it if its
    /// partition changed; other rows are inserted. Duplicate keys within
    /// `rows` collapse to the last occurrence.
    pub fn merge(&self, rows: Vec<Row>, key_column: &str) -> Result<MergeStats, StorageError> {
        if key_column != self.meta.schema.key_column {
            return Err(StorageError::Schema(format!(
                "merge key {} does not match table key {}",
                key_column, self.meta.schema.key_column
            )));
        }
        if rows.is_empty() {
            return Ok(MergeStats::default());
        }

        let (rows, collapsed) = dedup_by_key(rows, key_column)?;
        if collapsed > 0 {
            warn!(collapsed, "Collapsed duplicate keys in merge input");
        }

        let _guard = self.lock_writes();
        let rows_cf = self.cf(CF_ROWS)?;
        let index_cf = self.cf(CF_KEY_INDEX)?;
        let mut stats = MergeStats {
            collapsed,
            ..MergeStats::default()
        };
        let mut batch = WriteBatch::default();

        for row in &rows {
            let key = column_string(row, key_column).ok_or_else(|| {
                StorageError::Schema(format!("row has no value for key column {}", key_column))
            })?;
            let partition = self.partition_of(row);
            let row_key = RowKey::new(partition.clone(), key.clone())?;

            match self.db.get_cf(index_cf, key.as_bytes())? {
                Some(previous) => {
                    stats.updated += 1;
                    let previous = String::from_utf8(previous)
                        .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
                    if previous != partition {
                        stats.moved += 1;
                        batch.delete_cf(rows_cf, RowKey::new(previous, key.clone())?.to_bytes());
                    }
                }
                None => stats.inserted += 1,
            }

            batch.put_cf(rows_cf, row_key.to_bytes(), serde_json::to_vec(row)?);
            batch.put_cf(index_cf, key.as_bytes(), partition.as_bytes());
        }

        self.db.write(batch)?;
        info!(
            path = %self.path.display(),
            inserted = stats.inserted,
            updated = stats.updated,
            moved = stats.moved,
            "Merged rows"
        );
        Ok(stats)
    }

    /// Delete every row, then compact so the space is reclaimed.
    pub fn delete_all(&self) -> Result<usize, StorageError> {
        let _guard = self.lock_writes();
        let rows_cf = self.cf(CF_ROWS)?;
        let index_cf = self.cf(CF_KEY_INDEX)?;

        let mut batch = WriteBatch::default();
        let mut deleted = 0usize;
        for item in self.db.iterator_cf(rows_cf, IteratorMode::Start) {
            let (key, _) = item?;
            batch.delete_cf(rows_cf, key);
            deleted += 1;
        }
        for item in self.db.iterator_cf(index_cf, IteratorMode::Start) {
            let (key, _) = item?;
            batch.delete_cf(index_cf, key);
        }
        self.db.write(batch)?;

        self.db.compact_range_cf::<&[u8], &[u8]>(rows_cf, None, None);
        self.db.compact_range_cf::<&[u8], &[u8]>(index_cf, None, None);
        info!(path = %self.path.display(), deleted, "Deleted all rows");
        Ok(deleted)
    }

    /// Number of stored rows.
    pub fn row_count(&self) -> Result<usize, StorageError> {
        let cf = self.cf(CF_KEY_INDEX)?;
        let mut count = 0usize;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// Distinct partitions holding at least one row.
    pub fn partitions(&self) -> Result<BTreeSet<String>, StorageError> {
        let cf = self.cf(CF_KEY_INDEX)?;
        let mut partitions = BTreeSet::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            let partition = String::from_utf8(value.to_vec())
                .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
            partitions.insert(partition);
        }
        Ok(partitions)
    }

    /// Flush memtables to disk.
    pub fn flush(&self) -> Result<(), StorageError> {
        for name in TABLE_CF_NAMES {
            self.db.flush_cf(self.cf(name)?)?;
        }
        Ok(())
    }
}

fn project(row: Row, columns: Option<&[&str]>) -> Row {
    match columns {
        None => row,
        Some(columns) => {
            let mut row = row;
            columns
                .iter()
                .map(|c| (c.to_string(), row.remove(*c).unwrap_or(Value::Null)))
                .collect()
        }
    }
}
