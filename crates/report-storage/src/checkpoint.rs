//! Durable workflow checkpoints.
//!
//! Stores the pending input of each workflow so an interrupted run can be
//! resumed from the same batch.

use std::path::Path;

use rocksdb::{Direction, IteratorMode, Options, DB};
use tracing::{debug, info};

use crate::column_families::{build_state_cf_descriptors, CF_CHECKPOINTS};
use crate::error::StorageError;
use crate::keys::CheckpointKey;

/// RocksDB-backed checkpoint store.
pub struct CheckpointStore {
    db: DB,
}

impl CheckpointStore {
    /// Open the store at `path`, creating it if necessary.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening checkpoint store at {:?}", path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let db = DB::open_cf_descriptors(&db_opts, path, build_state_cf_descriptors())?;
        Ok(Self { db })
    }

    fn cf(&self) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(CF_CHECKPOINTS)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_CHECKPOINTS.to_string()))
    }

    /// Store a checkpoint, replacing any previous one.
    pub fn put(&self, workflow_id: &str, checkpoint_bytes: &[u8]) -> Result<(), StorageError> {
        let key = CheckpointKey::new(workflow_id);
        self.db.put_cf(self.cf()?, key.to_bytes(), checkpoint_bytes)?;
        // Checkpoints must survive a crash right after they are written.
        self.db.flush_cf(self.cf()?)?;
        debug!(workflow_id, "Saved checkpoint");
        Ok(())
    }

    /// Get the checkpoint for a workflow.
    pub fn get(&self, workflow_id: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let key = CheckpointKey::new(workflow_id);
        Ok(self.db.get_cf(self.cf()?, key.to_bytes())?)
    }

    /// Remove the checkpoint for a workflow.
    pub fn delete(&self, workflow_id: &str) -> Result<(), StorageError> {
        let key = CheckpointKey::new(workflow_id);
        self.db.delete_cf(self.cf()?, key.to_bytes())?;
        self.db.flush_cf(self.cf()?)?;
        debug!(workflow_id, "Deleted checkpoint");
        Ok(())
    }

    /// Ids of every workflow with a stored checkpoint, in key order.
    pub fn list(&self) -> Result<Vec<String>, StorageError> {
        let prefix = CheckpointKey::prefix();
        let mut ids = Vec::new();
        let iter = self
            .db
            .iterator_cf(self.cf()?, IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            ids.push(CheckpointKey::from_bytes(&key)?.workflow_id);
        }
        Ok(ids)
    }
}
