//! Batch cursor and workflow input types.
//!
//! A cursor `(date, batch_size, batch_num)` selects the half-open slice
//! `[batch_num * batch_size, (batch_num + 1) * batch_size)` of the sorted
//! candidate set for `date`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ReportError;

/// Default number of work items per batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Deterministic pagination state over a sorted candidate set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCursor {
    pub date: NaiveDate,
    pub batch_size: usize,
    pub batch_num: usize,
}

impl BatchCursor {
    /// Create a cursor. `batch_size` must be at least 1.
    pub fn new(date: NaiveDate, batch_size: usize, batch_num: usize) -> Result<Self, ReportError> {
        if batch_size == 0 {
            return Err(ReportError::InvalidInput(
                "batch_size must be > 0".to_string(),
            ));
        }
        Ok(Self {
            date,
            batch_size,
            batch_num,
        })
    }

    /// First index (inclusive) covered by this batch.
    pub fn start_index(&self) -> usize {
        self.batch_num.saturating_mul(self.batch_size)
    }

    /// Last index (exclusive) covered by this batch.
    pub fn end_index(&self) -> usize {
        self.batch_num
            .saturating_add(1)
            .saturating_mul(self.batch_size)
    }

    /// Slice of `sorted` that belongs to this batch, clamped to its length.
    pub fn slice<'a, T>(&self, sorted: &'a [T]) -> &'a [T] {
        let start = self.start_index().min(sorted.len());
        let end = self.end_index().min(sorted.len());
        &sorted[start..end]
    }

    /// Whether candidates remain past this batch.
    pub fn has_more(&self, total: usize) -> bool {
        self.end_index() < total
    }

    /// Cursor for the following batch.
    pub fn next(&self) -> Self {
        Self {
            batch_num: self.batch_num + 1,
            ..*self
        }
    }
}

/// Input of one embedding workflow attempt.
///
/// Persisted as the continuation checkpoint, so every field needed to
/// re-run the attempt from scratch lives here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInput {
    pub report_table_path: String,
    pub embedding_table_path: String,
    pub scratch_root: String,
    pub date: NaiveDate,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub batch_num: usize,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl WorkflowInput {
    /// Cursor described by this input.
    pub fn cursor(&self) -> Result<BatchCursor, ReportError> {
        BatchCursor::new(self.date, self.batch_size, self.batch_num)
    }

    /// Same input, advanced to the next batch.
    pub fn next_batch(&self) -> Self {
        Self {
            batch_num: self.batch_num + 1,
            ..self.clone()
        }
    }

    /// Serialize to JSON bytes for the checkpoint store.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ReportError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ReportError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
