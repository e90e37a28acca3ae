//! Batch planning.
//!
//! Candidate work items for a date are the distinct message control ids of
//! report rows stored under that date. Sorting them gives every attempt the
//! same view, so a cursor always selects the same slice.
//!
//! Report texts are collected in the same partition scan. Every id of the
//! selected batch must resolve to exactly one report with text before any
//! embed activity starts.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use tracing::{debug, info};

use report_storage::{table::column_string, PartitionFilter, RowFilter, Table};
use report_types::{BatchCursor, DATE_COLUMN, MESSAGE_ID_COLUMN, REPORT_TEXT_COLUMN};

use crate::error::WorkflowError;

/// Report texts of one date, grouped by message id.
///
/// An id maps to one entry per matching row; `None` is a row without text.
pub type DateReports = BTreeMap<String, Vec<Option<String>>>;

/// One id of a batch with the text to embed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedItem {
    pub message_id: String,
    pub text: String,
}

/// Work selected for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    pub cursor: BatchCursor,
    /// Items of this batch, in sorted id order
    pub items: Vec<PlannedItem>,
    /// Size of the full candidate set
    pub total: usize,
    /// Whether candidates remain after this batch
    pub has_more: bool,
}

impl BatchPlan {
    /// Slice `reports` for `cursor` and resolve the text of every selected id.
    pub fn from_reports(reports: &DateReports, cursor: BatchCursor) -> Result<Self, WorkflowError> {
        let sorted: Vec<&String> = reports.keys().collect();
        let total = sorted.len();
        let items = cursor
            .slice(&sorted)
            .iter()
            .map(|id| {
                let texts = reports.get(*id).map(Vec::as_slice).unwrap_or_default();
                resolve_text(cursor.date, id, texts).map(|text| PlannedItem {
                    message_id: (*id).clone(),
                    text,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            items,
            has_more: cursor.has_more(total),
            total,
            cursor,
        })
    }

    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.message_id.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// The single report text of `message_id`.
fn resolve_text(date: NaiveDate, message_id: &str, texts: &[Option<String>]) -> Result<String, WorkflowError> {
    let lookup_err = |reason: String| WorkflowError::ReportLookup {
        message_id: message_id.to_string(),
        date: date.format("%Y-%m-%d").to_string(),
        reason,
    };
    match texts {
        [Some(text)] => Ok(text.clone()),
        [None] => Err(lookup_err("report has no text".to_string())),
        [] => Err(lookup_err("no matching record".to_string())),
        many => Err(lookup_err(format!("{} matching records", many.len()))),
    }
}

/// Selects batches from the report table.
#[derive(Clone)]
pub struct BatchPlanner {
    reports: Arc<Table>,
}

impl BatchPlanner {
    pub fn new(reports: Arc<Table>) -> Self {
        Self { reports }
    }

    /// Report texts dated `date`, keyed by message id.
    ///
    /// Only the year partition of `date` is scanned. Rows without a message
    /// id are not candidates.
    pub fn reports(&self, date: NaiveDate) -> Result<DateReports, WorkflowError> {
        let rows = self.reports.read(
            Some(&[MESSAGE_ID_COLUMN, REPORT_TEXT_COLUMN][..]),
            &PartitionFilter::only(date.year().to_string()),
            &RowFilter::equals(DATE_COLUMN, date.format("%Y-%m-%d").to_string()),
        )?;
        let scanned = rows.len();
        let mut reports = DateReports::new();
        for row in &rows {
            if let Some(id) = column_string(row, MESSAGE_ID_COLUMN) {
                reports
                    .entry(id)
                    .or_default()
                    .push(column_string(row, REPORT_TEXT_COLUMN));
            }
        }
        debug!(%date, scanned, distinct = reports.len(), "Collected candidate ids");
        Ok(reports)
    }

    /// Plan the batch selected by `cursor`.
    ///
    /// Fails with `ReportLookup` if a selected id has no report, several
    /// reports, or a report without text.
    pub fn plan(&self, cursor: BatchCursor) -> Result<BatchPlan, WorkflowError> {
        let plan = BatchPlan::from_reports(&self.reports(cursor.date)?, cursor)?;
        info!(
            date = %cursor.date,
            batch_num = cursor.batch_num,
            batch_size = cursor.batch_size,
            selected = plan.items.len(),
            total = plan.total,
            has_more = plan.has_more,
            "Planned batch"
        );
        Ok(plan)
    }
}
