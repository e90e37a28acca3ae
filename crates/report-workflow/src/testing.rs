//! Shared fixtures for unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use report_embeddings::{EmbeddingError, EmbeddingService};
use report_storage::{Table, TableSchema, TableWriter};
use report_types::{ReportRecord, YEAR_COLUMN};

pub fn report(source: &str, control_id: &str, timestamp: &str, text: Option<&str>) -> ReportRecord {
    let mut record = ReportRecord::new(source);
    record.msh_7_message_timestamp = Some(timestamp.to_string());
    record.msh_10_message_control_id = Some(control_id.to_string());
    record.obx_5_observation_value = text.map(str::to_string);
    record.with_derived_partition()
}

pub fn reports_table(temp: &TempDir, records: &[ReportRecord]) -> Arc<Table> {
    let table = Arc::new(
        Table::create(
            &temp.path().join("reports"),
            TableSchema::new(YEAR_COLUMN, ReportRecord::KEY_COLUMN),
        )
        .unwrap(),
    );
    TableWriter::new(table.clone()).write_verified(records).unwrap();
    table
}

/// Deterministic in-process embedding service.
#[derive(Default)]
pub struct FakeEmbeddingService {
    calls: AtomicUsize,
    transient_failures: AtomicUsize,
    failing_texts: HashSet<String>,
    delay: Option<Duration>,
}

impl FakeEmbeddingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `n` calls with a retryable error.
    pub fn flaky(self, n: usize) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Always fail for `text`.
    pub fn failing_on(mut self, text: &str) -> Self {
        self.failing_texts.insert(text.to_string());
        self
    }

    /// Sleep for `delay` before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn vector_for(text: &str) -> Vec<f32> {
        vec![text.len() as f32, text.bytes().map(f32::from).sum::<f32>()]
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingService for FakeEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_texts.contains(text) {
            return Err(EmbeddingError::Status {
                status: 500,
                body: format!("cannot embed {text}"),
            });
        }
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(EmbeddingError::Http("connection reset".to_string()));
        }
        Ok(Self::vector_for(text))
    }

    async fn ready(&self) -> Result<(), EmbeddingError> {
        Ok(())
    }
}
