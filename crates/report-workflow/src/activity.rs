//! The per-item embed activity.
//!
//! Sends the report text of one message to the inference service and stages
//! the resulting vector in scratch space. The text is resolved during
//! planning, so an activity attempt never touches the report table.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;

use report_embeddings::EmbeddingService;
use report_types::Embedding;

use crate::error::WorkflowError;
use crate::planner::PlannedItem;
use crate::scratch::{ScratchNamespace, ScratchStager};

/// One work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedTask {
    /// Unique within an attempt; names the staged item
    pub activity_id: String,
    pub date: NaiveDate,
    pub message_id: String,
    pub text: String,
}

impl EmbedTask {
    /// Task for the `index`-th item of a batch.
    pub fn new(index: usize, date: NaiveDate, item: PlannedItem) -> Self {
        Self {
            activity_id: format!("{index:06}-{}", item.message_id),
            date,
            message_id: item.message_id,
            text: item.text,
        }
    }
}

/// Executes embed tasks against shared resources.
#[derive(Clone)]
pub struct EmbedActivity {
    service: Arc<dyn EmbeddingService>,
    stager: ScratchStager,
}

impl EmbedActivity {
    pub fn new(service: Arc<dyn EmbeddingService>, stager: ScratchStager) -> Self {
        Self { service, stager }
    }

    /// Embed one item and stage the result. Returns the staged path.
    pub async fn run(&self, namespace: &ScratchNamespace, task: &EmbedTask) -> Result<PathBuf, WorkflowError> {
        debug!(
            activity_id = %task.activity_id,
            message_id = %task.message_id,
            text_len = task.text.len(),
            "Embedding report"
        );
        let vector = self.service.embed(&task.text).await?;
        let embedding = Embedding {
            date: task.date.format("%Y-%m-%d").to_string(),
            message_id: task.message_id.clone(),
            vector_embedding: vector,
        };
        self.stager.stage(namespace, &task.activity_id, &embedding).await
    }
}
