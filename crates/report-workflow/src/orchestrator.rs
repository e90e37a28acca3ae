//! One attempt of the embedding workflow.
//!
//! An attempt moves through
//! `Planning -> FanningOut -> Committing -> CleaningUp -> Continuing | Done`,
//! and into `Failed` from any state on error. Staged items are committed
//! in a single verified merge, and the scratch namespace is only removed
//! after that merge succeeded.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use report_embeddings::EmbeddingService;
use report_storage::{Table, TableSchema, TableWriter};
use report_types::{EmbeddingRecord, WorkflowInput, WorkflowSettings, YEAR_COLUMN};

use crate::activity::{EmbedActivity, EmbedTask};
use crate::error::WorkflowError;
use crate::planner::{BatchPlan, BatchPlanner};
use crate::retry::RetryPolicy;
use crate::scratch::{ScratchNamespace, ScratchStager, ScratchStore};

/// Pipeline name used as the first scratch path component.
pub const PIPELINE_NAME: &str = "ReportToEmbedding";

/// States an attempt passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowState {
    Planning,
    FanningOut,
    Committing,
    CleaningUp,
    Continuing,
    Done,
    Failed,
}

/// How a successful attempt ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowOutcome {
    /// No candidates remain after this batch
    Done,
    /// Run again with the next batch
    ContinueAsNew(WorkflowInput),
}

/// Counters collected during an attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptStats {
    /// Candidates for the date
    pub total_candidates: usize,
    /// Items selected for this batch
    pub planned: usize,
    /// Items staged by embed activities
    pub staged: usize,
    /// Rows written to the embedding table
    pub committed: usize,
}

/// Record of one attempt, returned whether it succeeded or not.
#[derive(Debug)]
pub struct AttemptReport {
    pub workflow_id: String,
    pub run_id: String,
    pub input: WorkflowInput,
    pub transitions: Vec<WorkflowState>,
    pub stats: AttemptStats,
    pub result: Result<WorkflowOutcome, WorkflowError>,
}

impl AttemptReport {
    pub fn final_state(&self) -> Option<WorkflowState> {
        self.transitions.last().copied()
    }

    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Report and embedding tables of one workflow.
#[derive(Clone)]
pub struct WorkflowTables {
    pub reports: Arc<Table>,
    pub embeddings: Arc<Table>,
}

impl WorkflowTables {
    /// Schema of the embedding table.
    pub fn embedding_schema() -> TableSchema {
        TableSchema::new(YEAR_COLUMN, EmbeddingRecord::KEY_COLUMN)
    }

    /// Open the tables named by `input`.
    ///
    /// The report table must exist; the embedding table is created on
    /// first use.
    pub fn open(input: &WorkflowInput) -> Result<Self, WorkflowError> {
        let reports = Table::open(Path::new(&input.report_table_path))?;
        let embeddings = Table::open_or_create(
            Path::new(&input.embedding_table_path),
            Self::embedding_schema(),
        )?;
        Ok(Self {
            reports: Arc::new(reports),
            embeddings: Arc::new(embeddings),
        })
    }

    /// Whether these tables are the ones `input` names.
    pub fn serves(&self, input: &WorkflowInput) -> bool {
        self.reports.path() == Path::new(&input.report_table_path)
            && self.embeddings.path() == Path::new(&input.embedding_table_path)
    }
}

/// Concurrency and retry settings of an attempt.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Embed activities in flight at once
    pub max_concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_settings(&WorkflowSettings::default())
    }
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &WorkflowSettings) -> Self {
        Self {
            max_concurrency: settings.max_concurrency.max(1),
            retry: RetryPolicy::from_settings(settings),
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Runs single attempts against a fixed set of resources.
pub struct Orchestrator {
    tables: WorkflowTables,
    activity: EmbedActivity,
    scratch: ScratchStager,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        tables: WorkflowTables,
        service: Arc<dyn EmbeddingService>,
        scratch: Arc<dyn ScratchStore>,
        config: OrchestratorConfig,
    ) -> Self {
        let scratch = ScratchStager::new(scratch);
        let activity = EmbedActivity::new(service, scratch.clone());
        Self {
            tables,
            activity,
            scratch,
            config,
        }
    }

    /// Run one attempt for `input`.
    pub async fn run_attempt(&self, workflow_id: &str, run_id: &str, input: &WorkflowInput) -> AttemptReport {
        let mut transitions = Vec::new();
        let mut stats = AttemptStats::default();
        let result = self
            .execute(workflow_id, run_id, input, &mut transitions, &mut stats)
            .await;

        if let Err(err) = &result {
            error!(
                workflow_id,
                run_id,
                batch_num = input.batch_num,
                state = ?transitions.last(),
                error = %err,
                "Workflow attempt failed"
            );
            transitions.push(WorkflowState::Failed);
        }

        AttemptReport {
            workflow_id: workflow_id.to_string(),
            run_id: run_id.to_string(),
            input: input.clone(),
            transitions,
            stats,
            result,
        }
    }

    async fn execute(
        &self,
        workflow_id: &str,
        run_id: &str,
        input: &WorkflowInput,
        transitions: &mut Vec<WorkflowState>,
        stats: &mut AttemptStats,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        transitions.push(WorkflowState::Planning);
        let cursor = input.cursor()?;
        let planner = BatchPlanner::new(self.tables.reports.clone());
        let plan = tokio::task::spawn_blocking(move || planner.plan(cursor)).await??;
        stats.total_candidates = plan.total;
        stats.planned = plan.items.len();
        let namespace = ScratchNamespace::new(&input.scratch_root, PIPELINE_NAME, workflow_id, run_id);

        transitions.push(WorkflowState::FanningOut);
        stats.staged = self.fan_out(&namespace, &plan).await?;

        transitions.push(WorkflowState::Committing);
        stats.committed = self.commit(&namespace).await?;

        transitions.push(WorkflowState::CleaningUp);
        self.scratch.purge(&namespace).await?;

        if plan.has_more {
            transitions.push(WorkflowState::Continuing);
            let next = input.next_batch();
            info!(workflow_id, run_id, next_batch = next.batch_num, "Continuing with next batch");
            Ok(WorkflowOutcome::ContinueAsNew(next))
        } else {
            transitions.push(WorkflowState::Done);
            info!(workflow_id, run_id, total = plan.total, "All batches complete");
            Ok(WorkflowOutcome::Done)
        }
    }

    /// Run one embed activity per planned id. The first failure cancels
    /// everything still in flight.
    async fn fan_out(&self, namespace: &ScratchNamespace, plan: &BatchPlan) -> Result<usize, WorkflowError> {
        if plan.is_empty() {
            return Ok(0);
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut tasks: JoinSet<Result<PathBuf, WorkflowError>> = JoinSet::new();

        for (index, item) in plan.items.iter().enumerate() {
            let task = EmbedTask::new(index, plan.cursor.date, item.clone());
            let activity = self.activity.clone();
            let namespace = namespace.clone();
            let retry = self.config.retry.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| WorkflowError::Join(e.to_string()))?;
                retry
                    .run(&task.activity_id, |_| activity.run(&namespace, &task))
                    .await
            });
        }

        let mut staged = 0;
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.map_err(WorkflowError::from).and_then(|r| r);
            match outcome {
                Ok(_) => staged += 1,
                Err(err) => {
                    let cancelled = tasks.len();
                    tasks.abort_all();
                    warn!(cancelled, error = %err, "Embed activity failed, cancelling batch");
                    // Aborted tasks still hold table handles until joined.
                    while tasks.join_next().await.is_some() {}
                    return Err(err);
                }
            }
        }
        info!(namespace = %namespace, staged, "Staged embeddings");
        Ok(staged)
    }

    /// Merge everything staged in `namespace` into the embedding table.
    async fn commit(&self, namespace: &ScratchNamespace) -> Result<usize, WorkflowError> {
        let embeddings = self.scratch.read_all(namespace).await?;
        if embeddings.is_empty() {
            info!(namespace = %namespace, "Nothing staged, skipping commit");
            return Ok(0);
        }

        let records = embeddings
            .into_iter()
            .map(EmbeddingRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let writer = TableWriter::new(self.tables.embeddings.clone());
        let summary = tokio::task::spawn_blocking(move || writer.write_verified(&records)).await??;
        Ok(summary.verified)
    }
}
