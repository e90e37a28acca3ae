//! Drives a workflow through all of its batches.
//!
//! Every attempt gets a fresh run id. A continuation is re-enqueued on the
//! runner's own queue, so successive batches never nest. The current input
//! is checkpointed before each attempt, which lets an interrupted workflow
//! resume at the batch it was working on.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use ulid::Ulid;

use report_embeddings::EmbeddingService;
use report_storage::CheckpointStore;
use report_types::WorkflowInput;

use crate::error::WorkflowError;
use crate::orchestrator::{
    AttemptReport, Orchestrator, OrchestratorConfig, WorkflowOutcome, WorkflowState, WorkflowTables,
};
use crate::scratch::ScratchStore;

/// Persisted progress of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowCheckpoint {
    pub workflow_id: String,
    /// Input of the batch to run next
    pub input: WorkflowInput,
    /// Attempts already made on `input`
    pub attempts_on_batch: u32,
    pub batches_completed: usize,
    pub embeddings_committed: usize,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl WorkflowCheckpoint {
    pub fn new(workflow_id: impl Into<String>, input: WorkflowInput) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            input,
            attempts_on_batch: 0,
            batches_completed: 0,
            embeddings_committed: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WorkflowError> {
        serde_json::to_vec(self).map_err(|e| WorkflowError::Checkpoint(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WorkflowError> {
        serde_json::from_slice(bytes).map_err(|e| WorkflowError::Checkpoint(e.to_string()))
    }
}

/// What one attempt did, kept for the run summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptSummary {
    pub run_id: String,
    pub batch_num: usize,
    pub transitions: Vec<WorkflowState>,
    pub planned: usize,
    pub committed: usize,
}

impl From<&AttemptReport> for AttemptSummary {
    fn from(report: &AttemptReport) -> Self {
        Self {
            run_id: report.run_id.clone(),
            batch_num: report.input.batch_num,
            transitions: report.transitions.clone(),
            planned: report.stats.planned,
            committed: report.stats.committed,
        }
    }
}

/// Result of running a workflow to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub workflow_id: String,
    pub batches_completed: usize,
    pub embeddings_committed: usize,
    /// Attempts made by this invocation, in order
    pub attempts: Vec<AttemptSummary>,
}

/// Runs workflows and owns their checkpoints.
pub struct WorkflowRunner {
    checkpoints: Arc<CheckpointStore>,
    service: Arc<dyn EmbeddingService>,
    scratch: Arc<dyn ScratchStore>,
    config: OrchestratorConfig,
}

impl WorkflowRunner {
    pub fn new(
        checkpoints: Arc<CheckpointStore>,
        service: Arc<dyn EmbeddingService>,
        scratch: Arc<dyn ScratchStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            checkpoints,
            service,
            scratch,
            config,
        }
    }

    /// Start `workflow_id` from `input`, replacing any earlier checkpoint.
    pub async fn run(&self, workflow_id: &str, input: WorkflowInput) -> Result<RunSummary, WorkflowError> {
        input.cursor()?;
        if self.load(workflow_id)?.is_some() {
            warn!(workflow_id, "Discarding existing checkpoint");
        }
        self.drive(WorkflowCheckpoint::new(workflow_id, input)).await
    }

    /// Continue `workflow_id` from its last checkpoint.
    pub async fn resume(&self, workflow_id: &str) -> Result<RunSummary, WorkflowError> {
        let checkpoint = self
            .load(workflow_id)?
            .ok_or_else(|| WorkflowError::Checkpoint(format!("no checkpoint for workflow {workflow_id}")))?;
        info!(
            workflow_id,
            batch_num = checkpoint.input.batch_num,
            attempts_on_batch = checkpoint.attempts_on_batch,
            "Resuming workflow"
        );
        self.drive(checkpoint).await
    }

    /// Workflows with a checkpoint, i.e. not yet finished.
    pub fn pending(&self) -> Result<Vec<String>, WorkflowError> {
        Ok(self.checkpoints.list()?)
    }

    pub fn load(&self, workflow_id: &str) -> Result<Option<WorkflowCheckpoint>, WorkflowError> {
        self.checkpoints
            .get(workflow_id)?
            .map(|bytes| WorkflowCheckpoint::from_bytes(&bytes))
            .transpose()
    }

    fn save(&self, checkpoint: &mut WorkflowCheckpoint) -> Result<(), WorkflowError> {
        checkpoint.updated_at = Utc::now();
        self.checkpoints
            .put(&checkpoint.workflow_id, &checkpoint.to_bytes()?)?;
        Ok(())
    }

    async fn drive(&self, mut checkpoint: WorkflowCheckpoint) -> Result<RunSummary, WorkflowError> {
        let workflow_id = checkpoint.workflow_id.clone();
        let mut summary = RunSummary {
            workflow_id: workflow_id.clone(),
            batches_completed: checkpoint.batches_completed,
            embeddings_committed: checkpoint.embeddings_committed,
            attempts: Vec::new(),
        };

        let (queue, mut pending) = mpsc::unbounded_channel::<WorkflowInput>();
        enqueue(&queue, checkpoint.input.clone())?;
        let mut cached: Option<WorkflowTables> = None;

        while let Some(input) = pending.recv().await {
            checkpoint.input = input.clone();
            checkpoint.attempts_on_batch += 1;
            self.save(&mut checkpoint)?;

            let tables = match cached.take() {
                Some(open) if open.serves(&input) => open,
                stale => {
                    // A table can only be open once per process.
                    drop(stale);
                    WorkflowTables::open(&input)?
                }
            };
            let orchestrator = Orchestrator::new(
                cached.insert(tables).clone(),
                self.service.clone(),
                self.scratch.clone(),
                self.config.clone(),
            );

            let run_id = Ulid::new().to_string();
            info!(
                workflow_id = %workflow_id,
                run_id = %run_id,
                batch_num = input.batch_num,
                "Starting workflow attempt"
            );
            let report = orchestrator.run_attempt(&workflow_id, &run_id, &input).await;
            summary.attempts.push(AttemptSummary::from(&report));

            match report.result {
                Ok(outcome) => {
                    summary.batches_completed += 1;
                    summary.embeddings_committed += report.stats.committed;
                    checkpoint.batches_completed = summary.batches_completed;
                    checkpoint.embeddings_committed = summary.embeddings_committed;
                    checkpoint.attempts_on_batch = 0;
                    match outcome {
                        WorkflowOutcome::ContinueAsNew(next) => {
                            checkpoint.input = next.clone();
                            self.save(&mut checkpoint)?;
                            enqueue(&queue, next)?;
                        }
                        WorkflowOutcome::Done => {
                            self.checkpoints.delete(&workflow_id)?;
                            break;
                        }
                    }
                }
                Err(err) => return Err(err),
            }
        }

        info!(
            workflow_id = %workflow_id,
            batches = summary.batches_completed,
            embeddings = summary.embeddings_committed,
            "Workflow complete"
        );
        Ok(summary)
    }
}

fn enqueue(queue: &mpsc::UnboundedSender<WorkflowInput>, input: WorkflowInput) -> Result<(), WorkflowError> {
    queue
        .send(input)
        .map_err(|e| WorkflowError::Join(format!("continuation queue closed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::scratch::LocalScratchStore;
    use crate::testing::{report, reports_table, FakeEmbeddingService};
    use chrono::NaiveDate;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
        checkpoints: Arc<CheckpointStore>,
    }

    impl Fixture {
        fn new(texts: &[&str]) -> Self {
            let temp = TempDir::new().unwrap();
            let records: Vec<_> = texts
                .iter()
                .enumerate()
                .map(|(i, text)| report(&format!("{i}.hl7"), &format!("MSG{i:02}"), "20240301120000", Some(text)))
                .collect();
            // Close the table again so the runner can open it.
            drop(reports_table(&temp, &records));
            let checkpoints = Arc::new(CheckpointStore::open(&temp.path().join("state")).unwrap());
            Self { temp, checkpoints }
        }

        fn input(&self, batch_size: usize) -> WorkflowInput {
            WorkflowInput {
                report_table_path: self.temp.path().join("reports").to_string_lossy().into_owned(),
                embedding_table_path: self.temp.path().join("embeddings").to_string_lossy().into_owned(),
                scratch_root: self.temp.path().join("scratch").to_string_lossy().into_owned(),
                date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                batch_size,
                batch_num: 0,
            }
        }

        fn runner(&self, service: FakeEmbeddingService) -> WorkflowRunner {
            let retry = RetryPolicy::default()
                .with_max_attempts(2)
                .with_backoff(Duration::from_millis(1), Duration::from_millis(1));
            WorkflowRunner::new(
                self.checkpoints.clone(),
                Arc::new(service),
                Arc::new(LocalScratchStore::new()),
                OrchestratorConfig::default().with_retry(retry),
            )
        }
    }

    #[tokio::test]
    async fn test_runs_ceil_n_over_b_attempts() {
        let texts: Vec<String> = (0..7).map(|i| format!("text {i}")).collect();
        let texts: Vec<&str> = texts.iter().map(String::as_str).collect();
        let fixture = Fixture::new(&texts);
        let runner = fixture.runner(FakeEmbeddingService::new());

        let summary = runner.run("wf", fixture.input(3)).await.unwrap();
        assert_eq!(summary.batches_completed, 3);
        assert_eq!(summary.embeddings_committed, 7);
        assert_eq!(
            summary.attempts.iter().map(|a| a.batch_num).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(
            summary.attempts.iter().map(|a| a.committed).collect::<Vec<_>>(),
            vec![3, 3, 1]
        );
        assert!(runner.pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_each_attempt_has_own_run_id_and_cleans_up() {
        let fixture = Fixture::new(&["a", "b", "c", "d"]);
        let runner = fixture.runner(FakeEmbeddingService::new());

        let summary = runner.run("wf", fixture.input(2)).await.unwrap();
        assert_eq!(summary.attempts.len(), 2);
        assert_ne!(summary.attempts[0].run_id, summary.attempts[1].run_id);
        for attempt in &summary.attempts {
            let commit = attempt
                .transitions
                .iter()
                .position(|s| *s == WorkflowState::Committing)
                .unwrap();
            let cleanup = attempt
                .transitions
                .iter()
                .position(|s| *s == WorkflowState::CleaningUp)
                .unwrap();
            assert!(commit < cleanup);
        }
        let workflow_dir = fixture.temp.path().join("scratch").join("ReportToEmbedding").join("wf");
        let leftover = std::fs::read_dir(&workflow_dir).map(|d| d.count()).unwrap_or(0);
        assert_eq!(leftover, 0);
    }

    #[tokio::test]
    async fn test_failed_batch_resumes_from_checkpoint() {
        let fixture = Fixture::new(&["a", "b", "poison", "d"]);

        let failing = fixture.runner(FakeEmbeddingService::new().failing_on("poison"));
        let err = failing.run("wf", fixture.input(2)).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Activity { .. }));

        let checkpoint = failing.load("wf").unwrap().unwrap();
        assert_eq!(checkpoint.input.batch_num, 1);
        assert_eq!(checkpoint.batches_completed, 1);
        assert_eq!(checkpoint.attempts_on_batch, 1);
        assert_eq!(failing.pending().unwrap(), vec!["wf".to_string()]);
        drop(failing);

        let healthy = fixture.runner(FakeEmbeddingService::new());
        let summary = healthy.resume("wf").await.unwrap();
        assert_eq!(summary.attempts.len(), 1);
        assert_eq!(summary.attempts[0].batch_num, 1);
        assert_eq!(summary.batches_completed, 2);
        assert_eq!(summary.embeddings_committed, 4);
        assert!(healthy.load("wf").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resume_without_checkpoint_fails() {
        let fixture = Fixture::new(&["a"]);
        let runner = fixture.runner(FakeEmbeddingService::new());
        assert!(matches!(
            runner.resume("unknown").await,
            Err(WorkflowError::Checkpoint(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_batch_size_rejected() {
        let fixture = Fixture::new(&["a"]);
        let runner = fixture.runner(FakeEmbeddingService::new());
        assert!(matches!(
            runner.run("wf", fixture.input(0)).await,
            Err(WorkflowError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let fixture = Fixture::new(&[]);
        let mut checkpoint = WorkflowCheckpoint::new("wf", fixture.input(5));
        checkpoint.batches_completed = 2;
        let decoded = WorkflowCheckpoint::from_bytes(&checkpoint.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.input, checkpoint.input);
        assert_eq!(decoded.batches_completed, 2);
        assert_eq!(
            decoded.updated_at.timestamp_millis(),
            checkpoint.updated_at.timestamp_millis()
        );
    }
}
