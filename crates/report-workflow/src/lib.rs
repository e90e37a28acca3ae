//! Embedding workflow for the report pipeline.
//!
//! This crate turns report text stored in the report table into embedding
//! vectors, one work date at a time.
//!
//! ## Key Components
//!
//! - [`BatchPlanner`]: Selects a deterministic slice of message ids for a date
//!   and resolves each id to its single report text
//! - [`EmbedActivity`]: Embeds one report and stages the vector in scratch space
//! - [`RetryPolicy`]: Per-attempt timeout and exponential backoff for activities
//! - [`Orchestrator`]: Runs a single attempt through its state machine
//! - [`WorkflowRunner`]: Chains attempts across batches with checkpointing
//!
//! ## Architecture
//!
//! 1. The planner scans the date once, slices the batch and attaches texts
//! 2. Embed activities run concurrently and stage results per attempt
//! 3. Staged vectors are merged into the embedding table and verified
//! 4. The attempt's scratch namespace is removed
//! 5. If candidates remain, the next batch runs as a fresh attempt
//!
//! ## Example
//!
//! ```ignore
//! use report_workflow::{LocalScratchStore, OrchestratorConfig, WorkflowRunner};
//!
//! let runner = WorkflowRunner::new(checkpoints, service, Arc::new(LocalScratchStore::new()), OrchestratorConfig::default());
//! let summary = runner.run("embed-2024-03-01", input).await?;
//! println!("{} embeddings", summary.embeddings_committed);
//! ```

pub mod activity;
pub mod error;
pub mod orchestrator;
pub mod planner;
pub mod retry;
pub mod runner;
pub mod scratch;

#[cfg(test)]
pub(crate) mod testing;

pub use activity::{EmbedActivity, EmbedTask};
pub use error::WorkflowError;
pub use orchestrator::{
    AttemptReport, AttemptStats, Orchestrator, OrchestratorConfig, WorkflowOutcome, WorkflowState,
    WorkflowTables, PIPELINE_NAME,
};
pub use planner::{BatchPlan, BatchPlanner, DateReports, PlannedItem};
pub use retry::RetryPolicy;
pub use runner::{AttemptSummary, RunSummary, WorkflowCheckpoint, WorkflowRunner};
pub use scratch::{LocalScratchStore, ScratchNamespace, ScratchStager, ScratchStore};
