//! Command implementations for the report pipeline.
//!
//! Handles:
//! - extract: Print report text or metadata of one message
//! - ingest: Scan messages and merge them into the report table
//! - embed: Run the embedding workflow for one date
//! - wait-ready: Block until the inference service is up

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use report_embeddings::{RemoteEmbeddingClient, RemoteEmbeddingConfig};
use report_extract::{extract_text, scan, Extractable, ScanItem, VisitedPaths};
use report_storage::{CheckpointStore, Table, TableSchema, TableWriter};
use report_types::{parse_work_date, ReportRecord, Settings, WorkflowInput, YEAR_COLUMN};
use report_workflow::{LocalScratchStore, OrchestratorConfig, RunSummary, WorkflowRunner};

use crate::cli::ExtractKind;

/// Records merged per table write during ingest.
pub const INGEST_CHUNK_SIZE: usize = 500;

/// Load configuration and apply CLI overrides (highest precedence).
pub fn load_settings(config_path: Option<&str>, log_level_override: Option<&str>) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(log_level) = log_level_override {
        settings.log_level = log_level.to_string();
    }
    Ok(settings)
}

/// Install the global tracing subscriber.
///
/// Logs go to stderr so command output on stdout stays clean.
pub fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Render report text or metadata JSON for `file`.
///
/// Returns `None` when there is nothing to print.
pub fn handle_extract(kind: ExtractKind, file: &Path) -> Result<Option<String>> {
    let what = match kind {
        ExtractKind::Report => Extractable::Report,
        ExtractKind::Metadata => Extractable::Metadata,
    };
    let text = extract_text(what, file).with_context(|| format!("Failed to extract from {}", file.display()))?;
    Ok(text.filter(|t| !t.is_empty()))
}

/// Counts from one ingest run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Rows removed by `--delete`
    pub deleted: usize,
    /// Messages read and extracted
    pub read: usize,
    /// Inputs that could not be read or parsed
    pub failed: usize,
    /// Rows inserted or updated
    pub written: usize,
}

/// Scan `inputs` and merge their records into the table at `table_path`.
///
/// With `delete`, every existing row is removed (and the table compacted)
/// before loading.
pub fn handle_ingest(table_path: &Path, inputs: Vec<PathBuf>, delete: bool) -> Result<IngestSummary> {
    let mut summary = IngestSummary::default();

    if delete && !Table::exists(table_path) {
        info!(path = %table_path.display(), "Table does not exist, nothing to delete");
        if inputs.is_empty() {
            return Ok(summary);
        }
    }

    let table = Table::open_or_create(table_path, TableSchema::new(YEAR_COLUMN, ReportRecord::KEY_COLUMN))
        .with_context(|| format!("Failed to open table {}", table_path.display()))?;
    let writer = TableWriter::new(Arc::new(table));

    if delete {
        summary.deleted = writer.table().delete_all().context("Failed to delete rows")?;
        info!(path = %table_path.display(), deleted = summary.deleted, "Deleted all rows");
    }

    let mut chunk: Vec<ReportRecord> = Vec::with_capacity(INGEST_CHUNK_SIZE);
    for item in scan(inputs, VisitedPaths::new()) {
        match item {
            ScanItem::Record(record) => {
                summary.read += 1;
                chunk.push(*record);
                if chunk.len() >= INGEST_CHUNK_SIZE {
                    summary.written += write_chunk(&writer, &mut chunk)?;
                }
            }
            ScanItem::Failed { .. } => summary.failed += 1,
        }
    }
    summary.written += write_chunk(&writer, &mut chunk)?;

    if summary.failed > 0 {
        warn!(failed = summary.failed, "Some inputs were skipped");
    }
    info!(
        path = %table_path.display(),
        read = summary.read,
        written = summary.written,
        "Ingest complete"
    );
    Ok(summary)
}

fn write_chunk(writer: &TableWriter, chunk: &mut Vec<ReportRecord>) -> Result<usize> {
    if chunk.is_empty() {
        return Ok(0);
    }
    let result = writer
        .write_verified(chunk.as_slice())
        .context("Failed to write report records")?;
    chunk.clear();
    Ok(result.merge.written())
}

/// Default workflow id for a work date.
pub fn default_workflow_id(date: &str) -> String {
    format!("embed-{date}")
}

fn remote_client(settings: &Settings) -> Result<RemoteEmbeddingClient> {
    let config = RemoteEmbeddingConfig::from_settings(&settings.embedding)
        .context("Invalid embedding configuration")?;
    RemoteEmbeddingClient::new(config).context("Failed to build embedding client")
}

/// Options of one `embed` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedOptions {
    pub date: String,
    pub batch_size: Option<usize>,
    pub batch_num: usize,
    pub workflow_id: Option<String>,
    pub resume: bool,
}

/// Run (or resume) the embedding workflow for one date.
pub async fn handle_embed(settings: &Settings, options: EmbedOptions) -> Result<RunSummary> {
    let date = parse_work_date(&options.date).context("Invalid --date")?;
    let workflow_id = options
        .workflow_id
        .clone()
        .unwrap_or_else(|| default_workflow_id(&options.date));

    let client = remote_client(settings)?;
    client
        .wait_until_ready()
        .await
        .context("Inference service is not ready")?;

    let checkpoints = CheckpointStore::open(Path::new(&settings.state_path))
        .with_context(|| format!("Failed to open state store {}", settings.state_path))?;
    let runner = WorkflowRunner::new(
        Arc::new(checkpoints),
        Arc::new(client),
        Arc::new(LocalScratchStore::new()),
        OrchestratorConfig::from_settings(&settings.workflow),
    );

    let summary = if options.resume {
        info!(workflow_id = %workflow_id, "Resuming embedding workflow");
        runner.resume(&workflow_id).await
    } else {
        let input = WorkflowInput {
            report_table_path: settings.report_table_path.clone(),
            embedding_table_path: settings.embedding_table_path.clone(),
            scratch_root: settings.scratch_root.clone(),
            date,
            batch_size: options.batch_size.unwrap_or(settings.workflow.batch_size),
            batch_num: options.batch_num,
        };
        info!(workflow_id = %workflow_id, date = %date, batch_size = input.batch_size, "Starting embedding workflow");
        runner.run(&workflow_id, input).await
    };

    summary.map_err(|e| {
        error!(workflow_id = %workflow_id, error = %e, "Embedding workflow failed");
        anyhow::Error::new(e).context(format!(
            "Workflow {workflow_id} failed; rerun with --resume to retry the failed batch"
        ))
    })
}

/// Poll the inference service until it is ready or the timeout passes.
pub async fn handle_wait_ready(settings: &Settings) -> Result<()> {
    let client = remote_client(settings)?;
    client
        .wait_until_ready()
        .await
        .context("Inference service is not ready")?;
    println!("Inference service at {} is ready", client.config().base_url);
    Ok(())
}
