//! Radiology report pipeline
//!
//! Ingests HL7 report messages and embeds their text in resumable batches.
//!
//! # Usage
//!
//! ```bash
//! report-pipeline extract <report|metadata> <file>
//! report-pipeline ingest [--delete] <table> <input>...
//! report-pipeline embed --date YYYY-MM-DD [--batch-size N] [--batch-num N] [--workflow-id ID] [--resume]
//! report-pipeline wait-ready
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/report-pipeline/config.toml)
//! 3. Environment variables (REPORT_*)
//! 4. CLI flags

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::error;

use report_daemon::{
    handle_embed, handle_extract, handle_ingest, handle_wait_ready, init_logging, load_settings,
    Cli, Commands, EmbedOptions,
};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref(), cli.log_level.as_deref())?;
    init_logging(&settings.log_level)?;

    match cli.command {
        Commands::Extract { kind, file } => match handle_extract(kind, &file) {
            Ok(Some(text)) => println!("{text}"),
            Ok(None) => return Ok(ExitCode::FAILURE),
            Err(e) => {
                error!(error = %format!("{e:#}"), "Extraction failed");
                return Ok(ExitCode::FAILURE);
            }
        },
        Commands::Ingest {
            delete,
            table,
            inputs,
        } => {
            let summary = handle_ingest(&table, inputs, delete)?;
            println!(
                "Ingested {} message(s), wrote {} row(s), skipped {}",
                summary.read, summary.written, summary.failed
            );
        }
        Commands::Embed {
            date,
            batch_size,
            batch_num,
            workflow_id,
            resume,
        } => {
            let options = EmbedOptions {
                date,
                batch_size,
                batch_num,
                workflow_id,
                resume,
            };
            let summary = handle_embed(&settings, options).await?;
            println!(
                "Workflow {} finished: {} batch(es), {} embedding(s)",
                summary.workflow_id, summary.batches_completed, summary.embeddings_committed
            );
        }
        Commands::WaitReady => {
            handle_wait_ready(&settings).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
