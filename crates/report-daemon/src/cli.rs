//! CLI argument parsing for the report pipeline.
//!
//! CLI flags override all other config sources.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Radiology report pipeline
///
/// Ingests HL7 report messages into a partitioned table and embeds the
/// report text in resumable batches.
#[derive(Parser, Debug)]
#[command(name = "report-pipeline")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/report-pipeline/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// What `extract` prints.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractKind {
    /// Joined report text
    Report,
    /// Metadata as JSON
    Metadata,
}

/// Pipeline commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the report text or metadata of one message
    Extract {
        #[arg(value_enum)]
        kind: ExtractKind,

        /// Message file
        file: PathBuf,
    },

    /// Load messages into the report table
    Ingest {
        /// Delete every row of the table before loading
        #[arg(long)]
        delete: bool,

        /// Report table path
        table: PathBuf,

        /// Message files or directories to scan for .hl7 files
        #[arg(required_unless_present = "delete")]
        inputs: Vec<PathBuf>,
    },

    /// Embed the reports of one date
    Embed {
        /// Work date (YYYY-MM-DD)
        #[arg(long)]
        date: String,

        /// Work items per batch (default from config)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Batch to start from
        #[arg(long, default_value = "0")]
        batch_num: usize,

        /// Workflow id (default: embed-<date>)
        #[arg(long)]
        workflow_id: Option<String>,

        /// Continue from the workflow's last checkpoint
        #[arg(long)]
        resume: bool,
    },

    /// Wait until the inference service reports ready
    WaitReady,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_extract_report() {
        let cli = Cli::parse_from(["report-pipeline", "extract", "report", "msg.hl7"]);
        match cli.command {
            Commands::Extract { kind, file } => {
                assert_eq!(kind, ExtractKind::Report);
                assert_eq!(file, PathBuf::from("msg.hl7"));
            }
            _ => panic!("Expected Extract command"),
        }
    }

    #[test]
    fn test_cli_extract_rejects_unknown_kind() {
        assert!(Cli::try_parse_from(["report-pipeline", "extract", "summary", "msg.hl7"]).is_err());
    }

    #[test]
    fn test_cli_ingest_inputs() {
        let cli = Cli::parse_from(["report-pipeline", "ingest", "/tables/reports", "a.hl7", "dir"]);
        match cli.command {
            Commands::Ingest {
                delete,
                table,
                inputs,
            } => {
                assert!(!delete);
                assert_eq!(table, PathBuf::from("/tables/reports"));
                assert_eq!(inputs, vec![PathBuf::from("a.hl7"), PathBuf::from("dir")]);
            }
            _ => panic!("Expected Ingest command"),
        }
    }

    #[test]
    fn test_cli_ingest_requires_inputs_without_delete() {
        assert!(Cli::try_parse_from(["report-pipeline", "ingest", "/tables/reports"]).is_err());
        let cli = Cli::parse_from(["report-pipeline", "ingest", "--delete", "/tables/reports"]);
        assert!(matches!(cli.command, Commands::Ingest { delete: true, .. }));
    }

    #[test]
    fn test_cli_embed_defaults() {
        let cli = Cli::parse_from(["report-pipeline", "embed", "--date", "2024-03-01"]);
        match cli.command {
            Commands::Embed {
                date,
                batch_size,
                batch_num,
                workflow_id,
                resume,
            } => {
                assert_eq!(date, "2024-03-01");
                assert_eq!(batch_size, None);
                assert_eq!(batch_num, 0);
                assert_eq!(workflow_id, None);
                assert!(!resume);
            }
            _ => panic!("Expected Embed command"),
        }
    }

    #[test]
    fn test_cli_embed_resume() {
        let cli = Cli::parse_from([
            "report-pipeline",
            "embed",
            "--date",
            "2024-03-01",
            "--workflow-id",
            "nightly",
            "--resume",
        ]);
        match cli.command {
            Commands::Embed {
                workflow_id, resume, ..
            } => {
                assert_eq!(workflow_id.as_deref(), Some("nightly"));
                assert!(resume);
            }
            _ => panic!("Expected Embed command"),
        }
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::parse_from([
            "report-pipeline",
            "wait-ready",
            "--config",
            "/etc/report.toml",
            "--log-level",
            "debug",
        ]);
        assert_eq!(cli.config.as_deref(), Some("/etc/report.toml"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Commands::WaitReady));
    }
}
