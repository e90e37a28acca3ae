//! Report pipeline library exports.
//!
//! This crate provides the `report-pipeline` binary.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (extract, ingest, embed, wait-ready)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands, ExtractKind};
pub use commands::{
    default_workflow_id, handle_embed, handle_extract, handle_ingest, handle_wait_ready,
    init_logging, load_settings, EmbedOptions, IngestSummary,
};
