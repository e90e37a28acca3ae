//! # report-types
//!
//! Shared domain types for the report pipeline.
//!
//! - Records: flattened report rows and embedding rows
//! - Batch cursor: deterministic pagination over sorted candidate ids
//! - Workflow input: the continuation payload of the embedding workflow
//! - Settings: layered configuration

pub mod batch;
pub mod config;
pub mod error;
pub mod record;

pub use batch::{BatchCursor, WorkflowInput, DEFAULT_BATCH_SIZE};
pub use config::{EmbeddingSettings, Settings, WorkflowSettings};
pub use error::ReportError;
pub use record::{
    parse_hl7_date, parse_work_date, Embedding, EmbeddingRecord, ReportRecord, DATE_COLUMN,
    MESSAGE_ID_COLUMN, NULL_PARTITION, REPORT_TEXT_COLUMN, YEAR_COLUMN,
};
