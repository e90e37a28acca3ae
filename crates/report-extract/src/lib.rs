//! # report-extract
//!
//! HL7 v2 message parsing and field extraction.
//!
//! - `message`: ER7 parser producing an addressable segment tree
//! - `extractor`: pure extraction of report rows, report text and metadata
//! - `scanner`: lazy, deduplicated reading of files and directories

pub mod error;
pub mod extractor;
pub mod message;
pub mod scanner;

pub use error::ExtractError;
pub use extractor::{
    extract_and_join_reports, extract_metadata, extract_patient_identifiers,
    extract_procedure_code, extract_record, extract_report_status,
    extract_report_status_from_obx11, resolve_obx11_status, Metadata, ObxStatus,
    PatientIdentifier, ProcedureCode,
};
pub use message::Message;
pub use scanner::{
    extract_text, read_message, read_record, scan, Extractable, Scan, ScanItem, VisitedPaths,
};
