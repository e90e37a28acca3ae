//! Flat records written to the report and embedding tables.
//!
//! Column names follow the `{segment}_{field}_{name}` convention so the
//! tables stay readable from any query engine.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::ReportError;

/// Partition value used for rows whose partition column is null.
pub const NULL_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

/// Name of the partition column in both tables.
pub const YEAR_COLUMN: &str = "year";

/// Date column used to scope candidate work items.
pub const DATE_COLUMN: &str = "date";

/// Message control id column (MSH-10).
pub const MESSAGE_ID_COLUMN: &str = "msh_10_message_control_id";

/// Joined report text column (OBX-5).
pub const REPORT_TEXT_COLUMN: &str = "obx_5_observation_value";

/// One extracted HL7 message, flattened for the report table.
///
/// Keyed by `source_file`; partitioned by `year`, which is derived from
/// `msh_7_message_timestamp` along with `date`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub source_file: String,
    pub msh_7_message_timestamp: Option<String>,
    pub msh_10_message_control_id: Option<String>,
    pub pid_7_date_time_of_birth: Option<String>,
    pub pid_8_administrative_sex: Option<String>,
    pub pid_10_race: Option<String>,
    pub pid_22_ethnic_group: Option<String>,
    pub obr_2_placer_order_number: Option<String>,
    pub obr_3_filler_order_number: Option<String>,
    pub obr_4_universal_service_identifier_id: Option<String>,
    pub obr_4_universal_service_identifier_text: Option<String>,
    pub obr_4_universal_service_identifier_coding_system: Option<String>,
    pub obr_6_requested_datetime: Option<String>,
    pub obr_7_observation_datetime: Option<String>,
    pub obr_8_observation_end_datetime: Option<String>,
    pub obr_22_results_rpt_status_chng_datetime: Option<String>,
    pub obr_25_result_status: Option<String>,
    pub obx_5_observation_value: Option<String>,
    pub obx_11_observation_result_status: Option<String>,
    pub dg1_3_diagnosis_code_identifier: Option<String>,
    pub dg1_3_diagnosis_code_text: Option<String>,
    pub dg1_3_diagnosis_code_coding_system: Option<String>,
    pub zds_1_study_instance_uid: Option<String>,
    pub year: Option<String>,
    pub date: Option<String>,
}

impl ReportRecord {
    /// Merge key for report ingestion.
    pub const KEY_COLUMN: &'static str = "source_file";

    /// Create an empty record for the given source file.
    pub fn new(source_file: impl Into<String>) -> Self {
        Self {
            source_file: source_file.into(),
            msh_7_message_timestamp: None,
            msh_10_message_control_id: None,
            pid_7_date_time_of_birth: None,
            pid_8_administrative_sex: None,
            pid_10_race: None,
            pid_22_ethnic_group: None,
            obr_2_placer_order_number: None,
            obr_3_filler_order_number: None,
            obr_4_universal_service_identifier_id: None,
            obr_4_universal_service_identifier_text: None,
            obr_4_universal_service_identifier_coding_system: None,
            obr_6_requested_datetime: None,
            obr_7_observation_datetime: None,
            obr_8_observation_end_datetime: None,
            obr_22_results_rpt_status_chng_datetime: None,
            obr_25_result_status: None,
            obx_5_observation_value: None,
            obx_11_observation_result_status: None,
            dg1_3_diagnosis_code_identifier: None,
            dg1_3_diagnosis_code_text: None,
            dg1_3_diagnosis_code_coding_system: None,
            zds_1_study_instance_uid: None,
            year: None,
            date: None,
        }
    }

    /// Fill `year` and `date` from the message timestamp.
    ///
    /// An unparseable or missing timestamp leaves both as `None`.
    pub fn with_derived_partition(mut self) -> Self {
        let parsed = self
            .msh_7_message_timestamp
            .as_deref()
            .and_then(parse_hl7_date);
        self.year = parsed.map(|d| d.year().to_string());
        self.date = parsed.map(|d| d.format("%Y-%m-%d").to_string());
        self
    }
}

/// Parse the calendar date out of an HL7 DTM value (`YYYYMMDD[HHMM[SS[.S+]]][+/-ZZZZ]`).
pub fn parse_hl7_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    let digits = value.get(..8)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(digits, "%Y%m%d").ok()
}

/// Parse a `YYYY-MM-DD` work date.
pub fn parse_work_date(value: &str) -> Result<NaiveDate, ReportError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| ReportError::InvalidInput(format!("invalid date {value:?}: {e}")))
}

/// Embedding produced for one report, as staged in scratch space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    /// Work date (`YYYY-MM-DD`)
    pub date: String,
    /// Message control id of the embedded report
    pub message_id: String,
    /// Embedding vector as returned by the inference service
    pub vector_embedding: Vec<f32>,
}

/// Row in the embedding table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub date: String,
    pub msh_10_message_control_id: String,
    pub embedding: Vec<f32>,
    pub year: String,
}

impl EmbeddingRecord {
    /// Merge key for embeddings.
    pub const KEY_COLUMN: &'static str = MESSAGE_ID_COLUMN;
}

impl TryFrom<Embedding> for EmbeddingRecord {
    type Error = ReportError;

    fn try_from(embedding: Embedding) -> Result<Self, Self::Error> {
        let year = parse_work_date(&embedding.date)?.year().to_string();
        Ok(Self {
            date: embedding.date,
            msh_10_message_control_id: embedding.message_id,
            embedding: embedding.vector_embedding,
            year,
        })
    }
}
