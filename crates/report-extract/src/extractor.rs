//! Field extraction from parsed messages.
//!
//! Every function here is pure: given the same message it returns the same
//! value, and an absent address yields `None` rather than an error.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use report_types::ReportRecord;

use crate::message::{Message, Repeat, Segment};

/// OBX-2 value types whose OBX-5 contributes to the report text.
const TEXT_VALUE_TYPES: [&str; 3] = ["TX", "ST", "FT"];

/// One patient identifier from a PID-3 repeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientIdentifier {
    pub id_number: Option<String>,
    pub assigning_authority: Option<String>,
    pub identifier_type_code: Option<String>,
}

/// Universal service identifier from OBR-4.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureCode {
    pub code: Option<String>,
    pub text: Option<String>,
    pub coding_system: Option<String>,
    pub alternate_text: Option<String>,
}

/// Study-level metadata for one report message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub patient_ids: Option<Vec<PatientIdentifier>>,
    pub patient_sex: Option<String>,
    pub patient_birth_datetime: Option<String>,
    pub procedure_code: Option<ProcedureCode>,
    pub modality: Option<String>,
    pub report_status: Option<String>,
    pub scan_datetime: Option<String>,
    pub scan_end_datetime: Option<String>,
    pub report_status_change_datetime: Option<String>,
    pub report_message_datetime: Option<String>,
    pub study_instance_uid: Option<String>,
}

/// Result of collecting OBX-11 statuses across all OBX segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObxStatus {
    /// Status chosen for the message
    pub status: String,
    /// Every distinct non-empty status seen
    pub distinct: BTreeSet<String>,
}

impl ObxStatus {
    /// More than one distinct status was present.
    pub fn is_ambiguous(&self) -> bool {
        self.distinct.len() > 1
    }
}

/// Extract the first leaf of `segment`-`field`.
pub fn extract_field(message: &Message, segment: &str, field: usize) -> Option<String> {
    extract_component(message, segment, field, 1)
}

/// Extract one component of the first repeat of `segment`-`field`.
pub fn extract_component(
    message: &Message,
    segment: &str,
    field: usize,
    component: usize,
) -> Option<String> {
    let value = message.extract(segment, field, 1, component, 1);
    if value.is_none() {
        debug!(segment, field, component, "address not found in message");
    }
    value
}

/// Join the OBX-5 report text of every text-typed OBX segment with `\n`.
///
/// `TX` contributes one line per repeat; `ST` and `FT` contribute the whole
/// field. Other value types are skipped. Returns `None` when the message has
/// no OBX segments.
pub fn extract_and_join_reports(message: &Message) -> Option<String> {
    let mut obx_segments = message.segments("OBX").peekable();
    if obx_segments.peek().is_none() {
        debug!("OBX segment not found in message");
        return None;
    }

    let mut lines: Vec<String> = Vec::new();
    for obx in obx_segments {
        let value_type = obx.field(2).map(|f| f.as_str()).unwrap_or_default();
        match value_type {
            "TX" => {
                if let Some(value) = obx.field(5) {
                    lines.extend(value.repeats().iter().map(ToString::to_string));
                }
            }
            t if TEXT_VALUE_TYPES.contains(&t) => {
                lines.push(obx.field(5).map(ToString::to_string).unwrap_or_default());
            }
            other => {
                debug!(
                    set_id = obx.field(1).map(|f| f.as_str()).unwrap_or_default(),
                    value_type = other,
                    "Skipping OBX segment with unsupported value type"
                );
            }
        }
    }

    Some(lines.join("\n"))
}

/// Collect the distinct non-empty OBX-11 statuses.
///
/// When several distinct values are present the lexicographically smallest
/// is chosen and a warning is logged.
pub fn resolve_obx11_status(message: &Message) -> Option<ObxStatus> {
    let distinct: BTreeSet<String> = message
        .segments("OBX")
        .filter_map(|obx: &Segment| obx.field(11))
        .map(ToString::to_string)
        .filter(|status| !status.is_empty())
        .collect();

    let status = distinct.iter().next()?.clone();
    let resolved = ObxStatus { status, distinct };
    if resolved.is_ambiguous() {
        warn!(
            statuses = ?resolved.distinct,
            chosen = %resolved.status,
            "Multiple report statuses found in OBX-11"
        );
    }
    Some(resolved)
}

/// Report status taken from OBX-11 only.
pub fn extract_report_status_from_obx11(message: &Message) -> Option<String> {
    resolve_obx11_status(message).map(|s| s.status)
}

/// Report status from OBR-25, falling back to OBX-11 when OBR-25 is absent or empty.
pub fn extract_report_status(message: &Message) -> Option<String> {
    extract_field(message, "OBR", 25)
        .filter(|status| !status.is_empty())
        .or_else(|| extract_report_status_from_obx11(message))
}

/// Patient identifiers from the repeats of PID-3, in repeat order.
pub fn extract_patient_identifiers(message: &Message) -> Option<Vec<PatientIdentifier>> {
    let Some(pid) = message.segment("PID") else {
        debug!("PID segment not found in message");
        return None;
    };
    let pid3 = pid.field(3).filter(|f| !f.is_empty());
    let Some(pid3) = pid3 else {
        debug!("PID-3 not found in PID segment");
        return None;
    };

    let leaf = |repeat: &Repeat, component: usize| {
        repeat
            .component(component)
            .and_then(|c| c.subcomponent(1))
            .map(|value| message.unescape(value))
    };

    Some(
        pid3.repeats()
            .iter()
            .map(|repeat| PatientIdentifier {
                id_number: leaf(repeat, 1),
                assigning_authority: leaf(repeat, 4),
                identifier_type_code: leaf(repeat, 5),
            })
            .collect(),
    )
}

/// Procedure code from the first repeat of OBR-4 in the first OBR segment.
pub fn extract_procedure_code(message: &Message) -> Option<ProcedureCode> {
    let Some(obr) = message.segment("OBR") else {
        warn!("OBR segment not found in message");
        return None;
    };
    let Some(repeat) = obr.field(4).and_then(|f| f.repeat(1)) else {
        debug!("OBR-4 not found in OBR segment");
        return None;
    };

    let component = |index: usize| repeat.component(index).map(ToString::to_string);
    Some(ProcedureCode {
        code: component(1),
        text: component(2),
        coding_system: component(3),
        alternate_text: component(4),
    })
}

/// Study-level metadata for the message.
pub fn extract_metadata(message: &Message) -> Metadata {
    debug!("Extracting metadata from message");
    Metadata {
        patient_ids: extract_patient_identifiers(message),
        patient_sex: extract_field(message, "PID", 8),
        patient_birth_datetime: extract_field(message, "PID", 7),
        procedure_code: extract_procedure_code(message),
        modality: extract_field(message, "OBR", 24),
        report_status: extract_report_status(message),
        scan_datetime: extract_field(message, "OBR", 7),
        scan_end_datetime: extract_field(message, "OBR", 8),
        report_status_change_datetime: extract_field(message, "OBR", 22),
        report_message_datetime: extract_field(message, "MSH", 7),
        study_instance_uid: extract_field(message, "ZDS", 1),
    }
}

/// Flatten one message into a report table row.
pub fn extract_record(message: &Message, source_file: impl Into<String>) -> ReportRecord {
    let mut record = ReportRecord::new(source_file);
    record.msh_7_message_timestamp = extract_field(message, "MSH", 7);
    record.msh_10_message_control_id = extract_field(message, "MSH", 10);
    record.pid_7_date_time_of_birth = extract_field(message, "PID", 7);
    record.pid_8_administrative_sex = extract_field(message, "PID", 8);
    record.pid_10_race = extract_field(message, "PID", 10);
    record.pid_22_ethnic_group = extract_field(message, "PID", 22);
    record.obr_2_placer_order_number = extract_field(message, "OBR", 2);
    record.obr_3_filler_order_number = extract_field(message, "OBR", 3);
    record.obr_4_universal_service_identifier_id = extract_component(message, "OBR", 4, 1);
    record.obr_4_universal_service_identifier_text = extract_component(message, "OBR", 4, 2);
    record.obr_4_universal_service_identifier_coding_system =
        extract_component(message, "OBR", 4, 3);
    record.obr_6_requested_datetime = extract_field(message, "OBR", 6);
    record.obr_7_observation_datetime = extract_field(message, "OBR", 7);
    record.obr_8_observation_end_datetime = extract_field(message, "OBR", 8);
    record.obr_22_results_rpt_status_chng_datetime = extract_field(message, "OBR", 22);
    record.obr_25_result_status = extract_field(message, "OBR", 25);
    record.obx_5_observation_value = extract_and_join_reports(message);
    record.obx_11_observation_result_status = extract_report_status_from_obx11(message);
    record.dg1_3_diagnosis_code_identifier = extract_component(message, "DG1", 3, 1);
    record.dg1_3_diagnosis_code_text = extract_component(message, "DG1", 3, 2);
    record.dg1_3_diagnosis_code_coding_system = extract_component(message, "DG1", 3, 3);
    record.zds_1_study_instance_uid = extract_field(message, "ZDS", 1);
    record.with_derived_partition()
}
