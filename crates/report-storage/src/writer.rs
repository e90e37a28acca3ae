//! Verified merge writes.
//!
//! A write merges a batch into a table and then reads back the affected
//! partitions filtered to the written keys. The read-back must equal the
//! input batch once both are ordered by key.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::table::{column_string, dedup_by_key, MergeStats, PartitionFilter, Row, RowFilter, Table};

/// Outcome of one verified write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub merge: MergeStats,
    /// Rows read back and compared
    pub verified: usize,
}

/// Writes record batches into one table.
#[derive(Debug, Clone)]
pub struct TableWriter {
    table: Arc<Table>,
}

impl TableWriter {
    pub fn new(table: Arc<Table>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    /// Merge `records` on the table's key column and verify the result.
    ///
    /// An empty batch is a no-op.
    pub fn write_verified<T: Serialize>(&self, records: &[T]) -> Result<WriteSummary, StorageError> {
        if records.is_empty() {
            debug!(path = %self.table.path().display(), "Empty batch, nothing to write");
            return Ok(WriteSummary::default());
        }

        let rows = records
            .iter()
            .map(to_row)
            .collect::<Result<Vec<Row>, StorageError>>()?;
        self.write_rows(rows)
    }

    /// Merge already-built rows and verify the result.
    pub fn write_rows(&self, rows: Vec<Row>) -> Result<WriteSummary, StorageError> {
        if rows.is_empty() {
            return Ok(WriteSummary::default());
        }
        let key_column = self.table.schema().key_column.clone();
        let (expected, _) = dedup_by_key(rows.clone(), &key_column)?;
        let expected = expected
            .iter()
            .map(normalize)
            .collect::<Result<Vec<Row>, StorageError>>()?;

        let merge = self.table.merge(rows, &key_column)?;

        let partitions: BTreeSet<String> =
            expected.iter().map(|row| self.table.partition_of(row)).collect();
        let keys = expected.iter().filter_map(|row| column_string(row, &key_column));
        let actual = self.table.read(
            None,
            &PartitionFilter::In(partitions),
            &RowFilter::is_in(key_column.clone(), keys),
        )?;

        verify(expected, actual, &key_column)?;
        let summary = WriteSummary {
            merge,
            verified: merge.written(),
        };
        info!(
            path = %self.table.path().display(),
            rows = summary.verified,
            "Confirmed write"
        );
        Ok(summary)
    }
}

fn to_row<T: Serialize>(record: &T) -> Result<Row, StorageError> {
    match serde_json::to_value(record)? {
        Value::Object(row) => Ok(row),
        other => Err(StorageError::Serialization(format!(
            "record must serialize to an object, got {}",
            other
        ))),
    }
}

/// Pass a row through the same encoding the table stores it with.
fn normalize(row: &Row) -> Result<Row, StorageError> {
    Ok(serde_json::from_slice(&serde_json::to_vec(row)?)?)
}

/// Compare written rows with rows read back, ignoring order.
pub fn verify(mut expected: Vec<Row>, mut actual: Vec<Row>, key_column: &str) -> Result<(), StorageError> {
    let sort_key = |row: &Row| column_string(row, key_column);
    expected.sort_by_key(sort_key);
    actual.sort_by_key(sort_key);

    if expected.len() != actual.len() {
        return Err(StorageError::Integrity(format!(
            "wrote {} rows but read back {}",
            expected.len(),
            actual.len()
        )));
    }
    for (want, got) in expected.iter().zip(&actual) {
        if want != got {
            return Err(StorageError::Integrity(format!(
                "row {:?} read back as {}",
                sort_key(want),
                Value::Object(got.clone())
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::TableSchema;
    use rand::seq::SliceRandom;
    use report_types::ReportRecord;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_writer() -> (TableWriter, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let table = Table::create(
            &temp_dir.path().join("reports"),
            TableSchema::new("year", ReportRecord::KEY_COLUMN),
        )
        .unwrap();
        (TableWriter::new(Arc::new(table)), temp_dir)
    }

    fn record(source_file: &str, timestamp: &str) -> ReportRecord {
        let mut record = ReportRecord::new(source_file);
        record.msh_7_message_timestamp = Some(timestamp.to_string());
        record.msh_10_message_control_id = Some(format!("id-{source_file}"));
        record.with_derived_partition()
    }

    fn row(value: serde_json::Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_write_verified_records() {
        let (writer, _temp) = create_test_writer();
        let records = vec![
            record("a.hl7", "20210101120000"),
            record("b.hl7", "20210102120000"),
            record("c.hl7", "20220101120000"),
        ];
        let summary = writer.write_verified(&records).unwrap();
        assert_eq!(summary.merge.inserted, 3);
        assert_eq!(summary.verified, 3);
        assert_eq!(
            writer.table().partitions().unwrap(),
            BTreeSet::from(["2021".to_string(), "2022".to_string()])
        );
    }

    #[test]
    fn test_rewrite_leaves_content_unchanged() {
        let (writer, _temp) = create_test_writer();
        let mut records: Vec<ReportRecord> = (0..20)
            .map(|i| record(&format!("{i:02}.hl7"), "20230601000000"))
            .collect();
        writer.write_verified(&records).unwrap();
        let before = writer
            .table()
            .read(None, &PartitionFilter::All, &RowFilter::All)
            .unwrap();

        records.shuffle(&mut rand::rng());
        let summary = writer.write_verified(&records).unwrap();
        assert_eq!(summary.merge.inserted, 0);
        assert_eq!(summary.merge.updated, 20);
        let after = writer
            .table()
            .read(None, &PartitionFilter::All, &RowFilter::All)
            .unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let (writer, _temp) = create_test_writer();
        let summary = writer.write_verified::<ReportRecord>(&[]).unwrap();
        assert_eq!(summary, WriteSummary::default());
        assert_eq!(writer.table().row_count().unwrap(), 0);
    }

    #[test]
    fn test_verify_detects_value_mismatch() {
        let expected = vec![row(json!({"k": "a", "v": 1})), row(json!({"k": "b", "v": 2}))];
        let actual = vec![row(json!({"k": "b", "v": 2})), row(json!({"k": "a", "v": 9}))];
        assert!(matches!(
            verify(expected, actual, "k"),
            Err(StorageError::Integrity(_))
        ));
    }

    #[test]
    fn test_verify_detects_missing_row() {
        let expected = vec![row(json!({"k": "a"})), row(json!({"k": "b"}))];
        let actual = vec![row(json!({"k": "a"}))];
        assert!(matches!(
            verify(expected, actual, "k"),
            Err(StorageError::Integrity(_))
        ));
    }

    #[test]
    fn test_verify_ignores_order() {
        let expected = vec![row(json!({"k": "a"})), row(json!({"k": "b"}))];
        let actual = vec![row(json!({"k": "b"})), row(json!({"k": "a"}))];
        assert!(verify(expected, actual, "k").is_ok());
    }

    #[test]
    fn test_non_object_record_rejected() {
        let (writer, _temp) = create_test_writer();
        assert!(matches!(
            writer.write_verified(&[1, 2, 3]),
            Err(StorageError::Serialization(_))
        ));
    }
}
