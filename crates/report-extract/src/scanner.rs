//! Message reading and directory scanning.
//!
//! Inputs are resolved lazily: explicit files are always read, directories
//! are walked recursively and only `.hl7` files inside them are read. Paths
//! already visited in the current run are skipped.

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info};
use walkdir::WalkDir;

use report_types::ReportRecord;

use crate::error::ExtractError;
use crate::extractor::{extract_and_join_reports, extract_metadata, extract_record};
use crate::message::Message;

/// File extension read inside directories.
pub const MESSAGE_EXTENSION: &str = "hl7";

/// Paths already read (files) or fully walked (directories) in a run.
#[derive(Debug, Clone, Default)]
pub struct VisitedPaths {
    paths: HashSet<PathBuf>,
}

impl VisitedPaths {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>) -> bool {
        self.paths.insert(path.into())
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// One scanned input.
#[derive(Debug)]
pub enum ScanItem {
    /// Message read and extracted
    Record(Box<ReportRecord>),
    /// Message could not be read or parsed
    Failed { path: PathBuf, error: ExtractError },
}

/// What `extract_text` renders for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extractable {
    /// Joined OBX-5 report text
    Report,
    /// Metadata JSON document
    Metadata,
}

/// Decode bytes as Latin-1; every byte maps to the char with the same value.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Read and parse one message file.
pub fn read_message(path: &Path) -> Result<Message, ExtractError> {
    debug!(path = %path.display(), "Reading message");
    let bytes = fs::read(path)?;
    Message::parse(&decode_latin1(&bytes))
}

/// Read one message file and flatten it into a report record.
pub fn read_record(path: &Path) -> Result<ReportRecord, ExtractError> {
    let message = read_message(path)?;
    Ok(extract_record(&message, path.to_string_lossy()))
}

/// Render the report text or metadata JSON for one message file.
///
/// Returns `Ok(None)` when the message has nothing to report.
pub fn extract_text(what: Extractable, path: &Path) -> Result<Option<String>, ExtractError> {
    info!(path = %path.display(), "Reading message");
    let message = read_message(path)?;
    match what {
        Extractable::Report => Ok(extract_and_join_reports(&message)),
        Extractable::Metadata => Ok(Some(serde_json::to_string(&extract_metadata(&message))?)),
    }
}

/// Lazily scan `inputs`, skipping anything already in `visited`.
pub fn scan(inputs: impl IntoIterator<Item = PathBuf>, visited: VisitedPaths) -> Scan {
    Scan {
        inputs: inputs.into_iter().collect(),
        walk: None,
        visited,
    }
}

struct ActiveWalk {
    root: PathBuf,
    entries: walkdir::IntoIter,
}

/// Iterator over scanned records. Not restartable.
pub struct Scan {
    inputs: VecDeque<PathBuf>,
    walk: Option<ActiveWalk>,
    visited: VisitedPaths,
}

impl Scan {
    /// Finish the scan and hand back the visited set.
    pub fn into_visited(self) -> VisitedPaths {
        self.visited
    }

    fn read(&mut self, path: PathBuf) -> ScanItem {
        let item = match read_record(&path) {
            Ok(record) => ScanItem::Record(Box::new(record)),
            Err(error) => {
                error!(path = %path.display(), error = %error, "Failed to read message");
                ScanItem::Failed {
                    path: path.clone(),
                    error,
                }
            }
        };
        self.visited.insert(path);
        item
    }

    fn next_from_walk(&mut self) -> Option<ScanItem> {
        let mut walk = self.walk.take()?;
        let mut found = None;
        for entry in walk.entries.by_ref() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| walk.root.clone());
                    error!(path = %path.display(), error = %err, "Failed to walk directory");
                    found = Some(ScanItem::Failed {
                        path,
                        error: err.into(),
                    });
                    break;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let is_message = entry
                .path()
                .extension()
                .is_some_and(|ext| ext == MESSAGE_EXTENSION);
            if !is_message || self.visited.contains(entry.path()) {
                continue;
            }
            found = Some(self.read(entry.into_path()));
            break;
        }

        match found {
            Some(item) => {
                self.walk = Some(walk);
                Some(item)
            }
            None => {
                debug!(directory = %walk.root.display(), "Finished directory");
                self.visited.insert(walk.root);
                None
            }
        }
    }
}

impl Iterator for Scan {
    type Item = ScanItem;

    fn next(&mut self) -> Option<ScanItem> {
        loop {
            if self.walk.is_some() {
                if let Some(item) = self.next_from_walk() {
                    return Some(item);
                }
                continue;
            }

            let path = self.inputs.pop_front()?;
            if self.visited.contains(&path) {
                debug!(path = %path.display(), "Skipping visited path");
                continue;
            }
            if path.is_dir() {
                info!(directory = %path.display(), "Scanning directory");
                self.walk = Some(ActiveWalk {
                    entries: WalkDir::new(&path).sort_by_file_name().into_iter(),
                    root: path,
                });
                continue;
            }
            return Some(self.read(path));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn message(control_id: &str) -> String {
        format!(
            "MSH|^~\\&|EPIC|ABC|PACS|ABC|20240301090000||ORU^R01|{control_id}|P|2.7\r\
             OBX|1|TX|IMP||Report for {control_id}||||||F"
        )
    }

    fn records(scan: &mut Scan) -> Vec<ReportRecord> {
        scan.by_ref()
            .filter_map(|item| match item {
                ScanItem::Record(record) => Some(*record),
                ScanItem::Failed { .. } => None,
            })
            .collect()
    }

    #[test]
    fn test_scan_directory_reads_only_hl7_files() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("nested");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join("a.hl7"), message("A")).unwrap();
        fs::write(nested.join("b.hl7"), message("B")).unwrap();
        fs::write(dir.path().join("notes.txt"), message("C")).unwrap();

        let mut scan = scan(vec![dir.path().to_path_buf()], VisitedPaths::new());
        let mut ids: Vec<String> = records(&mut scan)
            .into_iter()
            .filter_map(|r| r.msh_10_message_control_id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["A", "B"]);
        assert!(scan.into_visited().contains(dir.path()));
    }

    #[test]
    fn test_explicit_file_read_regardless_of_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("message.txt");
        fs::write(&path, message("X")).unwrap();

        let mut scan = scan(vec![path.clone()], VisitedPaths::new());
        let found = records(&mut scan);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source_file, path.to_string_lossy());
    }

    #[test]
    fn test_overlapping_inputs_are_deduplicated() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("nested");
        fs::create_dir_all(&nested).unwrap();
        let file = nested.join("b.hl7");
        fs::write(dir.path().join("a.hl7"), message("A")).unwrap();
        fs::write(&file, message("B")).unwrap();

        let inputs = vec![
            file.clone(),
            nested.clone(),
            dir.path().to_path_buf(),
            dir.path().to_path_buf(),
        ];
        let mut scan = scan(inputs, VisitedPaths::new());
        assert_eq!(records(&mut scan).len(), 2);

        // A second scan with the returned set finds nothing new.
        let visited = scan.into_visited();
        let mut again = super::scan(vec![dir.path().to_path_buf(), file], visited);
        assert!(records(&mut again).is_empty());
    }

    #[test]
    fn test_bad_file_does_not_abort_scan() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.hl7"), "not a message").unwrap();
        fs::write(dir.path().join("b.hl7"), message("B")).unwrap();

        let items: Vec<ScanItem> = scan(vec![dir.path().to_path_buf()], VisitedPaths::new()).collect();
        assert_eq!(items.len(), 2);
        assert!(matches!(
            &items[0],
            ScanItem::Failed { error: ExtractError::Parse(_), .. }
        ));
        assert!(matches!(&items[1], ScanItem::Record(_)));
    }

    #[test]
    fn test_missing_file_is_failed_item() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.hl7");
        let items: Vec<ScanItem> = scan(vec![missing], VisitedPaths::new()).collect();
        assert!(matches!(
            &items[..],
            [ScanItem::Failed { error: ExtractError::Io(_), .. }]
        ));
    }

    #[test]
    fn test_latin1_decoding() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("latin1.hl7");
        let mut bytes = b"MSH|^~\\&|A|B|C|D|20240301||ORU^R01|L1|P|2.7\rOBX|1|ST|A||Caf".to_vec();
        bytes.push(0xE9);
        fs::write(&path, bytes).unwrap();

        let text = extract_text(Extractable::Report, &path).unwrap();
        assert_eq!(text.as_deref(), Some("Caf\u{e9}"));
    }

    #[test]
    fn test_extract_metadata_text() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m.hl7");
        fs::write(&path, message("M1")).unwrap();

        let json = extract_text(Extractable::Metadata, &path).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["report_message_datetime"], "20240301090000");
        assert_eq!(value["report_status"], "F");
    }
}
