//! End-to-end test infrastructure for the report pipeline.
//!
//! Provides a shared TestHarness and helper functions for E2E tests
//! covering ingestion through embedding.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use report_storage::{PartitionFilter, Row, RowFilter, Table};
use report_types::Settings;

/// Shared test harness for E2E tests.
///
/// Owns a temp directory with a message drop folder and the table, scratch
/// and state locations the pipeline writes to.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    /// Folder synthetic messages are written to
    pub messages_dir: PathBuf,
    pub report_table_path: PathBuf,
    pub embedding_table_path: PathBuf,
    pub scratch_root: PathBuf,
    pub state_path: PathBuf,
}

impl TestHarness {
    /// Create a new test harness rooted in a fresh temp directory.
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();
        let messages_dir = root.join("messages");
        fs::create_dir_all(&messages_dir).expect("Failed to create messages dir");

        Self {
            _temp_dir: temp_dir,
            messages_dir,
            report_table_path: root.join("tables").join("reports"),
            embedding_table_path: root.join("tables").join("embeddings"),
            scratch_root: root.join("scratch"),
            state_path: root.join("state"),
        }
    }

    /// Write `message` to `name` inside the messages folder.
    pub fn write_message(&self, name: &str, message: &str) -> PathBuf {
        let path = self.messages_dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create message subdir");
        }
        fs::write(&path, message).expect("Failed to write message");
        path
    }

    /// Settings pointing at this harness, with fast retries.
    pub fn settings(&self, base_url: Option<String>) -> Settings {
        let mut settings = Settings {
            report_table_path: self.report_table_path.to_string_lossy().into_owned(),
            embedding_table_path: self.embedding_table_path.to_string_lossy().into_owned(),
            scratch_root: self.scratch_root.to_string_lossy().into_owned(),
            state_path: self.state_path.to_string_lossy().into_owned(),
            ..Settings::default()
        };
        settings.embedding.base_url = base_url;
        settings.embedding.ready_poll_interval_ms = 10;
        settings.embedding.ready_timeout_secs = 2;
        settings.embedding.request_timeout_secs = 5;
        settings.workflow.max_attempts = 2;
        settings.workflow.initial_backoff_ms = 1;
        settings.workflow.max_backoff_ms = 5;
        settings.workflow.activity_timeout_secs = 5;
        settings.workflow.max_concurrency = 4;
        settings
    }

    /// Number of leftover scratch namespaces for `workflow_id`.
    pub fn scratch_namespaces(&self, workflow_id: &str) -> usize {
        let dir = self
            .scratch_root
            .join(report_workflow::PIPELINE_NAME)
            .join(workflow_id);
        fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Build an ORU^R01 message with one TX report observation.
pub fn synthetic_message(control_id: &str, timestamp: &str, mrn: &str, text: &str) -> String {
    [
        format!("MSH|^~\\&|RIS|HOSP|PACS|HOSP|{timestamp}||ORU^R01|{control_id}|P|2.7"),
        format!("PID|1||{mrn}^^^HOSP^MR||DOE^JANE||19700101|F"),
        format!("OBR|1|PL{control_id}|FL{control_id}|CT123^CT HEAD^LOCAL|||{timestamp}"),
        format!("OBX|1|TX|IMP||{text}||||||F"),
    ]
    .join("\r")
}

/// Read every row of the table at `path`. The table is closed again on return.
pub fn read_all(path: &Path) -> Vec<Row> {
    let table = Table::open(path).expect("Failed to open table");
    table
        .read(None, &PartitionFilter::All, &RowFilter::All)
        .expect("Failed to read table")
}

/// Start a mock inference service that answers every embed request with `vector`.
pub async fn start_inference_server(vector: &[f32]) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ready"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/embed"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"vector": vector, "dim": vector.len()})),
        )
        .mount(&server)
        .await;
    server
}

/// Start a mock inference service that is ready but fails every embed request.
pub async fn start_failing_inference_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ready"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/embed"))
        .respond_with(ResponseTemplate::new(503).set_body_string("model unavailable"))
        .mount(&server)
        .await;
    server
}
