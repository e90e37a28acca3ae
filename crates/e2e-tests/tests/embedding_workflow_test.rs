//! End-to-end embedding workflow tests.
//!
//! Ingested reports -> batch planning -> mock inference service -> scratch
//! staging -> verified merge into the embedding table.

use std::collections::BTreeSet;

use pretty_assertions::assert_eq;

use e2e_tests::{
    read_all, start_failing_inference_server, start_inference_server, synthetic_message, TestHarness,
};
use report_daemon::{default_workflow_id, handle_embed, handle_ingest, EmbedOptions};
use report_storage::CheckpointStore;
use report_workflow::WorkflowState;

fn ingest_day(harness: &TestHarness, count: usize) {
    for i in 0..count {
        let control_id = format!("ACC{i:03}");
        harness.write_message(
            &format!("{control_id}.hl7"),
            &synthetic_message(&control_id, "20240301120000", &format!("MRN{i}"), &format!("Report body {i}")),
        );
    }
    // Same year, different day: never a candidate.
    harness.write_message(
        "other-day.hl7",
        &synthetic_message("OTHER", "20240302120000", "MRNX", "Other day"),
    );
    handle_ingest(&harness.report_table_path, vec![harness.messages_dir.clone()], false).unwrap();
}

fn options(batch_size: usize, resume: bool) -> EmbedOptions {
    EmbedOptions {
        date: "2024-03-01".to_string(),
        batch_size: Some(batch_size),
        batch_num: 0,
        workflow_id: None,
        resume,
    }
}

#[tokio::test]
async fn test_embeds_every_report_of_the_date() {
    let harness = TestHarness::new();
    ingest_day(&harness, 5);
    let server = start_inference_server(&[0.25, -0.5, 1.0]).await;
    let settings = harness.settings(Some(server.uri()));

    let summary = handle_embed(&settings, options(2, false)).await.unwrap();
    assert_eq!(summary.workflow_id, "embed-2024-03-01");
    assert_eq!(summary.batches_completed, 3);
    assert_eq!(summary.embeddings_committed, 5);
    assert_eq!(
        summary.attempts.iter().map(|a| a.committed).collect::<Vec<_>>(),
        vec![2, 2, 1]
    );
    for attempt in &summary.attempts {
        let commit = attempt.transitions.iter().position(|s| *s == WorkflowState::Committing);
        let cleanup = attempt.transitions.iter().position(|s| *s == WorkflowState::CleaningUp);
        assert!(commit < cleanup);
    }

    let rows = read_all(&harness.embedding_table_path);
    let ids: Vec<&str> = rows
        .iter()
        .filter_map(|row| row["msh_10_message_control_id"].as_str())
        .collect();
    assert_eq!(ids, vec!["ACC000", "ACC001", "ACC002", "ACC003", "ACC004"]);
    for row in &rows {
        assert_eq!(row["year"], "2024");
        assert_eq!(row["date"], "2024-03-01");
        assert_eq!(row["embedding"], serde_json::json!([0.25, -0.5, 1.0]));
    }

    assert_eq!(harness.scratch_namespaces("embed-2024-03-01"), 0);
    let checkpoints = CheckpointStore::open(&harness.state_path).unwrap();
    assert!(checkpoints.list().unwrap().is_empty());
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let harness = TestHarness::new();
    ingest_day(&harness, 3);
    let server = start_inference_server(&[1.0, 2.0]).await;
    let settings = harness.settings(Some(server.uri()));

    handle_embed(&settings, options(10, false)).await.unwrap();
    let before = read_all(&harness.embedding_table_path);
    handle_embed(&settings, options(10, false)).await.unwrap();
    let after = read_all(&harness.embedding_table_path);
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_date_without_reports_is_single_empty_batch() {
    let harness = TestHarness::new();
    ingest_day(&harness, 2);
    let server = start_inference_server(&[1.0]).await;
    let settings = harness.settings(Some(server.uri()));

    let mut opts = options(10, false);
    opts.date = "2024-06-30".to_string();
    let summary = handle_embed(&settings, opts).await.unwrap();
    assert_eq!(summary.batches_completed, 1);
    assert_eq!(summary.embeddings_committed, 0);
    assert!(read_all(&harness.embedding_table_path).is_empty());
}

#[tokio::test]
async fn test_failed_batch_resumes_after_service_recovers() {
    let harness = TestHarness::new();
    ingest_day(&harness, 4);

    let broken = start_failing_inference_server().await;
    let err = handle_embed(&harness.settings(Some(broken.uri())), options(2, false))
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("--resume"));
    assert!(read_all(&harness.embedding_table_path).is_empty());
    {
        let checkpoints = CheckpointStore::open(&harness.state_path).unwrap();
        assert_eq!(
            checkpoints.list().unwrap(),
            vec![default_workflow_id("2024-03-01")]
        );
    }

    let healthy = start_inference_server(&[0.5]).await;
    let summary = handle_embed(&harness.settings(Some(healthy.uri())), options(2, true))
        .await
        .unwrap();
    assert_eq!(summary.batches_completed, 2);
    assert_eq!(summary.embeddings_committed, 4);

    let ids: BTreeSet<String> = read_all(&harness.embedding_table_path)
        .iter()
        .filter_map(|row| row["msh_10_message_control_id"].as_str().map(str::to_string))
        .collect();
    assert_eq!(ids.len(), 4);
}

#[tokio::test]
async fn test_missing_report_table_fails() {
    let harness = TestHarness::new();
    let server = start_inference_server(&[1.0]).await;
    let result = handle_embed(&harness.settings(Some(server.uri())), options(10, false)).await;
    assert!(result.is_err());
}
