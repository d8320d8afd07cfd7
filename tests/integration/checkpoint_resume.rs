//! End-to-end checkpoint and resume behavior.

use std::collections::BTreeSet;
use std::sync::Arc;

use tempfile::TempDir;

use bulkfetch::batch::{BatchProcessor, Manifest, RunOutcome};
use bulkfetch::checkpoint::CheckpointManager;
use bulkfetch::shutdown::ShutdownCoordinator;
use bulkfetch::ResultStore;

use super::support::{dispatcher_for, fast_config, numbered_ids, RecordingClient};

#[tokio::test]
async fn test_completed_run_writes_output_and_clears_checkpoint() {
    let dir = TempDir::new().unwrap();
    let checkpoint_path = dir.path().join("checkpoint.json");
    let output_path = dir.path().join("output.json");

    let config = fast_config(vec!["key-a".into()]);
    let client = Arc::new(RecordingClient::new());
    let dispatcher = dispatcher_for(&config, Arc::clone(&client));
    let processor = BatchProcessor::new(config, dispatcher, &checkpoint_path).unwrap();

    let manifest = Manifest::from_ids(numbered_ids(20));
    let outcome = processor.run(&manifest, &output_path).await.unwrap();

    let report = match outcome {
        RunOutcome::Completed(report) => report,
        other => panic!("expected completed run, got {other:?}"),
    };
    assert_eq!(report.processed, 20);
    assert_eq!(report.failed_ids, 0);

    assert!(output_path.exists());
    assert!(!checkpoint_path.exists());

    let json = std::fs::read_to_string(&output_path).unwrap();
    let store: ResultStore = serde_json::from_str(&json).unwrap();
    assert_eq!(store.len(), 20);
    assert!(store.get("7").unwrap().is_data());
}

#[tokio::test]
async fn test_interrupt_then_resume_dispatches_only_the_remainder() {
    let dir = TempDir::new().unwrap();
    let checkpoint_path = dir.path().join("checkpoint.json");
    let output_path = dir.path().join("output.json");
    let ids = numbered_ids(1000);

    // First run: shutdown is requested after 500 successful calls.
    let shutdown = ShutdownCoordinator::shared();
    let mut config = fast_config(vec!["key-a".into()]);
    config.checkpoint_interval = 100;
    let client = Arc::new(RecordingClient::new().shutdown_after(500, Arc::clone(&shutdown)));
    let dispatcher = dispatcher_for(&config, Arc::clone(&client));
    let processor = BatchProcessor::new(config.clone(), dispatcher, &checkpoint_path)
        .unwrap()
        .with_shutdown(shutdown);

    let manifest = Manifest::from_ids(ids.clone());
    let outcome = processor.run(&manifest, &output_path).await.unwrap();

    let report = match outcome {
        RunOutcome::Interrupted(report) => report,
        other => panic!("expected interrupted run, got {other:?}"),
    };
    assert_eq!(report.processed, 500);
    assert_eq!(report.stats.total_calls, 500);
    assert!(checkpoint_path.exists());
    assert!(!output_path.exists());

    let first_served: BTreeSet<_> = client.served_ids().into_iter().collect();
    assert_eq!(first_served.len(), 500);

    // Second run resumes from the checkpoint and touches only the rest.
    let client = Arc::new(RecordingClient::new());
    let dispatcher = dispatcher_for(&config, Arc::clone(&client));
    let processor = BatchProcessor::new(config, dispatcher, &checkpoint_path).unwrap();
    let outcome = processor.run(&manifest, &output_path).await.unwrap();

    let report = match outcome {
        RunOutcome::Completed(report) => report,
        other => panic!("expected completed run, got {other:?}"),
    };
    assert_eq!(report.processed, 1000);
    assert_eq!(report.dispatched, 500);
    assert_eq!(report.stats.total_calls, 1000);

    let second_served: BTreeSet<_> = client.served_ids().into_iter().collect();
    assert_eq!(second_served.len(), 500);
    assert!(first_served.is_disjoint(&second_served));

    let json = std::fs::read_to_string(&output_path).unwrap();
    let store: ResultStore = serde_json::from_str(&json).unwrap();
    assert_eq!(store.len(), 1000);
    assert!(!checkpoint_path.exists());
}

#[tokio::test]
async fn test_checkpoint_on_disk_matches_in_run_state() {
    let dir = TempDir::new().unwrap();
    let checkpoint_path = dir.path().join("checkpoint.json");
    let output_path = dir.path().join("output.json");

    let shutdown = ShutdownCoordinator::shared();
    let mut config = fast_config(vec!["key-a".into()]);
    config.checkpoint_interval = 10;
    let client = Arc::new(RecordingClient::new().shutdown_after(25, Arc::clone(&shutdown)));
    let dispatcher = dispatcher_for(&config, Arc::clone(&client));
    let processor = BatchProcessor::new(config, dispatcher, &checkpoint_path)
        .unwrap()
        .with_shutdown(shutdown);

    let manifest = Manifest::from_ids(numbered_ids(100));
    processor.run(&manifest, &output_path).await.unwrap();

    let state = CheckpointManager::new(&checkpoint_path)
        .load()
        .unwrap()
        .expect("final checkpoint must exist after interruption");
    state.validate().unwrap();

    let served: BTreeSet<_> = client.served_ids().into_iter().collect();
    assert_eq!(state.processed_ids, served);
    for id in &state.processed_ids {
        assert!(state.result_store.get(id).unwrap().is_data());
    }
    assert_eq!(state.stats.total_calls, served.len() as u64);
}

#[tokio::test]
async fn test_corrupt_checkpoint_falls_back_to_fresh_run() {
    let dir = TempDir::new().unwrap();
    let checkpoint_path = dir.path().join("checkpoint.json");
    let output_path = dir.path().join("output.json");
    std::fs::write(&checkpoint_path, "{ not json").unwrap();

    let config = fast_config(vec!["key-a".into()]);
    let client = Arc::new(RecordingClient::new());
    let dispatcher = dispatcher_for(&config, Arc::clone(&client));
    let processor = BatchProcessor::new(config, dispatcher, &checkpoint_path).unwrap();

    let manifest = Manifest::from_ids(numbered_ids(5));
    let outcome = processor.run(&manifest, &output_path).await.unwrap();

    assert!(matches!(outcome, RunOutcome::Completed(_)));
    assert_eq!(client.call_count(), 5);
}
