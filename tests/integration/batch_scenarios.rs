//! Batch, enrichment and worker-pool behavior end to end.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use bulkfetch::batch::{BatchProcessor, JobError, Manifest, RunOutcome};
use bulkfetch::dispatch::ServiceReply;
use bulkfetch::{ItemId, ResultEntry, ResultStore};

use super::support::{dispatcher_for, fast_config, numbered_ids, RecordingClient};

fn read_store(path: &std::path::Path) -> ResultStore {
    let json = std::fs::read_to_string(path).unwrap();
    serde_json::from_str(&json).unwrap()
}

#[tokio::test]
async fn test_batch_size_chunks_requests() {
    let dir = TempDir::new().unwrap();
    let output_path = dir.path().join("output.json");

    let mut config = fast_config(vec!["key-a".into()]);
    config.batch_size = 10;
    let client = Arc::new(RecordingClient::new());
    let dispatcher = dispatcher_for(&config, Arc::clone(&client));
    let processor =
        BatchProcessor::new(config, dispatcher, dir.path().join("checkpoint.json")).unwrap();

    let manifest = Manifest::from_ids(numbered_ids(95));
    let outcome = processor.run(&manifest, &output_path).await.unwrap();

    assert!(matches!(outcome, RunOutcome::Completed(_)));
    let sizes = client.call_sizes();
    assert_eq!(sizes.len(), 10);
    assert_eq!(&sizes[..9], &[10; 9]);
    assert_eq!(sizes[9], 5);
    assert_eq!(read_store(&output_path).len(), 95);
}

#[tokio::test]
async fn test_enrichment_merges_fetched_fields_into_seeds() {
    let dir = TempDir::new().unwrap();
    let output_path = dir.path().join("output.json");

    let config = fast_config(vec!["key-a".into()]);
    let client = Arc::new(RecordingClient::new().script(vec![Ok(ServiceReply::Success(vec![(
        "p1".to_string(),
        ResultEntry::Data(json!({"rank": 42})),
    )]))]));
    let dispatcher = dispatcher_for(&config, Arc::clone(&client));
    let processor =
        BatchProcessor::new(config, dispatcher, dir.path().join("checkpoint.json")).unwrap();

    let manifest = Manifest::with_seeds(vec![(
        "p1".to_string(),
        json!({"name": "alice", "rank": 0}),
    )]);
    processor.run(&manifest, &output_path).await.unwrap();

    let store = read_store(&output_path);
    match store.get("p1").unwrap() {
        ResultEntry::Data(value) => {
            assert_eq!(value["name"], "alice");
            assert_eq!(value["rank"], 42);
        }
        other => panic!("expected merged data entry, got {other:?}"),
    }
}

#[tokio::test]
async fn test_ids_missing_from_reply_are_confirmed_absent() {
    let dir = TempDir::new().unwrap();
    let output_path = dir.path().join("output.json");

    let mut config = fast_config(vec!["key-a".into()]);
    config.batch_size = 3;
    let client = Arc::new(RecordingClient::new().script(vec![Ok(ServiceReply::Success(vec![(
        "1".to_string(),
        ResultEntry::Data(json!({"id": "1"})),
    )]))]));
    let dispatcher = dispatcher_for(&config, Arc::clone(&client));
    let processor =
        BatchProcessor::new(config, dispatcher, dir.path().join("checkpoint.json")).unwrap();

    let manifest = Manifest::from_ids(numbered_ids(3));
    processor.run(&manifest, &output_path).await.unwrap();

    let store = read_store(&output_path);
    assert!(store.get("1").unwrap().is_data());
    assert_eq!(store.get("2"), Some(&ResultEntry::Absent));
    assert_eq!(store.get("3"), Some(&ResultEntry::Absent));
}

#[tokio::test]
async fn test_malformed_item_marked_failed_and_run_continues() {
    let dir = TempDir::new().unwrap();
    let output_path = dir.path().join("output.json");

    let config = fast_config(vec!["key-a".into()]);
    let client = Arc::new(RecordingClient::new().script(vec![Ok(ServiceReply::Rejected(
        "unknown field".to_string(),
    ))]));
    let dispatcher = dispatcher_for(&config, Arc::clone(&client));
    let processor =
        BatchProcessor::new(config, dispatcher, dir.path().join("checkpoint.json")).unwrap();

    let manifest = Manifest::from_ids(numbered_ids(3));
    let outcome = processor.run(&manifest, &output_path).await.unwrap();

    let report = match outcome {
        RunOutcome::Completed(report) => report,
        other => panic!("expected completed run, got {other:?}"),
    };
    assert_eq!(report.processed, 3);
    assert_eq!(report.failed_ids, 1);

    let store = read_store(&output_path);
    assert_eq!(store.get("1"), Some(&ResultEntry::Failed));
    assert!(store.get("2").unwrap().is_data());
    assert!(store.get("3").unwrap().is_data());
}

#[tokio::test]
async fn test_all_credentials_rejected_aborts_with_checkpoint() {
    let dir = TempDir::new().unwrap();
    let checkpoint_path = dir.path().join("checkpoint.json");
    let output_path = dir.path().join("output.json");

    let config = fast_config(vec!["key-a".into(), "key-b".into()]);
    let client = Arc::new(RecordingClient::new().script(vec![
        Ok(ServiceReply::Unauthorized),
        Ok(ServiceReply::Unauthorized),
    ]));
    let dispatcher = dispatcher_for(&config, Arc::clone(&client));
    let processor = BatchProcessor::new(config, dispatcher, &checkpoint_path).unwrap();

    let manifest = Manifest::from_ids(numbered_ids(10));
    let err = processor.run(&manifest, &output_path).await.unwrap_err();

    assert!(matches!(err, JobError::PoolExhausted));
    assert!(checkpoint_path.exists());
    assert!(!output_path.exists());
}

#[tokio::test]
async fn test_worker_pool_processes_each_id_exactly_once() {
    let dir = TempDir::new().unwrap();
    let output_path = dir.path().join("output.json");

    let mut config = fast_config(vec!["key-a".into(), "key-b".into()]);
    config.workers = 4;
    config.batch_size = 5;
    let client = Arc::new(RecordingClient::new());
    let dispatcher = dispatcher_for(&config, Arc::clone(&client));
    let processor =
        BatchProcessor::new(config, dispatcher, dir.path().join("checkpoint.json")).unwrap();

    let expected: Vec<ItemId> = numbered_ids(60);
    let manifest = Manifest::from_ids(expected.clone());
    let outcome = processor.run(&manifest, &output_path).await.unwrap();

    let report = match outcome {
        RunOutcome::Completed(report) => report,
        other => panic!("expected completed run, got {other:?}"),
    };
    assert_eq!(report.processed, 60);

    let served = client.served_ids();
    assert_eq!(served.len(), 60);
    let unique: BTreeSet<_> = served.into_iter().collect();
    assert_eq!(unique, expected.into_iter().collect::<BTreeSet<_>>());
    assert_eq!(read_store(&output_path).len(), 60);
}
