//! Rate limiting enforced end to end through the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use bulkfetch::batch::WorkItem;
use bulkfetch::config::RetryPolicy;
use bulkfetch::dispatch::{RequestDispatcher, ServiceReply, TransportError};
use bulkfetch::limiter::{CredentialPool, RateWindow};

use super::support::{fast_policy, RecordingClient};

fn tight_pool(credentials: usize, limit: usize) -> Arc<CredentialPool> {
    Arc::new(CredentialPool::with_margin(
        (0..credentials).map(|i| format!("key-{i}")),
        &[RateWindow::new(Duration::from_secs(1), limit)],
        Duration::from_millis(1),
    ))
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_waits_for_quota_instead_of_overrunning() {
    // One credential, two calls per second, five items: the run must stretch
    // over at least two full windows.
    let pool = tight_pool(1, 2);
    let client = Arc::new(RecordingClient::new());
    let dispatcher = RequestDispatcher::new(
        Arc::clone(&pool),
        Arc::clone(&client) as Arc<dyn bulkfetch::dispatch::QueryClient>,
        fast_policy(),
    );

    let started = tokio::time::Instant::now();
    for i in 0..5 {
        let item = WorkItem::new(vec![i.to_string()]);
        dispatcher.execute(&item).await.unwrap();
    }

    assert_eq!(client.call_count(), 5);
    // Calls 3 and 5 each had to wait out a one second window.
    assert!(started.elapsed() >= Duration::from_secs(2));

    let usage = pool.usage().await;
    assert!(usage[0].windows[0].used <= 2);
}

#[tokio::test(start_paused = true)]
async fn test_second_credential_absorbs_overflow_without_waiting() {
    // Two credentials, one call per second each: two calls go through
    // back to back by spilling onto the second credential.
    let pool = tight_pool(2, 1);
    let client = Arc::new(RecordingClient::new());
    let dispatcher = RequestDispatcher::new(
        Arc::clone(&pool),
        Arc::clone(&client) as Arc<dyn bulkfetch::dispatch::QueryClient>,
        fast_policy(),
    );

    let started = tokio::time::Instant::now();
    dispatcher.execute(&WorkItem::new(vec!["1".into()])).await.unwrap();
    dispatcher.execute(&WorkItem::new(vec!["2".into()])).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    let tokens = client.tokens_seen();
    assert_ne!(tokens[0], tokens[1]);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_back_off_exponentially() {
    let pool = tight_pool(1, 100);
    let client = Arc::new(RecordingClient::new().script(vec![
        Err(TransportError::Network("connection reset".into())),
        Err(TransportError::Network("connection reset".into())),
        Ok(ServiceReply::Success(vec![])),
    ]));
    let policy = RetryPolicy {
        backoff_base: Duration::from_secs(1),
        backoff_cap: Duration::from_secs(30),
        ..fast_policy()
    };
    let dispatcher = RequestDispatcher::new(
        Arc::clone(&pool),
        Arc::clone(&client) as Arc<dyn bulkfetch::dispatch::QueryClient>,
        policy,
    );

    let started = tokio::time::Instant::now();
    dispatcher
        .execute(&WorkItem::new(vec!["1".into()]))
        .await
        .unwrap();

    // 1s after the first failure, 2s after the second.
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(client.call_count(), 3);
    assert_eq!(dispatcher.stats().snapshot().network_errors, 2);
}
