//! Shared test doubles for the integration suite.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use bulkfetch::batch::ItemId;
use bulkfetch::config::{EngineConfig, RetryPolicy};
use bulkfetch::dispatch::{QueryClient, RequestDispatcher, ServiceReply, TransportError};
use bulkfetch::limiter::{CredentialPool, RateWindow};
use bulkfetch::shutdown::SharedShutdown;
use bulkfetch::ResultEntry;

/// In-memory service: records every call and serves scripted replies, falling
/// back to one data entry per requested id.
pub struct RecordingClient {
    calls: Mutex<Vec<Vec<ItemId>>>,
    tokens: Mutex<Vec<String>>,
    replies: Mutex<VecDeque<Result<ServiceReply, TransportError>>>,
    call_count: AtomicUsize,
    shutdown_after: Mutex<Option<(usize, SharedShutdown)>>,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            tokens: Mutex::new(Vec::new()),
            replies: Mutex::new(VecDeque::new()),
            call_count: AtomicUsize::new(0),
            shutdown_after: Mutex::new(None),
        }
    }

    /// Queue replies consumed in order before the default success behavior.
    pub fn script(self, replies: Vec<Result<ServiceReply, TransportError>>) -> Self {
        *self.replies.lock().unwrap() = replies.into();
        self
    }

    /// Request shutdown once `n` calls have been served.
    pub fn shutdown_after(self, n: usize, shutdown: SharedShutdown) -> Self {
        *self.shutdown_after.lock().unwrap() = Some((n, shutdown));
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every id served across all calls, in call order.
    pub fn served_ids(&self) -> Vec<ItemId> {
        self.calls.lock().unwrap().iter().flatten().cloned().collect()
    }

    /// The batch sizes of each call, in order.
    pub fn call_sizes(&self) -> Vec<usize> {
        self.calls.lock().unwrap().iter().map(|c| c.len()).collect()
    }

    pub fn tokens_seen(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }

    fn default_success(ids: &[ItemId]) -> ServiceReply {
        ServiceReply::Success(
            ids.iter()
                .map(|id| {
                    (
                        id.clone(),
                        ResultEntry::Data(json!({ "id": id, "fetched": true })),
                    )
                })
                .collect(),
        )
    }
}

#[async_trait]
impl QueryClient for RecordingClient {
    async fn query(&self, token: &str, ids: &[ItemId]) -> Result<ServiceReply, TransportError> {
        self.calls.lock().unwrap().push(ids.to_vec());
        self.tokens.lock().unwrap().push(token.to_string());
        let served = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some((n, shutdown)) = self.shutdown_after.lock().unwrap().as_ref() {
            if served >= *n {
                shutdown.request_shutdown();
            }
        }

        match self.replies.lock().unwrap().pop_front() {
            Some(reply) => reply,
            None => Ok(Self::default_success(ids)),
        }
    }
}

/// Retry policy with millisecond delays so tests finish promptly.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        backoff_base: Duration::from_millis(1),
        backoff_cap: Duration::from_millis(8),
        rotation_delay: Duration::from_millis(1),
        request_timeout: Duration::from_secs(5),
        ..RetryPolicy::default()
    }
}

/// Engine config with generous windows and fast retries.
pub fn fast_config(credentials: Vec<String>) -> EngineConfig {
    let mut config = EngineConfig::new(credentials);
    config.windows = vec![RateWindow::new(Duration::from_secs(1), 10_000)];
    config.retry = fast_policy();
    config.acquire_margin = Duration::from_millis(1);
    config
}

/// Dispatcher wired to the given client under `config`.
pub fn dispatcher_for(
    config: &EngineConfig,
    client: Arc<RecordingClient>,
) -> Arc<RequestDispatcher> {
    let pool = Arc::new(CredentialPool::with_margin(
        config.credentials.clone(),
        &config.windows,
        config.acquire_margin,
    ));
    Arc::new(RequestDispatcher::new(pool, client, config.retry.clone()))
}

/// Ids "1" through `n`.
pub fn numbered_ids(n: usize) -> Vec<ItemId> {
    (1..=n).map(|i| i.to_string()).collect()
}
