//! Drives one logical request through acquisition, classification and
//! bounded retries.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, warn};

use super::client::{QueryClient, ServiceReply, TransportError};
use super::DispatchError;
use crate::batch::manifest::{ItemId, WorkItem};
use crate::batch::store::ResultEntry;
use crate::config::RetryPolicy;
use crate::limiter::{CredentialPool, PoolError};
use crate::stats::RunStats;

/// Sends one logical request using a credential from the pool, classifies
/// the outcome and retries or rotates credentials accordingly.
///
/// All retry state (attempt counters, backoff) is local to one `execute`
/// call; the pool and the stats are the only shared resources.
pub struct RequestDispatcher {
    pool: Arc<CredentialPool>,
    client: Arc<dyn QueryClient>,
    policy: RetryPolicy,
    stats: Arc<RunStats>,
}

impl RequestDispatcher {
    /// Build a dispatcher over a pool and a query client.
    pub fn new(pool: Arc<CredentialPool>, client: Arc<dyn QueryClient>, policy: RetryPolicy) -> Self {
        Self {
            pool,
            client,
            policy,
            stats: Arc::new(RunStats::new()),
        }
    }

    /// Shared call statistics, updated on every attempt.
    pub fn stats(&self) -> &Arc<RunStats> {
        &self.stats
    }

    /// The credential pool this dispatcher draws from.
    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    /// Execute one work item to a terminal outcome.
    ///
    /// Returns one entry per requested id on success. Item-level failures
    /// (`RateLimited`, `Transient`, `Malformed`) leave the rest of the batch
    /// unaffected; `PoolExhausted` and `Fatal` abort the run.
    pub async fn execute(
        &self,
        item: &WorkItem,
    ) -> Result<Vec<(ItemId, ResultEntry)>, DispatchError> {
        let mut transient_attempts: u32 = 0;
        let mut rotations: u32 = 0;

        loop {
            let lease = match self.pool.acquire().await {
                Ok(lease) => lease,
                Err(PoolError::Exhausted) => return Err(DispatchError::PoolExhausted),
            };

            let outcome = tokio::time::timeout(
                self.policy.request_timeout,
                self.client.query(&lease.token, item.ids()),
            )
            .await;

            // The acquire reserved the call slot; stats count exactly one
            // attempt per lease, whatever the branch.
            self.stats.record_call();
            counter!("bulkfetch_calls_total").increment(1);

            let transport_failure = match outcome {
                Err(_) => Some(TransportError::Timeout),
                Ok(Err(e)) => Some(e),
                Ok(Ok(reply)) => {
                    match reply {
                        ServiceReply::Success(entries) => return Ok(entries),
                        ServiceReply::RateLimited => {
                            self.stats.record_failed();
                            counter!("bulkfetch_rate_limited_total").increment(1);
                            rotations += 1;
                            if rotations > self.policy.max_rate_limit_rotations {
                                return Err(DispatchError::RateLimited { rotations });
                            }
                            warn!(
                                credential = lease.index,
                                rotation = rotations,
                                "rate limited, rotating credential"
                            );
                            self.pool.rotate().await;
                            tokio::time::sleep(self.policy.rotation_delay).await;
                            continue;
                        }
                        ServiceReply::Unauthorized => {
                            self.stats.record_failed();
                            warn!(credential = lease.index, "credential rejected, revoking");
                            self.pool.revoke(lease.index).await;
                            // Retry with whatever credential the pool hands
                            // out next; exhaustion surfaces on acquire.
                            continue;
                        }
                        ServiceReply::Rejected(message) => {
                            self.stats.record_failed();
                            debug!(error = %message, "request rejected, not retrying");
                            return Err(DispatchError::Malformed(message));
                        }
                    }
                }
            };

            if let Some(failure) = transport_failure {
                self.stats.record_failed();
                self.stats.record_network_error();
                counter!("bulkfetch_network_errors_total").increment(1);
                transient_attempts += 1;
                if transient_attempts >= self.policy.max_transient_attempts {
                    return Err(DispatchError::Transient {
                        attempts: transient_attempts,
                        last: failure.to_string(),
                    });
                }
                let backoff = self.policy.backoff(transient_attempts);
                warn!(
                    attempt = transient_attempts,
                    max = self.policy.max_transient_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %failure,
                    "transient failure, retrying after backoff"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}
