//! Credential pool with preferred-credential reuse and revocation.
//!
//! Owns every credential and its [`RateWindowTracker`]. Acquisition prefers
//! the last-used credential for continuity, falls back to a fixed-order scan,
//! and otherwise sleeps for the minimum wait across live credentials. That
//! sleep is the only blocking point in the whole engine.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, warn};

use super::window::{RateWindow, RateWindowTracker, WindowUsage};

/// Default safety margin added to the computed minimum wait before rescanning.
pub const ACQUIRE_MARGIN: Duration = Duration::from_millis(100);

/// Errors reported by the pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Every credential has been revoked; no further progress is possible.
    #[error("credential pool exhausted: all credentials revoked")]
    Exhausted,
}

/// A borrowed credential, valid for one request attempt.
///
/// The call slot is already reserved against the credential's windows, so
/// one acquire accounts for exactly one attempt.
#[derive(Debug, Clone)]
pub struct CredentialLease {
    /// Stable index of the credential inside the pool.
    pub index: usize,
    /// The bearer token to authenticate with.
    pub token: Arc<str>,
}

/// Per-credential usage snapshot for operator-facing stats.
#[derive(Debug, Clone)]
pub struct CredentialUsage {
    /// Stable index of the credential inside the pool.
    pub index: usize,
    /// Whether the credential has been revoked.
    pub revoked: bool,
    /// Consumption of each configured window.
    pub windows: Vec<WindowUsage>,
}

struct CredentialSlot {
    token: Arc<str>,
    tracker: RateWindowTracker,
    revoked: bool,
}

struct PoolInner {
    slots: Vec<CredentialSlot>,
    preferred: usize,
}

impl PoolInner {
    /// First usable credential at `now`, preferring the last-used one.
    ///
    /// Reserves one call slot on the chosen credential before the lock is
    /// released, so concurrent acquirers can never push a window past its
    /// limit in the gap between selection and the actual request.
    fn reserve(&mut self, now: Instant) -> Option<usize> {
        let preferred = self.preferred;
        if let Some(slot) = self.slots.get_mut(preferred) {
            if !slot.revoked && slot.tracker.can_call_at(now) {
                slot.tracker.record_call_at(now);
                return Some(preferred);
            }
        }
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if !slot.revoked && slot.tracker.can_call_at(now) {
                slot.tracker.record_call_at(now);
                self.preferred = i;
                return Some(i);
            }
        }
        None
    }

    fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| !s.revoked).count()
    }

    /// Minimum wait until any live credential frees up.
    fn min_wait(&mut self, now: Instant) -> Duration {
        self.slots
            .iter_mut()
            .filter(|s| !s.revoked)
            .map(|s| s.tracker.time_until_available_at(now))
            .min()
            .unwrap_or(Duration::ZERO)
    }
}

/// Shared, thread-safe pool of credentials.
pub struct CredentialPool {
    inner: tokio::sync::Mutex<PoolInner>,
    margin: Duration,
}

impl CredentialPool {
    /// Create a pool from bearer tokens, all sharing the same window set.
    pub fn new(tokens: impl IntoIterator<Item = String>, windows: &[RateWindow]) -> Self {
        Self::with_margin(tokens, windows, ACQUIRE_MARGIN)
    }

    /// Create a pool with a custom rescan safety margin.
    pub fn with_margin(
        tokens: impl IntoIterator<Item = String>,
        windows: &[RateWindow],
        margin: Duration,
    ) -> Self {
        let slots = tokens
            .into_iter()
            .map(|token| CredentialSlot {
                token: Arc::from(token),
                tracker: RateWindowTracker::new(windows),
                revoked: false,
            })
            .collect();
        Self {
            inner: tokio::sync::Mutex::new(PoolInner {
                slots,
                preferred: 0,
            }),
            margin,
        }
    }

    /// Acquire a usable credential, sleeping while all are saturated.
    ///
    /// Returns immediately when the preferred (last-used) credential can
    /// call; otherwise scans all live credentials in a fixed order; otherwise
    /// sleeps `min(time_until_available) + margin` and rescans. The returned
    /// lease has its call slot reserved. Fails with [`PoolError::Exhausted`]
    /// when no live credential remains, rather than blocking forever.
    pub async fn acquire(&self) -> Result<CredentialLease, PoolError> {
        loop {
            let wait = {
                let mut inner = self.inner.lock().await;
                if inner.live_count() == 0 {
                    return Err(PoolError::Exhausted);
                }
                let now = Instant::now();
                if let Some(index) = inner.reserve(now) {
                    return Ok(CredentialLease {
                        index,
                        token: Arc::clone(&inner.slots[index].token),
                    });
                }
                inner.min_wait(now)
            };

            counter!("bulkfetch_pool_waits_total").increment(1);
            histogram!("bulkfetch_pool_wait_seconds").record(wait.as_secs_f64());
            debug!(wait_ms = wait.as_millis() as u64, "all credentials saturated, waiting");
            tokio::time::sleep(wait + self.margin).await;
        }
    }

    /// Permanently mark a credential unusable after a definitive auth failure.
    ///
    /// Returns `false` if the index was unknown or already revoked.
    pub async fn revoke(&self, index: usize) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.slots.get_mut(index) {
            Some(slot) if !slot.revoked => {
                slot.revoked = true;
                warn!(
                    credential = index,
                    live = inner.live_count(),
                    "credential revoked"
                );
                counter!("bulkfetch_credentials_revoked_total").increment(1);
                true
            }
            _ => false,
        }
    }

    /// Advance the preferred index to the next live credential.
    ///
    /// Used after an explicit rate-limit response: rotate first, wait only
    /// if everything turns out saturated.
    pub async fn rotate(&self) {
        let mut inner = self.inner.lock().await;
        let len = inner.slots.len();
        if len == 0 {
            return;
        }
        for step in 1..=len {
            let candidate = (inner.preferred + step) % len;
            if !inner.slots[candidate].revoked {
                inner.preferred = candidate;
                return;
            }
        }
    }

    /// Number of credentials that have not been revoked.
    pub async fn live_credentials(&self) -> usize {
        self.inner.lock().await.live_count()
    }

    /// Usage snapshot across all credentials.
    pub async fn usage(&self) -> Vec<CredentialUsage> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        inner
            .slots
            .iter_mut()
            .enumerate()
            .map(|(index, slot)| CredentialUsage {
                index,
                revoked: slot.revoked,
                windows: slot.tracker.usage_at(now),
            })
            .collect()
    }
}
