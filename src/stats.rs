//! Running call statistics, carried across restarts via checkpoints.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Lock-free call counters shared between the dispatcher and the processor.
#[derive(Debug, Default)]
pub struct RunStats {
    total_calls: AtomicU64,
    failed_calls: AtomicU64,
    network_errors: AtomicU64,
}

impl RunStats {
    /// Fresh counters, all zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request attempt.
    pub fn record_call(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one failed attempt (rate-limited, rejected, auth failure, ...).
    pub fn record_failed(&self) {
        self.failed_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one network-level error (timeout, reset, 5xx).
    pub fn record_network_error(&self) {
        self.network_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Serializable snapshot of the current counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            network_errors: self.network_errors.load(Ordering::Relaxed),
        }
    }

    /// Restore counters from a loaded checkpoint.
    pub fn restore(&self, snapshot: &StatsSnapshot) {
        self.total_calls.store(snapshot.total_calls, Ordering::Relaxed);
        self.failed_calls.store(snapshot.failed_calls, Ordering::Relaxed);
        self.network_errors
            .store(snapshot.network_errors, Ordering::Relaxed);
    }
}

/// Point-in-time view of [`RunStats`], as persisted in checkpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Total request attempts made.
    pub total_calls: u64,
    /// Attempts that ended in any failure classification.
    pub failed_calls: u64,
    /// Attempts lost to network-level errors.
    pub network_errors: u64,
}
