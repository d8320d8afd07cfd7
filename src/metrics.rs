//! Metric descriptions for the engine's counters and histograms.
//!
//! The engine emits through the `metrics` facade; installing an exporter is
//! the embedding application's job. Without a recorder installed every
//! emission is a no-op, so the engine degrades gracefully.

use metrics::{describe_counter, describe_histogram, Unit};

/// Register descriptions for every metric the engine emits.
///
/// Optional, but gives exporters proper units and help text. Safe to call
/// more than once.
pub fn describe_metrics() {
    describe_counter!(
        "bulkfetch_calls_total",
        Unit::Count,
        "Request attempts sent to the remote service"
    );
    describe_counter!(
        "bulkfetch_rate_limited_total",
        Unit::Count,
        "Explicit rate-limit replies received"
    );
    describe_counter!(
        "bulkfetch_network_errors_total",
        Unit::Count,
        "Attempts lost to timeouts, resets or server errors"
    );
    describe_counter!(
        "bulkfetch_credentials_revoked_total",
        Unit::Count,
        "Credentials permanently revoked after auth failures"
    );
    describe_counter!(
        "bulkfetch_pool_waits_total",
        Unit::Count,
        "Times the credential pool had to wait for quota"
    );
    describe_histogram!(
        "bulkfetch_pool_wait_seconds",
        Unit::Seconds,
        "Computed minimum wait when all credentials were saturated"
    );
    describe_counter!(
        "bulkfetch_items_processed_total",
        Unit::Count,
        "Work items reaching a terminal state"
    );
    describe_counter!(
        "bulkfetch_checkpoints_total",
        Unit::Count,
        "Checkpoint saves performed"
    );
}
