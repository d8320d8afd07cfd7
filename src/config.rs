//! Engine configuration and retry policy.

use std::time::Duration;

use crate::limiter::{default_windows, RateWindow};

/// Default number of ids batched into one request.
pub const DEFAULT_BATCH_SIZE: usize = 1;

/// Largest batch the remote service has been observed to accept.
pub const MAX_BATCH_SIZE: usize = 50;

/// Default checkpoint interval (terminal outcomes between saves).
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 1_000;

/// Default bound on transient (network/5xx/timeout) attempts per item.
pub const DEFAULT_MAX_TRANSIENT_ATTEMPTS: u32 = 5;

/// Default bound on credential rotations after explicit rate-limit replies.
pub const DEFAULT_MAX_RATE_LIMIT_ROTATIONS: u32 = 5;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No credentials were supplied.
    #[error("at least one credential is required")]
    NoCredentials,

    /// No rate windows were supplied.
    #[error("at least one rate window is required")]
    NoWindows,

    /// Batch size outside the accepted range.
    #[error("batch size {0} outside 1..={MAX_BATCH_SIZE}")]
    BatchSize(usize),

    /// Worker count must be at least one.
    #[error("worker count must be at least 1")]
    NoWorkers,

    /// Checkpoint interval must be at least one.
    #[error("checkpoint interval must be at least 1")]
    CheckpointInterval,
}

/// Retry and timeout policy for a single dispatched item.
///
/// All retries are iterative with explicit attempt counters; the budgets
/// below bound them.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Bound on transient attempts (network error, timeout, 5xx) per item.
    pub max_transient_attempts: u32,
    /// Bound on rotate-and-retry rounds after explicit rate-limit replies.
    pub max_rate_limit_rotations: u32,
    /// Base delay for exponential backoff.
    pub backoff_base: Duration,
    /// Cap applied to the exponential backoff.
    pub backoff_cap: Duration,
    /// Fixed delay after rotating credentials on a rate-limit reply.
    pub rotation_delay: Duration,
    /// Per-request timeout; a timeout is classified as transient.
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_transient_attempts: DEFAULT_MAX_TRANSIENT_ATTEMPTS,
            max_rate_limit_rotations: DEFAULT_MAX_RATE_LIMIT_ROTATIONS,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            rotation_delay: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff for a 1-indexed attempt: `base * 2^(attempt-1)`,
    /// capped at `backoff_cap`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let delay = self
            .backoff_base
            .saturating_mul(2u32.saturating_pow(exp));
        delay.min(self.backoff_cap)
    }
}

/// Configuration surface for the whole engine, supplied by the embedding
/// application.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bearer tokens, one per credential.
    pub credentials: Vec<String>,
    /// Rate windows enforced per credential.
    pub windows: Vec<RateWindow>,
    /// Ids batched into one request (1 disables batching).
    pub batch_size: usize,
    /// Worker-pool size (1 selects the sequential scheduling model).
    pub workers: usize,
    /// Terminal outcomes between checkpoint saves.
    pub checkpoint_interval: u64,
    /// Retry and timeout policy.
    pub retry: RetryPolicy,
    /// Safety margin added to the minimum wait when all credentials are
    /// saturated.
    pub acquire_margin: Duration,
}

impl EngineConfig {
    /// Config with default windows, policies and a single credential list.
    pub fn new(credentials: Vec<String>) -> Self {
        Self {
            credentials,
            windows: default_windows(),
            batch_size: DEFAULT_BATCH_SIZE,
            workers: 1,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            retry: RetryPolicy::default(),
            acquire_margin: crate::limiter::ACQUIRE_MARGIN,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.credentials.is_empty() {
            return Err(ConfigError::NoCredentials);
        }
        if self.windows.is_empty() {
            return Err(ConfigError::NoWindows);
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::BatchSize(self.batch_size));
        }
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.checkpoint_interval == 0 {
            return Err(ConfigError::CheckpointInterval);
        }
        Ok(())
    }
}
