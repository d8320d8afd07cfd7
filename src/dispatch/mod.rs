//! Request dispatch: credential acquisition, classification and retries.
//!
//! [`client`] defines the seam to the remote service and a reqwest-backed
//! implementation; [`dispatcher`] drives one logical request through the
//! classification and retry policy.

pub mod client;
pub mod dispatcher;

pub use client::{HttpQueryClient, QueryClient, ServiceReply, TransportError};
pub use dispatcher::RequestDispatcher;

/// Closed failure taxonomy for a dispatched item.
///
/// `RateLimited` and `Transient` are retried inside the dispatcher and only
/// escape once their budgets are exhausted, in which case the single item is
/// marked permanently failed. Auth failures never escape as their own
/// variant: the credential is revoked and the item retried, surfacing as
/// `PoolExhausted` when no credential remains. `Malformed` is never retried.
/// `PoolExhausted` and `Fatal` are job-level failures.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Rate-limit replies persisted through the rotation budget.
    #[error("rate limited after {rotations} credential rotations")]
    RateLimited {
        /// Rotations attempted before giving up.
        rotations: u32,
    },

    /// Transient failures (network, timeout, server error) exhausted the
    /// attempt budget.
    #[error("transient failure after {attempts} attempts: {last}")]
    Transient {
        /// Attempts made before giving up.
        attempts: u32,
        /// Description of the last failure.
        last: String,
    },

    /// The service returned a well-formed, non-retryable application error.
    #[error("request rejected by the service: {0}")]
    Malformed(String),

    /// No usable credential remains; the run cannot make progress.
    #[error("credential pool exhausted")]
    PoolExhausted,

    /// Unexpected internal invariant violation.
    #[error("fatal dispatch error: {0}")]
    Fatal(String),
}

impl DispatchError {
    /// Whether this error aborts the whole run rather than one item.
    pub fn is_job_level(&self) -> bool {
        matches!(self, DispatchError::PoolExhausted | DispatchError::Fatal(_))
    }
}
