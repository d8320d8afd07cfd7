//! Per-credential rate limiting.
//!
//! [`window`] implements sliding-window call accounting for one credential;
//! [`pool`] owns the full credential set and is the engine's only blocking
//! point (waiting for quota to free up).

pub mod pool;
pub mod window;

pub use pool::{CredentialLease, CredentialPool, CredentialUsage, PoolError, ACQUIRE_MARGIN};
pub use window::{default_windows, RateWindow, RateWindowTracker, WindowUsage};
