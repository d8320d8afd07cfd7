//! Graceful cancellation coordination.
//!
//! A [`ShutdownCoordinator`] is shared across the processor and its workers
//! so a Ctrl+C (or any external cancellation signal) stops new dispatches,
//! abandons in-flight work and triggers one final checkpoint save instead of
//! losing progress.

use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Shared handle to a shutdown coordinator.
pub type SharedShutdown = Arc<ShutdownCoordinator>;

static GLOBAL_SHUTDOWN: OnceCell<SharedShutdown> = OnceCell::new();

/// Register a process-wide shutdown handle for subsystems to discover lazily.
pub fn set_global_shutdown(handle: SharedShutdown) {
    let _ = GLOBAL_SHUTDOWN.set(handle);
}

/// The registered process-wide shutdown handle, if any.
pub fn get_global_shutdown() -> Option<SharedShutdown> {
    GLOBAL_SHUTDOWN.get().cloned()
}

/// Spawn a task that requests shutdown on the first Ctrl+C.
pub fn spawn_ctrl_c_listener(handle: SharedShutdown) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, saving progress before exit");
            handle.request_shutdown();
        }
    });
}

/// Cancellation flag plus wakeup for waiting tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    requested: AtomicBool,
    notify: Notify,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new coordinator wrapped in [`Arc`].
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Request shutdown, waking all waiters. Idempotent.
    pub fn request_shutdown(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is requested; returns immediately if it already
    /// was.
    pub async fn wait_for_shutdown(&self) {
        // Register before checking the flag so a concurrent
        // request_shutdown cannot slip between check and wait.
        let notified = self.notify.notified();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }
}
