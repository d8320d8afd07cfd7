//! Sliding-window call accounting for a single credential.
//!
//! A credential holds one independent timestamp log per configured
//! [`RateWindow`]. Every read prunes timestamps that have aged out of the
//! window first, so the counters stay correct as time advances.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// A (duration, call limit) pair describing one rate-limit window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    /// Length of the trailing window.
    pub duration: Duration,
    /// Maximum number of calls allowed inside the window.
    pub limit: usize,
}

impl RateWindow {
    /// Create a new rate window.
    pub const fn new(duration: Duration, limit: usize) -> Self {
        Self { duration, limit }
    }
}

/// The window set enforced by the remote service observed in production:
/// 15/second, 200/minute, 1600/hour and 8000/day per credential.
pub fn default_windows() -> Vec<RateWindow> {
    vec![
        RateWindow::new(Duration::from_secs(1), 15),
        RateWindow::new(Duration::from_secs(60), 200),
        RateWindow::new(Duration::from_secs(3600), 1600),
        RateWindow::new(Duration::from_secs(86_400), 8000),
    ]
}

/// Current consumption of one window, for operator-facing stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUsage {
    /// The window being reported.
    pub window: RateWindow,
    /// Calls currently inside the window.
    pub used: usize,
}

/// Timestamp log for one window.
#[derive(Debug, Clone)]
struct WindowLog {
    window: RateWindow,
    calls: VecDeque<Instant>,
}

impl WindowLog {
    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.calls.front() {
            if now.duration_since(*front) >= self.window.duration {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }

    fn saturated(&self) -> bool {
        self.calls.len() >= self.window.limit
    }
}

/// Tracks timestamped calls for one credential across several fixed windows
/// and answers "can I call now?" / "when can I call?".
///
/// All operations take an explicit `now` so tests can drive a simulated
/// clock; the suffix-less variants use [`Instant::now`].
#[derive(Debug, Clone)]
pub struct RateWindowTracker {
    logs: Vec<WindowLog>,
}

impl RateWindowTracker {
    /// Create a tracker for the given window set.
    pub fn new(windows: &[RateWindow]) -> Self {
        Self {
            logs: windows
                .iter()
                .map(|w| WindowLog {
                    window: *w,
                    calls: VecDeque::new(),
                })
                .collect(),
        }
    }

    /// Append `now` to every window's timestamp log.
    pub fn record_call_at(&mut self, now: Instant) {
        for log in &mut self.logs {
            log.calls.push_back(now);
        }
    }

    /// Record a call at the current time.
    pub fn record_call(&mut self) {
        self.record_call_at(Instant::now());
    }

    /// Whether every window has remaining quota at `now`.
    ///
    /// A window with zero recorded calls is never saturated.
    pub fn can_call_at(&mut self, now: Instant) -> bool {
        self.prune(now);
        self.logs.iter().all(|log| !log.saturated())
    }

    /// Whether every window has remaining quota right now.
    pub fn can_call(&mut self) -> bool {
        self.can_call_at(Instant::now())
    }

    /// Time until every saturated window frees a slot, measured at `now`.
    ///
    /// For each window at its limit this is the time until its oldest
    /// timestamp ages out; the result is the maximum across saturated
    /// windows (the binding constraint), or zero if none is saturated.
    pub fn time_until_available_at(&mut self, now: Instant) -> Duration {
        self.prune(now);
        self.logs
            .iter()
            .filter(|log| log.saturated())
            .filter_map(|log| {
                let oldest = log.calls.front()?;
                Some(log.window.duration - now.duration_since(*oldest))
            })
            .max()
            .unwrap_or(Duration::ZERO)
    }

    /// Time until every saturated window frees a slot, measured now.
    pub fn time_until_available(&mut self) -> Duration {
        self.time_until_available_at(Instant::now())
    }

    /// Per-window consumption at `now`.
    pub fn usage_at(&mut self, now: Instant) -> Vec<WindowUsage> {
        self.prune(now);
        self.logs
            .iter()
            .map(|log| WindowUsage {
                window: log.window,
                used: log.calls.len(),
            })
            .collect()
    }

    fn prune(&mut self, now: Instant) {
        for log in &mut self.logs {
            log.prune(now);
        }
    }
}
