//! Global atomic counters for pipeline observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at process exit).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::RunOutcome;

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Process-wide run counters.
pub struct Metrics {
    runs_started: AtomicU64,
    runs_succeeded: AtomicU64,
    runs_blocked: AtomicU64,
    runs_aborted: AtomicU64,
    publish_retries: AtomicU64,
    reporting_failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            runs_started: AtomicU64::new(0),
            runs_succeeded: AtomicU64::new(0),
            runs_blocked: AtomicU64::new(0),
            runs_aborted: AtomicU64::new(0),
            publish_retries: AtomicU64::new(0),
            reporting_failures: AtomicU64::new(0),
        }
    }

    pub fn inc_runs_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_started", "counter incremented");
    }

    /// Count a finished run under its terminal outcome.
    pub fn record_outcome(&self, outcome: RunOutcome) {
        let counter = match outcome {
            RunOutcome::Success => &self.runs_succeeded,
            RunOutcome::Blocked => &self.runs_blocked,
            RunOutcome::Aborted => &self.runs_aborted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_finished", outcome = %outcome, "counter incremented");
    }

    pub fn inc_publish_retries(&self) {
        self.publish_retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "publish_retries", "counter incremented");
    }

    pub fn inc_reporting_failures(&self) {
        self.reporting_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "reporting_failures", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            runs_started = self.runs_started(),
            runs_succeeded = self.runs_succeeded(),
            runs_blocked = self.runs_blocked(),
            runs_aborted = self.runs_aborted(),
            publish_retries = self.publish_retries(),
            reporting_failures = self.reporting_failures(),
        );
    }

    pub fn runs_started(&self) -> u64 {
        self.runs_started.load(Ordering::Relaxed)
    }

    pub fn runs_succeeded(&self) -> u64 {
        self.runs_succeeded.load(Ordering::Relaxed)
    }

    pub fn runs_blocked(&self) -> u64 {
        self.runs_blocked.load(Ordering::Relaxed)
    }

    pub fn runs_aborted(&self) -> u64 {
        self.runs_aborted.load(Ordering::Relaxed)
    }

    pub fn publish_retries(&self) -> u64 {
        self.publish_retries.load(Ordering::Relaxed)
    }

    pub fn reporting_failures(&self) -> u64 {
        self.reporting_failures.load(Ordering::Relaxed)
    }
}
