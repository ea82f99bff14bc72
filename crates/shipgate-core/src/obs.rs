//! Structured observability hooks for the pipeline run lifecycle.
//!
//! This module provides:
//! - Run-scoped tracing spans via `RunSpan` RAII guard
//! - Emission functions for key lifecycle events: start, stage transition,
//!   gate evaluation, publish retry, reporting outage, finish
//!
//! Events are emitted at `info!` level (filter via `SHIPGATE_LOG`).
//! For JSON output, pass `--json` to the CLI.

use tracing::{info, warn};

use crate::domain::{RunOutcome, RunStage};

/// RAII guard that enters a run-scoped tracing span for the duration of a run.
///
/// # Example
///
/// ```ignore
/// let _span = RunSpan::enter("6f1c...", "abc123");
/// // every event below carries run_id and revision
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    /// Create and enter a span tagged with the run id and source revision.
    pub fn enter(run_id: &str, revision: &str) -> Self {
        Self {
            _span: run_span(run_id, revision).entered(),
        }
    }
}

/// The `shipgate.run` span, unentered. Async code attaches it with
/// `tracing::Instrument` instead of holding a [`RunSpan`] across awaits.
pub fn run_span(run_id: &str, revision: &str) -> tracing::Span {
    tracing::info_span!("shipgate.run", run_id = %run_id, revision = %revision)
}

/// Emit event: run started for a target repository.
pub fn emit_run_started(run_id: &str, target: &str) {
    info!(event = "run.started", run_id = %run_id, target = %target);
}

/// Emit event: state machine edge taken.
pub fn emit_stage_transition(run_id: &str, from: RunStage, to: RunStage) {
    info!(
        event = "run.stage_transition",
        run_id = %run_id,
        from = %from,
        to = %to,
    );
}

/// Emit event: gate decision with blocking count.
pub fn emit_gate_evaluated(run_id: &str, complete: bool, blocking: usize, passed: bool) {
    info!(
        event = "gate.evaluated",
        run_id = %run_id,
        complete = complete,
        blocking = blocking,
        passed = passed,
    );
}

/// Emit event: a publish attempt failed transiently and will be retried.
pub fn emit_publish_retry(attempt: u32, delay_ms: u64, reason: &str) {
    warn!(
        event = "publish.retry",
        attempt = attempt,
        delay_ms = delay_ms,
        reason = %reason,
    );
}

/// Emit event: the results sink could not be reached (warning level).
pub fn emit_report_unavailable(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "report.unavailable", run_id = %run_id, error = %error);
}

/// Emit event: run finished with terminal outcome and duration.
pub fn emit_run_finished(
    run_id: &str,
    outcome: RunOutcome,
    stopped_at: RunStage,
    duration_ms: u64,
) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        outcome = %outcome,
        stopped_at = %stopped_at,
        duration_ms = duration_ms,
    );
}
