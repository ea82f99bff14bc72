//! Pipeline orchestrator: drives one run through the state machine.
//!
//! Stages execute strictly in order. After SCANNED the run splits into two
//! independent continuations: the findings reporter always runs, and the
//! publish dispatch runs only with a [`PublishApproval`]. Every stage failure
//! is folded into the returned [`RunReport`]; `run` itself never fails.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn, Instrument};

use crate::broker::{CredentialBroker, CredentialIssuer, TrustPolicy};
use crate::builder::{build_artifact, ArtifactBuilder, BuildRequest};
use crate::cancel::CancelSignal;
use crate::clock::Clock;
use crate::config::PipelineSettings;
use crate::domain::{
    AbortCause, Artifact, CredentialLease, Finding, GateDecision, IdentityAssertion,
    PipelineRun, PublishApproval, PublishError, RegistryScope, RunOutcome, RunStage,
    ScanReport, SeverityPolicy,
};
use crate::gate::{ScanEngine, VulnerabilityGate};
use crate::metrics::METRICS;
use crate::obs::{
    emit_gate_evaluated, emit_report_unavailable, emit_run_finished, emit_run_started,
    emit_stage_transition, run_span,
};
use crate::publisher::{PublishReceipt, Publisher, Registry};
use crate::reporter::{FindingsReporter, ReportReceipt, ReportSink};

/// Everything one run needs from its caller.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub source_revision: String,
    pub build_context: PathBuf,
    pub tags: Vec<String>,
    pub target: RegistryScope,
    pub region: Option<String>,
    pub assertion: IdentityAssertion,
    /// Ceiling on the credential lease lifetime.
    pub max_lifetime: Duration,
    pub policy: SeverityPolicy,
}

/// Terminal report of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run: PipelineRun,
    pub outcome: RunOutcome,
    /// Last stage the run reached before DONE or ABORTED.
    pub stopped_at: RunStage,
    /// Human-readable explanation of the outcome.
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort: Option<AbortCause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan: Option<ScanReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<GateDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_receipt: Option<ReportReceipt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_receipt: Option<PublishReceipt>,
    /// Non-fatal problems, e.g. an unreachable results sink.
    pub warnings: Vec<String>,
    pub policy_digest: String,
    pub duration_ms: u64,
}

impl RunReport {
    /// Findings responsible for a BLOCKED outcome.
    pub fn blocking_findings(&self) -> &[Finding] {
        match &self.decision {
            Some(decision) => decision.blocking(),
            None => &[],
        }
    }

    pub fn blocking_ids(&self) -> Vec<String> {
        self.blocking_findings().iter().map(|f| f.id.clone()).collect()
    }

    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }
}

/// The five pipeline components, already configured.
pub struct PipelineStages {
    pub broker: CredentialBroker,
    pub builder: Arc<dyn ArtifactBuilder>,
    pub gate: VulnerabilityGate,
    pub reporter: FindingsReporter,
    pub publisher: Publisher,
}

/// External collaborators, before they are wrapped into stages.
pub struct Collaborators {
    pub issuer: Arc<dyn CredentialIssuer>,
    pub builder: Arc<dyn ArtifactBuilder>,
    pub scanner: Arc<dyn ScanEngine>,
    pub sink: Arc<dyn ReportSink>,
    pub registry: Arc<dyn Registry>,
}

pub struct PipelineOrchestrator {
    stages: PipelineStages,
    clock: Arc<dyn Clock>,
    build_timeout: Duration,
}

/// Mutable state accumulated while a run is in flight.
struct RunContext {
    run: PipelineRun,
    artifact: Option<Artifact>,
    scan: Option<ScanReport>,
    decision: Option<GateDecision>,
    report_receipt: Option<ReportReceipt>,
    publish_receipt: Option<PublishReceipt>,
    warnings: Vec<String>,
}

impl PipelineOrchestrator {
    pub fn new(stages: PipelineStages, clock: Arc<dyn Clock>, build_timeout: Duration) -> Self {
        Self {
            stages,
            clock,
            build_timeout,
        }
    }

    /// Wire collaborators into stages using `settings`.
    pub fn from_collaborators(
        collaborators: Collaborators,
        trust: TrustPolicy,
        clock: Arc<dyn Clock>,
        settings: PipelineSettings,
    ) -> Self {
        let timeouts = settings.timeouts;
        let stages = PipelineStages {
            broker: CredentialBroker::new(
                trust,
                collaborators.issuer,
                clock.clone(),
                timeouts.credential(),
            ),
            builder: collaborators.builder,
            gate: VulnerabilityGate::new(collaborators.scanner, clock.clone(), timeouts.scan()),
            reporter: FindingsReporter::new(collaborators.sink, clock.clone(), timeouts.report()),
            publisher: Publisher::new(
                collaborators.registry,
                clock.clone(),
                settings.retry,
                timeouts.publish(),
            ),
        };
        Self::new(stages, clock, timeouts.build())
    }

    /// Execute one run to a terminal state.
    pub async fn run(&self, request: RunRequest, cancel: &CancelSignal) -> RunReport {
        let started = Instant::now();
        let run = PipelineRun::new(
            request.source_revision.clone(),
            request.target.clone(),
            request.region.clone(),
            self.clock.now(),
        );
        let span = run_span(&run.run_id.to_string(), &request.source_revision);

        async move {
            METRICS.inc_runs_started();
            emit_run_started(&run.run_id.to_string(), &request.target.image_ref());

            let mut ctx = RunContext {
                run,
                artifact: None,
                scan: None,
                decision: None,
                report_receipt: None,
                publish_receipt: None,
                warnings: Vec::new(),
            };

            let result = self.drive(&mut ctx, &request, cancel).await;
            self.finish(ctx, &request, result, started)
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        ctx: &mut RunContext,
        request: &RunRequest,
        cancel: &CancelSignal,
    ) -> Result<(), AbortCause> {
        checkpoint(cancel, RunStage::Credentialed)?;
        let lease = self
            .stages
            .broker
            .acquire(&request.assertion, &request.target, request.max_lifetime)
            .await?;
        self.advance(ctx, RunStage::Credentialed)?;

        checkpoint(cancel, RunStage::Built)?;
        let build = BuildRequest {
            source_ref: request.source_revision.clone(),
            context: request.build_context.clone(),
            tags: request.tags.clone(),
        };
        let artifact =
            build_artifact(self.stages.builder.as_ref(), &build, self.build_timeout).await?;
        ctx.artifact = Some(artifact.clone());
        self.advance(ctx, RunStage::Built)?;

        checkpoint(cancel, RunStage::Scanned)?;
        let (scan, decision) = self.stages.gate.evaluate(&artifact, &request.policy).await;
        emit_gate_evaluated(
            &ctx.run.run_id.to_string(),
            scan.complete,
            decision.blocking().len(),
            decision.is_pass(),
        );
        let approval = decision.approval();
        ctx.scan = Some(scan);
        ctx.decision = Some(decision);
        self.advance(ctx, RunStage::Scanned)?;

        self.report_findings(ctx).await;

        match approval {
            Some(approval) => {
                checkpoint(cancel, RunStage::Published)?;
                let receipt = self
                    .publish_with_renewal(&artifact, &approval, lease, request)
                    .await?;
                ctx.publish_receipt = Some(receipt);
                self.advance(ctx, RunStage::Published)
            }
            None => {
                drop(lease);
                checkpoint(cancel, RunStage::Blocked)?;
                self.advance(ctx, RunStage::Blocked)
            }
        }
    }

    /// Best effort: an unreachable sink becomes a warning.
    async fn report_findings(&self, ctx: &mut RunContext) {
        let Some(scan) = &ctx.scan else {
            return;
        };
        match self.stages.reporter.publish(scan).await {
            Ok(receipt) => ctx.report_receipt = Some(receipt),
            Err(e) => {
                emit_report_unavailable(&ctx.run.run_id.to_string(), &e);
                METRICS.inc_reporting_failures();
                ctx.warnings.push(e.to_string());
            }
        }
    }

    /// Publish, re-acquiring the lease once if it expired.
    async fn publish_with_renewal(
        &self,
        artifact: &Artifact,
        approval: &PublishApproval,
        lease: CredentialLease,
        request: &RunRequest,
    ) -> Result<PublishReceipt, AbortCause> {
        let publisher = &self.stages.publisher;
        match publisher.publish(artifact, approval, &lease).await {
            Err(PublishError::CredentialExpired { expired_at }) => {
                drop(lease);
                info!(expired_at = %expired_at, "credential lease expired, re-acquiring");
                let fresh = self
                    .stages
                    .broker
                    .acquire(&request.assertion, &request.target, request.max_lifetime)
                    .await
                    .map_err(|e| AbortCause::CredentialExpired {
                        reason: format!(
                            "lease expired at {} and renewal was denied: {}",
                            expired_at, e.reason
                        ),
                    })?;
                Ok(publisher.publish(artifact, approval, &fresh).await?)
            }
            other => Ok(other?),
        }
    }

    fn advance(&self, ctx: &mut RunContext, to: RunStage) -> Result<(), AbortCause> {
        let from = ctx.run.stage();
        ctx.run.advance(to, self.clock.now())?;
        emit_stage_transition(&ctx.run.run_id.to_string(), from, to);
        Ok(())
    }

    fn finish(
        &self,
        mut ctx: RunContext,
        request: &RunRequest,
        result: Result<(), AbortCause>,
        started: Instant,
    ) -> RunReport {
        let now = self.clock.now();
        let stopped_at = ctx.run.stage();
        let abort = match result {
            Ok(()) => ctx.run.complete(now).err().map(AbortCause::from),
            Err(cause) => Some(cause),
        };
        if abort.is_some() && !ctx.run.stage().is_terminal() {
            ctx.run.abort(now).ok();
        }
        let outcome = ctx.run.outcome().unwrap_or(RunOutcome::Aborted);

        let reason = match (&abort, &ctx.decision, &ctx.publish_receipt) {
            (Some(cause), _, _) => format!(
                "aborted at {} while moving to {}: {}",
                stopped_at,
                cause.failed_stage(),
                cause
            ),
            (None, Some(decision), _) if !decision.is_pass() => {
                blocked_reason(decision, &request.policy)
            }
            (None, _, Some(receipt)) if receipt.already_present => {
                format!("published {} (digest already present)", receipt.image_ref)
            }
            (None, _, Some(receipt)) => format!("published {}", receipt.image_ref),
            (None, _, None) => format!("finished at {}", stopped_at),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        METRICS.record_outcome(outcome);
        emit_run_finished(&ctx.run.run_id.to_string(), outcome, stopped_at, duration_ms);
        if outcome.is_failure() {
            warn!(outcome = %outcome, reason = %reason, "run failed");
        }

        RunReport {
            run: ctx.run,
            outcome,
            stopped_at,
            reason,
            abort,
            artifact: ctx.artifact,
            scan: ctx.scan,
            decision: ctx.decision,
            report_receipt: ctx.report_receipt,
            publish_receipt: ctx.publish_receipt,
            warnings: ctx.warnings,
            policy_digest: request.policy.digest(),
            duration_ms,
        }
    }
}

fn checkpoint(cancel: &CancelSignal, next_stage: RunStage) -> Result<(), AbortCause> {
    if cancel.is_cancelled() {
        warn!(next_stage = %next_stage, "cancellation observed at stage boundary");
        return Err(AbortCause::Cancelled { next_stage });
    }
    Ok(())
}

fn blocked_reason(decision: &GateDecision, policy: &SeverityPolicy) -> String {
    let ids = decision.blocking_ids();
    format!(
        "blocked by policy (minimum severity {}): {} finding(s): {}",
        policy.minimum_blocking_severity,
        ids.len(),
        ids.join(", ")
    )
}
