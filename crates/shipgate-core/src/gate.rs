//! Vulnerability gate.
//!
//! Runs the external scan engine against an artifact, normalises its output
//! into a [`ScanReport`], and applies a [`SeverityPolicy`] to produce a
//! [`GateDecision`]. Fail-closed: a scan that crashed, timed out or never
//! reported a terminal status is a FAIL carrying a synthetic finding.
//!
//! The gate always completes. FAIL is a normal outcome, not an error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::clock::Clock;
use crate::domain::finding::sort_findings;
use crate::domain::{
    Artifact, ArtifactDigest, Finding, GateDecision, ScanReport, ScannerInfo, SeverityPolicy,
};

/// Structured output of one scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOutput {
    pub scanner: ScannerInfo,
    /// Whether the scanner reached a terminal success status.
    pub complete: bool,
    pub incomplete_reason: Option<String>,
    pub findings: Vec<Finding>,
}

impl ScanOutput {
    pub fn complete(scanner: ScannerInfo, findings: Vec<Finding>) -> Self {
        Self {
            scanner,
            complete: true,
            incomplete_reason: None,
            findings,
        }
    }
}

/// Scan engine failures. All of them make the report incomplete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanEngineError {
    #[error("scanner failed: {0}")]
    Failed(String),

    #[error("scanner output unparseable: {0}")]
    Unparseable(String),
}

/// External vulnerability scanner.
#[async_trait]
pub trait ScanEngine: Send + Sync {
    /// Scanner identity, used when a scan yields no output at all.
    fn info(&self) -> ScannerInfo;

    async fn scan(&self, digest: &ArtifactDigest) -> Result<ScanOutput, ScanEngineError>;
}

/// Apply `policy` to `report`.
///
/// Pure function of its inputs. Findings are evaluated as a set; the blocking
/// list is sorted by severity descending, then identifier.
pub fn decide(report: &ScanReport, policy: &SeverityPolicy) -> GateDecision {
    let mut blocking: Vec<Finding> = report
        .findings
        .iter()
        .filter(|f| policy.blocks(f))
        .cloned()
        .collect();

    if !report.complete {
        let reason = report
            .incomplete_reason
            .as_deref()
            .unwrap_or("scanner produced no terminal status");
        blocking.push(Finding::scan_incomplete(&report.artifact, reason));
    }

    if blocking.is_empty() {
        GateDecision::Pass
    } else {
        sort_findings(&mut blocking);
        GateDecision::Fail { blocking }
    }
}

/// Scan-and-decide stage.
pub struct VulnerabilityGate {
    engine: Arc<dyn ScanEngine>,
    clock: Arc<dyn Clock>,
    scan_timeout: Duration,
}

impl VulnerabilityGate {
    pub fn new(engine: Arc<dyn ScanEngine>, clock: Arc<dyn Clock>, scan_timeout: Duration) -> Self {
        Self {
            engine,
            clock,
            scan_timeout,
        }
    }

    /// Scan `artifact` and decide whether it may be published.
    pub async fn evaluate(
        &self,
        artifact: &Artifact,
        policy: &SeverityPolicy,
    ) -> (ScanReport, GateDecision) {
        let report = self.scan(&artifact.digest).await;
        let decision = decide(&report, policy);
        (report, decision)
    }

    async fn scan(&self, digest: &ArtifactDigest) -> ScanReport {
        let outcome = tokio::time::timeout(self.scan_timeout, self.engine.scan(digest)).await;
        let scanned_at = self.clock.now();
        match outcome {
            Ok(Ok(output)) if output.complete => {
                ScanReport::complete(digest.clone(), output.scanner, scanned_at, output.findings)
            }
            Ok(Ok(output)) => {
                let reason = output
                    .incomplete_reason
                    .unwrap_or_else(|| "scanner reported incomplete results".to_string());
                warn!(digest = %digest, reason = %reason, "scan incomplete");
                ScanReport::incomplete(
                    digest.clone(),
                    output.scanner,
                    scanned_at,
                    reason,
                    output.findings,
                )
            }
            Ok(Err(e)) => {
                warn!(digest = %digest, error = %e, "scan engine failed");
                ScanReport::incomplete(
                    digest.clone(),
                    self.engine.info(),
                    scanned_at,
                    e.to_string(),
                    Vec::new(),
                )
            }
            Err(_) => {
                let reason = format!("scan timed out after {}s", self.scan_timeout.as_secs());
                warn!(digest = %digest, reason = %reason, "scan incomplete");
                ScanReport::incomplete(
                    digest.clone(),
                    self.engine.info(),
                    scanned_at,
                    reason,
                    Vec::new(),
                )
            }
        }
    }
}
