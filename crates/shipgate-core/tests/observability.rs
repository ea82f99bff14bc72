//! Observability tests for the shipgate run lifecycle.
//!
//! Events are captured through a JSON `fmt` subscriber writing to an
//! in-memory buffer, so the tests can assert on emitted fields.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shipgate_core::fakes::{FakeScanner, ManualClock};
use shipgate_core::obs::{
    emit_gate_evaluated, emit_publish_retry, emit_report_unavailable, emit_run_finished,
    emit_run_started, emit_stage_transition,
};
use shipgate_core::{
    Artifact, ArtifactDigest, Finding, ReportingUnavailable, RunOutcome, RunSpan, RunStage,
    SecretString, Severity, SeverityPolicy, VulnerabilityGate,
};

#[derive(Clone, Default)]
struct Buffer(Arc<Mutex<Vec<u8>>>);

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Buffer {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

fn json_subscriber(buffer: &Buffer) -> impl tracing::Subscriber + Send + Sync {
    let writer = buffer.clone();
    tracing_subscriber::fmt()
        .json()
        .with_max_level(tracing::Level::TRACE)
        .with_writer(move || writer.clone())
        .finish()
}

fn capture(f: impl FnOnce()) -> String {
    let buffer = Buffer::default();
    tracing::subscriber::with_default(json_subscriber(&buffer), f);
    buffer.contents()
}

#[test]
fn run_started_carries_target() {
    let out = capture(|| emit_run_started("run-123", "registry.example.com/team/app"));
    assert!(out.contains(r#""event":"run.started""#));
    assert!(out.contains("registry.example.com/team/app"));
}

#[test]
fn stage_transition_uses_stage_names() {
    let out = capture(|| emit_stage_transition("run-1", RunStage::Built, RunStage::Scanned));
    assert!(out.contains(r#""from":"BUILT""#));
    assert!(out.contains(r#""to":"SCANNED""#));
}

#[test]
fn gate_and_finish_events() {
    let out = capture(|| {
        emit_gate_evaluated("run-1", true, 2, false);
        emit_run_finished("run-1", RunOutcome::Blocked, RunStage::Blocked, 42);
    });
    assert!(out.contains(r#""blocking":2"#));
    assert!(out.contains(r#""outcome":"blocked""#));
    assert!(out.contains(r#""duration_ms":42"#));
}

#[tokio::test]
async fn completed_gate_evaluation_leaves_logging_to_the_orchestrator() {
    let buffer = Buffer::default();
    let _guard = tracing::subscriber::set_default(json_subscriber(&buffer));

    let scanner = FakeScanner::with_findings(vec![Finding::new(
        "CVE-2024-0001",
        Severity::Critical,
        "openssl@3.0.1",
        "remote code execution",
    )]);
    let gate = VulnerabilityGate::new(
        Arc::new(scanner),
        Arc::new(ManualClock::fixed()),
        Duration::from_secs(5),
    );
    let artifact = Artifact::new(ArtifactDigest::of_bytes(b"img"), 1, Vec::new());
    let (report, decision) = gate.evaluate(&artifact, &SeverityPolicy::default()).await;

    assert!(report.complete);
    assert!(!decision.is_pass());
    assert_eq!(buffer.contents(), "");
}

#[test]
fn outages_and_retries_are_warnings() {
    let out = capture(|| {
        emit_publish_retry(1, 500, "503");
        emit_report_unavailable("run-1", &ReportingUnavailable::new("sink down"));
    });
    assert_eq!(out.matches(r#""level":"WARN""#).count(), 2);
    assert!(out.contains("sink down"));
}

#[test]
fn run_span_tags_nested_events() {
    let out = capture(|| {
        let _span = RunSpan::enter("span-run", "abc123");
        emit_stage_transition("span-run", RunStage::Init, RunStage::Credentialed);
    });
    assert!(out.contains("shipgate.run"));
    assert!(out.contains("abc123"));
}

#[test]
fn secrets_render_redacted() {
    let token = SecretString::new("super-secret-token");
    let out = capture(|| tracing::info!(token = %token, debug = ?token, "credential in scope"));
    assert!(!out.contains("super-secret-token"));
    assert!(out.contains("***"));
}
