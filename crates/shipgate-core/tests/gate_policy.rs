use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use shipgate_core::fakes::{FakeScanner, ManualClock};
use shipgate_core::{
    decide, Artifact, ArtifactDigest, Finding, GateDecision, ScanReport, ScannerInfo, Severity,
    SeverityPolicy, VulnerabilityGate, SCAN_INCOMPLETE_ID,
};

fn digest() -> ArtifactDigest {
    ArtifactDigest::of_bytes(b"image-config")
}

fn complete(findings: Vec<Finding>) -> ScanReport {
    ScanReport::complete(
        digest(),
        ScannerInfo::new("trivy", Some("0.50.0".to_string())),
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        findings,
    )
}

fn finding(id: &str, severity: Severity) -> Finding {
    Finding::new(id, severity, "libfoo@1.0", "")
}

const ALL: [Severity; 5] = [
    Severity::Unknown,
    Severity::Low,
    Severity::Medium,
    Severity::High,
    Severity::Critical,
];

// ---- Scenarios ----

#[test]
fn medium_under_high_minimum_passes() {
    let d = decide(
        &complete(vec![finding("CVE-M", Severity::Medium)]),
        &SeverityPolicy::default().with_minimum(Severity::High),
    );
    assert_eq!(d, GateDecision::Pass);
}

#[test]
fn critical_without_allow_list_fails() {
    let d = decide(
        &complete(vec![finding("CVE-X", Severity::Critical)]),
        &SeverityPolicy::default(),
    );
    assert_eq!(d.blocking_ids(), vec!["CVE-X".to_string()]);
}

#[test]
fn allow_listed_critical_passes() {
    let d = decide(
        &complete(vec![finding("CVE-X", Severity::Critical)]),
        &SeverityPolicy::default().allow("CVE-X"),
    );
    assert!(d.is_pass());
}

#[test]
fn incomplete_report_fails_with_synthetic_finding() {
    let r = ScanReport::incomplete(
        digest(),
        ScannerInfo::new("trivy", None),
        Utc::now(),
        "exit status 2",
        vec![],
    );
    let d = decide(&r, &SeverityPolicy::default());
    assert_eq!(d.blocking_ids(), vec![SCAN_INCOMPLETE_ID.to_string()]);
    assert_eq!(d.blocking()[0].severity, Severity::Critical);
}

// ---- Properties over the severity lattice ----

#[test]
fn any_unallowed_finding_at_or_above_minimum_fails() {
    for minimum in ALL {
        for severity in ALL {
            let d = decide(
                &complete(vec![finding("CVE-1", severity)]),
                &SeverityPolicy::default().with_minimum(minimum),
            );
            assert_eq!(
                d.is_pass(),
                severity < minimum,
                "minimum={minimum} severity={severity}"
            );
        }
    }
}

#[test]
fn allow_list_only_exempts_named_ids() {
    let r = complete(vec![
        finding("CVE-1", Severity::Critical),
        finding("CVE-2", Severity::High),
    ]);
    let d = decide(&r, &SeverityPolicy::default().allow("CVE-1"));
    assert_eq!(d.blocking_ids(), vec!["CVE-2".to_string()]);
}

#[test]
fn incomplete_always_fails_whatever_the_findings() {
    for partial in [vec![], vec![finding("CVE-1", Severity::Low)]] {
        for minimum in ALL {
            let r = ScanReport::incomplete(
                digest(),
                ScannerInfo::new("trivy", None),
                Utc::now(),
                "killed",
                partial.clone(),
            );
            let d = decide(&r, &SeverityPolicy::default().with_minimum(minimum).allow("CVE-1"));
            assert!(!d.is_pass());
            assert!(d.blocking().iter().any(|f| f.is_synthetic()));
        }
    }
}

#[test]
fn blocking_findings_are_deduplicated() {
    let r = complete(vec![
        finding("CVE-1", Severity::High),
        finding("CVE-1", Severity::High),
    ]);
    assert_eq!(decide(&r, &SeverityPolicy::default()).blocking().len(), 1);
}

#[test]
fn policy_digest_is_stable_and_sensitive() {
    let a = SeverityPolicy::default().allow("CVE-1").allow("CVE-2");
    let b = SeverityPolicy::default().allow("CVE-2").allow("CVE-1");
    assert_eq!(a.digest(), b.digest());
    assert_ne!(a.digest(), SeverityPolicy::default().digest());
    assert_eq!(a.digest().len(), 64);
}

#[test]
fn policy_from_json_defaults_to_high() {
    let p: SeverityPolicy = serde_json::from_str(r#"{"allow_list":["CVE-9"]}"#).unwrap();
    assert_eq!(p.minimum_blocking_severity, Severity::High);
    assert!(p.is_allowed("CVE-9"));
}

// ---- Gate component ----

#[tokio::test]
async fn gate_normalises_scanner_output() {
    let scanner = Arc::new(FakeScanner::with_findings(vec![
        finding("CVE-B", Severity::High),
        finding("CVE-A", Severity::Critical),
    ]));
    let gate = VulnerabilityGate::new(
        scanner.clone(),
        Arc::new(ManualClock::fixed()),
        Duration::from_secs(60),
    );
    let artifact = Artifact::new(digest(), 1024, vec![]);
    let (report, decision) = gate.evaluate(&artifact, &SeverityPolicy::default()).await;

    assert!(report.complete);
    assert_eq!(report.artifact, artifact.digest);
    assert_eq!(report.findings[0].id, "CVE-A");
    assert_eq!(decision.blocking_ids(), vec!["CVE-A", "CVE-B"]);
    assert_eq!(scanner.calls(), 1);
}
