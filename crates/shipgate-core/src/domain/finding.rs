//! Scanner findings and scan reports.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::digest::ArtifactDigest;

/// Identifier of the synthetic finding emitted when a scan did not complete.
pub const SCAN_INCOMPLETE_ID: &str = "SHIPGATE-SCAN-INCOMPLETE";

/// Finding severity. Variant order is the severity order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Unknown => "UNKNOWN",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown severity '{0}'")]
pub struct ParseSeverityError(pub String);

impl FromStr for Severity {
    type Err = ParseSeverityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UNKNOWN" => Ok(Severity::Unknown),
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            _ => Err(ParseSeverityError(s.to_string())),
        }
    }
}

/// One scanner observation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Finding {
    /// Advisory identifier, e.g. `CVE-2024-1234`.
    pub id: String,
    pub severity: Severity,
    /// Affected package or path inside the artifact.
    pub component: String,
    pub description: String,
}

impl Finding {
    pub fn new(
        id: impl Into<String>,
        severity: Severity,
        component: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            severity,
            component: component.into(),
            description: description.into(),
        }
    }

    /// Synthetic blocking finding standing in for a scan that never finished.
    pub fn scan_incomplete(digest: &ArtifactDigest, reason: &str) -> Self {
        Self {
            id: SCAN_INCOMPLETE_ID.to_string(),
            severity: Severity::Critical,
            component: digest.to_string(),
            description: format!("scan incomplete: {}", reason),
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.id == SCAN_INCOMPLETE_ID
    }
}

/// Sort findings by severity descending, then identifier, then component,
/// and drop exact duplicates.
pub fn sort_findings(findings: &mut Vec<Finding>) {
    findings.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.id.cmp(&b.id))
            .then_with(|| a.component.cmp(&b.component))
    });
    findings.dedup();
}

/// Scanner identity recorded alongside the findings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerInfo {
    pub name: String,
    pub version: Option<String>,
}

impl ScannerInfo {
    pub fn new(name: impl Into<String>, version: Option<String>) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

/// Findings for one artifact plus scan metadata.
///
/// A report with `complete == false` must never be read as "no vulnerabilities".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub artifact: ArtifactDigest,
    pub scanner: ScannerInfo,
    pub scanned_at: DateTime<Utc>,
    /// Whether the scanner reached a terminal success status.
    pub complete: bool,
    /// Why the scan is incomplete (None when complete).
    pub incomplete_reason: Option<String>,
    /// Findings, sorted for deterministic reporting.
    pub findings: Vec<Finding>,
}

impl ScanReport {
    pub fn complete(
        artifact: ArtifactDigest,
        scanner: ScannerInfo,
        scanned_at: DateTime<Utc>,
        mut findings: Vec<Finding>,
    ) -> Self {
        sort_findings(&mut findings);
        Self {
            artifact,
            scanner,
            scanned_at,
            complete: true,
            incomplete_reason: None,
            findings,
        }
    }

    /// A report for a scan that crashed, timed out or never reported a terminal
    /// status. Any partial findings are kept for visibility.
    pub fn incomplete(
        artifact: ArtifactDigest,
        scanner: ScannerInfo,
        scanned_at: DateTime<Utc>,
        reason: impl Into<String>,
        mut partial: Vec<Finding>,
    ) -> Self {
        sort_findings(&mut partial);
        Self {
            artifact,
            scanner,
            scanned_at,
            complete: false,
            incomplete_reason: Some(reason.into()),
            findings: partial,
        }
    }

    /// Count of findings at each severity, highest first.
    pub fn severity_counts(&self) -> Vec<(Severity, usize)> {
        [
            Severity::Critical,
            Severity::High,
            Severity::Medium,
            Severity::Low,
            Severity::Unknown,
        ]
        .into_iter()
        .map(|sev| (sev, self.findings.iter().filter(|f| f.severity == sev).count()))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_order_matches_policy_scale() {
        assert!(Severity::Unknown < Severity::Low);
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn severity_parses_case_insensitively() {
        assert_eq!("high".parse::<Severity>().unwrap(), Severity::High);
        assert_eq!(" Critical ".parse::<Severity>().unwrap(), Severity::Critical);
        assert!("severe".parse::<Severity>().is_err());
    }

    #[test]
    fn severity_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Severity::Medium).unwrap(), "\"MEDIUM\"");
    }

    #[test]
    fn sort_findings_severity_desc_then_id() {
        let mut findings = vec![
            Finding::new("CVE-B", Severity::High, "openssl", ""),
            Finding::new("CVE-A", Severity::Low, "zlib", ""),
            Finding::new("CVE-A", Severity::High, "curl", ""),
            Finding::new("CVE-C", Severity::Critical, "glibc", ""),
            Finding::new("CVE-A", Severity::High, "curl", ""),
        ];
        sort_findings(&mut findings);
        let ids: Vec<_> = findings
            .iter()
            .map(|f| (f.id.as_str(), f.severity))
            .collect();
        assert_eq!(
            ids,
            vec![
                ("CVE-C", Severity::Critical),
                ("CVE-A", Severity::High),
                ("CVE-B", Severity::High),
                ("CVE-A", Severity::Low),
            ]
        );
    }

    #[test]
    fn incomplete_report_carries_reason() {
        let digest = ArtifactDigest::of_bytes(b"img");
        let report = ScanReport::incomplete(
            digest,
            ScannerInfo::new("trivy", None),
            Utc::now(),
            "timed out",
            vec![],
        );
        assert!(!report.complete);
        assert_eq!(report.incomplete_reason.as_deref(), Some("timed out"));
    }

    #[test]
    fn synthetic_finding_is_critical() {
        let digest = ArtifactDigest::of_bytes(b"img");
        let f = Finding::scan_incomplete(&digest, "scanner crashed");
        assert!(f.is_synthetic());
        assert_eq!(f.severity, Severity::Critical);
        assert!(f.description.contains("scanner crashed"));
    }
}
