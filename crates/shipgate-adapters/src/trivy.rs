//! Scanner adapter over the Trivy CLI's JSON report.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use shipgate_core::{
    ArtifactDigest, Finding, ScanEngine, ScanEngineError, ScanOutput, ScannerInfo, Severity,
};

use crate::command::{run_command, CommandSpec};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrivySettings {
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Reported in SARIF output; not probed from the binary.
    #[serde(default)]
    pub version: Option<String>,
    /// Extra CLI arguments, e.g. `--ignore-unfixed`.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_binary() -> String {
    "trivy".to_string()
}

impl Default for TrivySettings {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            version: None,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TrivyReport {
    #[serde(rename = "SchemaVersion")]
    schema_version: u32,
    #[serde(rename = "Results", default)]
    results: Vec<TrivyResult>,
}

#[derive(Debug, Deserialize)]
struct TrivyResult {
    #[serde(rename = "Target", default)]
    target: String,
    #[serde(rename = "Vulnerabilities", default)]
    vulnerabilities: Option<Vec<TrivyVulnerability>>,
}

#[derive(Debug, Deserialize)]
struct TrivyVulnerability {
    #[serde(rename = "VulnerabilityID")]
    id: String,
    #[serde(rename = "PkgName", default)]
    pkg_name: String,
    #[serde(rename = "InstalledVersion", default)]
    installed_version: String,
    #[serde(rename = "Severity", default)]
    severity: String,
    #[serde(rename = "Title", default)]
    title: Option<String>,
    #[serde(rename = "Description", default)]
    description: Option<String>,
}

/// Parse a Trivy JSON report into findings.
///
/// Trivy's own `UNKNOWN` label maps to [`Severity::Unknown`]. Any other
/// label outside the known set makes the whole report unparseable.
pub fn parse_trivy_report(json: &str) -> Result<Vec<Finding>, ScanEngineError> {
    let report: TrivyReport =
        serde_json::from_str(json).map_err(|e| ScanEngineError::Unparseable(e.to_string()))?;
    if report.schema_version == 0 {
        return Err(ScanEngineError::Unparseable(
            "report has no schema version".to_string(),
        ));
    }

    let mut findings = Vec::new();
    for result in report.results {
        for v in result.vulnerabilities.unwrap_or_default() {
            let component = if v.installed_version.is_empty() {
                format!("{} ({})", v.pkg_name, result.target)
            } else {
                format!("{}@{} ({})", v.pkg_name, v.installed_version, result.target)
            };
            let description = v
                .title
                .filter(|t| !t.is_empty())
                .or(v.description)
                .unwrap_or_default();
            let severity: Severity = v.severity.parse().map_err(|_| {
                ScanEngineError::Unparseable(format!(
                    "{}: unrecognised severity {:?}",
                    v.id, v.severity
                ))
            })?;
            findings.push(Finding::new(
                v.id,
                severity,
                component,
                description,
            ));
        }
    }
    Ok(findings)
}

pub struct TrivyScanner {
    settings: TrivySettings,
}

impl TrivyScanner {
    pub fn new(settings: TrivySettings) -> Self {
        Self { settings }
    }

    fn command(&self, digest: &ArtifactDigest) -> CommandSpec {
        CommandSpec::new(&self.settings.binary)
            .args(["image", "--format", "json", "--quiet"])
            .args(self.settings.extra_args.iter().cloned())
            .arg(digest.as_str())
    }
}

#[async_trait]
impl ScanEngine for TrivyScanner {
    fn info(&self) -> ScannerInfo {
        ScannerInfo::new("trivy", self.settings.version.clone())
    }

    async fn scan(&self, digest: &ArtifactDigest) -> Result<ScanOutput, ScanEngineError> {
        let out = run_command(&self.command(digest))
            .await
            .map_err(|e| ScanEngineError::Failed(e.to_string()))?;
        if !out.success {
            warn!(digest = %digest, exit_code = out.exit_code, "trivy exited unsuccessfully");
            return Err(ScanEngineError::Failed(out.failure_detail(20)));
        }
        let findings = parse_trivy_report(&out.stdout)?;
        info!(digest = %digest, findings = findings.len(), "trivy scan finished");
        Ok(ScanOutput::complete(self.info(), findings))
    }
}
