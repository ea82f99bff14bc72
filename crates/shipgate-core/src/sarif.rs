//! SARIF 2.1.0 rendering of scan reports.
//!
//! Results viewers key alerts by rule id, so every distinct finding id becomes
//! one rule and every finding one result located at its affected component.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{Finding, ScanReport, Severity};

pub const SARIF_VERSION: &str = "2.1.0";
pub const SARIF_SCHEMA: &str = "https://json.schemastore.org/sarif-2.1.0.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SarifLog {
    #[serde(rename = "$schema")]
    pub schema: String,
    pub version: String,
    pub runs: Vec<SarifRun>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SarifRun {
    pub tool: Tool,
    pub invocations: Vec<Invocation>,
    pub results: Vec<SarifResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub driver: Driver,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Driver {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    pub short_description: Message,
    pub default_configuration: RuleConfiguration,
    pub properties: RuleProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfiguration {
    pub level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleProperties {
    #[serde(rename = "security-severity")]
    pub security_severity: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invocation {
    pub execution_successful: bool,
    pub end_time_utc: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_execution_notifications: Vec<Notification>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub level: String,
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SarifResult {
    pub rule_id: String,
    pub level: String,
    pub message: Message,
    pub locations: Vec<Location>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub physical_location: PhysicalLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhysicalLocation {
    pub artifact_location: ArtifactLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactLocation {
    pub uri: String,
}

/// SARIF result level for a severity.
pub fn level_for(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical | Severity::High => "error",
        Severity::Medium => "warning",
        Severity::Low | Severity::Unknown => "note",
    }
}

/// Numeric `security-severity` used by code-scanning viewers to bucket alerts.
pub fn security_severity(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "9.5",
        Severity::High => "8.0",
        Severity::Medium => "5.5",
        Severity::Low => "2.0",
        Severity::Unknown => "0.0",
    }
}

fn rule_for(finding: &Finding) -> Rule {
    let summary = finding
        .description
        .lines()
        .next()
        .filter(|l| !l.trim().is_empty())
        .unwrap_or(&finding.id)
        .to_string();
    Rule {
        id: finding.id.clone(),
        short_description: Message { text: summary },
        default_configuration: RuleConfiguration {
            level: level_for(finding.severity).to_string(),
        },
        properties: RuleProperties {
            security_severity: security_severity(finding.severity).to_string(),
            tags: vec!["security".to_string(), finding.severity.to_string()],
        },
    }
}

fn result_for(finding: &Finding) -> SarifResult {
    SarifResult {
        rule_id: finding.id.clone(),
        level: level_for(finding.severity).to_string(),
        message: Message {
            text: format!(
                "{} ({}) in {}: {}",
                finding.id, finding.severity, finding.component, finding.description
            ),
        },
        locations: vec![Location {
            physical_location: PhysicalLocation {
                artifact_location: ArtifactLocation {
                    uri: finding.component.clone(),
                },
            },
        }],
    }
}

/// Render `report` as a SARIF log with a single run.
pub fn to_sarif(report: &ScanReport) -> SarifLog {
    // Report findings are sorted severity-first, so the first instance of an
    // id is its most severe one.
    let mut rules: BTreeMap<&str, Rule> = BTreeMap::new();
    for finding in &report.findings {
        rules
            .entry(finding.id.as_str())
            .or_insert_with(|| rule_for(finding));
    }

    let notifications = match (&report.complete, &report.incomplete_reason) {
        (false, reason) => vec![Notification {
            level: "error".to_string(),
            message: Message {
                text: format!(
                    "scan incomplete: {}",
                    reason.as_deref().unwrap_or("no terminal status")
                ),
            },
        }],
        (true, _) => Vec::new(),
    };

    SarifLog {
        schema: SARIF_SCHEMA.to_string(),
        version: SARIF_VERSION.to_string(),
        runs: vec![SarifRun {
            tool: Tool {
                driver: Driver {
                    name: report.scanner.name.clone(),
                    version: report.scanner.version.clone(),
                    rules: rules.into_values().collect(),
                },
            },
            invocations: vec![Invocation {
                execution_successful: report.complete,
                end_time_utc: report.scanned_at.to_rfc3339(),
                tool_execution_notifications: notifications,
            }],
            results: report.findings.iter().map(result_for).collect(),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ArtifactDigest, ScannerInfo};
    use chrono::Utc;

    fn sample_report() -> ScanReport {
        ScanReport::complete(
            ArtifactDigest::of_bytes(b"img"),
            ScannerInfo::new("trivy", Some("0.50.1".into())),
            Utc::now(),
            vec![
                Finding::new("CVE-1", Severity::Critical, "openssl", "Heap overflow\nmore"),
                Finding::new("CVE-1", Severity::Medium, "libssl", "Heap overflow"),
                Finding::new("CVE-2", Severity::Low, "zlib", ""),
            ],
        )
    }

    #[test]
    fn one_rule_per_id_one_result_per_finding() {
        let log = to_sarif(&sample_report());
        let run = &log.runs[0];
        assert_eq!(run.tool.driver.rules.len(), 2);
        assert_eq!(run.results.len(), 3);
        let cve1 = &run.tool.driver.rules[0];
        assert_eq!(cve1.id, "CVE-1");
        assert_eq!(cve1.default_configuration.level, "error");
        assert_eq!(cve1.short_description.text, "Heap overflow");
        // Empty description falls back to the id.
        assert_eq!(run.tool.driver.rules[1].short_description.text, "CVE-2");
    }

    #[test]
    fn json_shape_matches_interchange_format() {
        let value = serde_json::to_value(to_sarif(&sample_report())).unwrap();
        assert_eq!(value["version"], "2.1.0");
        assert!(value["$schema"].as_str().unwrap().contains("sarif"));
        let result = &value["runs"][0]["results"][0];
        assert_eq!(result["ruleId"], "CVE-1");
        assert_eq!(
            result["locations"][0]["physicalLocation"]["artifactLocation"]["uri"],
            "openssl"
        );
        assert_eq!(
            value["runs"][0]["tool"]["driver"]["rules"][0]["properties"]["security-severity"],
            "9.5"
        );
        assert_eq!(value["runs"][0]["invocations"][0]["executionSuccessful"], true);
    }

    #[test]
    fn incomplete_scan_marks_invocation_unsuccessful() {
        let report = ScanReport::incomplete(
            ArtifactDigest::of_bytes(b"img"),
            ScannerInfo::new("trivy", None),
            Utc::now(),
            "timed out",
            vec![],
        );
        let log = to_sarif(&report);
        let inv = &log.runs[0].invocations[0];
        assert!(!inv.execution_successful);
        assert!(inv.tool_execution_notifications[0]
            .message
            .text
            .contains("timed out"));
    }

    #[test]
    fn levels() {
        assert_eq!(level_for(Severity::High), "error");
        assert_eq!(level_for(Severity::Medium), "warning");
        assert_eq!(level_for(Severity::Unknown), "note");
    }
}
