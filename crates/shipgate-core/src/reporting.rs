//! Run artifacts for CI: `run_report.json` and a Markdown step summary.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::domain::RunOutcome;
use crate::orchestrator::RunReport;

pub const RUN_REPORT_FILE: &str = "run_report.json";
pub const RUN_SUMMARY_FILE: &str = "run_summary.md";
pub const SCHEMA_VERSION: &str = "1.0";

/// Envelope written to `run_report.json`.
#[derive(Debug, Serialize)]
pub struct RunReportArtifact<'a> {
    pub schema_version: &'static str,
    pub generated_at: DateTime<Utc>,
    pub blocking_ids: Vec<String>,
    #[serde(flatten)]
    pub report: &'a RunReport,
}

impl<'a> RunReportArtifact<'a> {
    pub fn new(report: &'a RunReport, generated_at: DateTime<Utc>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            generated_at,
            blocking_ids: report.blocking_ids(),
            report,
        }
    }
}

/// Paths of the files written by [`write_run_artifacts`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunArtifactPaths {
    pub report_json: PathBuf,
    pub summary_md: PathBuf,
}

/// Write run_report.json in pretty JSON format.
pub fn write_run_report_json(path: &Path, artifact: &RunReportArtifact<'_>) -> Result<()> {
    let content = serde_json::to_string_pretty(artifact).context("serialize run report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Render the Markdown summary for a CI step summary or PR comment.
pub fn render_run_summary_md(report: &RunReport) -> String {
    let mut out = String::new();
    let badge = match report.outcome {
        RunOutcome::Success => "✅ success",
        RunOutcome::Blocked => "⛔ blocked",
        RunOutcome::Aborted => "❌ aborted",
    };
    out.push_str(&format!("# shipgate run `{}`\n\n", report.run.run_id));
    out.push_str(&format!("- outcome: **{}**\n", badge));
    out.push_str(&format!("- stopped at: `{}`\n", report.stopped_at));
    out.push_str(&format!("- reason: {}\n", report.reason));
    out.push_str(&format!("- revision: `{}`\n", report.run.source_revision));
    out.push_str(&format!("- target: `{}`\n", report.run.target));
    if let Some(artifact) = &report.artifact {
        out.push_str(&format!("- artifact: `{}`\n", artifact.digest));
    }
    out.push_str(&format!("- policy digest: `{}`\n\n", short(&report.policy_digest)));

    if let Some(scan) = &report.scan {
        out.push_str("## Scan\n");
        out.push_str(&format!(
            "- scanner: {}{}\n- complete: {}\n",
            scan.scanner.name,
            scan.scanner
                .version
                .as_deref()
                .map(|v| format!(" {}", v))
                .unwrap_or_default(),
            scan.complete
        ));
        if let Some(reason) = &scan.incomplete_reason {
            out.push_str(&format!("- incomplete: {}\n", reason));
        }
        out.push_str("\n| severity | count |\n|---|---|\n");
        for (severity, count) in scan.severity_counts() {
            out.push_str(&format!("| {} | {} |\n", severity, count));
        }
        out.push('\n');
    }

    let blocking = report.blocking_findings();
    if !blocking.is_empty() {
        out.push_str("## Blocking findings\n");
        out.push_str("| id | severity | component |\n|---|---|---|\n");
        for f in blocking {
            out.push_str(&format!("| {} | {} | `{}` |\n", f.id, f.severity, f.component));
        }
        out.push('\n');
    }

    if let Some(receipt) = &report.publish_receipt {
        out.push_str("## Publish\n");
        out.push_str(&format!(
            "- image: `{}`\n- tags: {}\n- attempts: {}\n- already present: {}\n\n",
            receipt.image_ref,
            receipt.tags.join(", "),
            receipt.attempts,
            receipt.already_present
        ));
    }

    if !report.warnings.is_empty() {
        out.push_str("## Warnings\n");
        for w in &report.warnings {
            out.push_str(&format!("- {}\n", w));
        }
    }
    out
}

fn short(digest: &str) -> &str {
    let hex = digest.strip_prefix("sha256:").unwrap_or(digest);
    hex.get(..12).unwrap_or(hex)
}

/// Write run_summary.md.
pub fn write_run_summary_md(path: &Path, report: &RunReport) -> Result<()> {
    let md = render_run_summary_md(report);
    std::fs::write(path, md).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Write both artifacts into `dir`, creating it if needed.
pub fn write_run_artifacts(
    dir: &Path,
    report: &RunReport,
    generated_at: DateTime<Utc>,
) -> Result<RunArtifactPaths> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {:?}", dir))?;
    let paths = RunArtifactPaths {
        report_json: dir.join(RUN_REPORT_FILE),
        summary_md: dir.join(RUN_SUMMARY_FILE),
    };
    write_run_report_json(&paths.report_json, &RunReportArtifact::new(report, generated_at))?;
    write_run_summary_md(&paths.summary_md, report)?;
    Ok(paths)
}
