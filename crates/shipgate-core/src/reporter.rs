//! Findings reporter: submits every scan report to a results sink as SARIF,
//! whatever the gate decided.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::clock::Clock;
use crate::domain::{ReportingUnavailable, ScanReport};
use crate::sarif::{to_sarif, SarifLog};

/// Failures of a results sink.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("sink rejected report: {0}")]
    Rejected(String),
}

/// Destination for SARIF logs (code-scanning API, file on disk, ...).
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Human-readable sink name for receipts and logs.
    fn name(&self) -> String;

    /// Submit the log. Returns a sink-specific reference (upload id, path).
    async fn submit(&self, log: &SarifLog) -> Result<Option<String>, SinkError>;
}

/// Acknowledgement of a submitted report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportReceipt {
    pub sink: String,
    pub reference: Option<String>,
    pub results: usize,
    pub submitted_at: DateTime<Utc>,
}

pub struct FindingsReporter {
    sink: Arc<dyn ReportSink>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl FindingsReporter {
    pub fn new(sink: Arc<dyn ReportSink>, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            sink,
            clock,
            timeout,
        }
    }

    /// Serialise `report` to SARIF and hand it to the sink.
    pub async fn publish(
        &self,
        report: &ScanReport,
    ) -> Result<ReportReceipt, ReportingUnavailable> {
        let log = to_sarif(report);
        let reference = tokio::time::timeout(self.timeout, self.sink.submit(&log))
            .await
            .map_err(|_| {
                ReportingUnavailable::new(format!(
                    "{} did not respond within {}s",
                    self.sink.name(),
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| ReportingUnavailable::new(format!("{}: {}", self.sink.name(), e)))?;

        let receipt = ReportReceipt {
            sink: self.sink.name(),
            reference,
            results: report.findings.len(),
            submitted_at: self.clock.now(),
        };
        info!(sink = %receipt.sink, results = receipt.results, "findings reported");
        Ok(receipt)
    }
}
