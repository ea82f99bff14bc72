//! Pipeline settings shared by every run of one orchestrator.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Deadline for each external call, in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageTimeouts {
    #[serde(default = "default_credential_secs")]
    pub credential_secs: u64,
    #[serde(default = "default_build_secs")]
    pub build_secs: u64,
    #[serde(default = "default_scan_secs")]
    pub scan_secs: u64,
    /// Per push attempt.
    #[serde(default = "default_publish_secs")]
    pub publish_secs: u64,
    #[serde(default = "default_report_secs")]
    pub report_secs: u64,
}

fn default_credential_secs() -> u64 {
    30
}

fn default_build_secs() -> u64 {
    1800
}

fn default_scan_secs() -> u64 {
    600
}

fn default_publish_secs() -> u64 {
    600
}

fn default_report_secs() -> u64 {
    60
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            credential_secs: default_credential_secs(),
            build_secs: default_build_secs(),
            scan_secs: default_scan_secs(),
            publish_secs: default_publish_secs(),
            report_secs: default_report_secs(),
        }
    }
}

impl StageTimeouts {
    pub fn credential(&self) -> Duration {
        Duration::from_secs(self.credential_secs)
    }

    pub fn build(&self) -> Duration {
        Duration::from_secs(self.build_secs)
    }

    pub fn scan(&self) -> Duration {
        Duration::from_secs(self.scan_secs)
    }

    pub fn publish(&self) -> Duration {
        Duration::from_secs(self.publish_secs)
    }

    pub fn report(&self) -> Duration {
        Duration::from_secs(self.report_secs)
    }
}

/// Timeouts and retry behaviour for the orchestrator.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineSettings {
    #[serde(default)]
    pub timeouts: StageTimeouts,
    #[serde(default)]
    pub retry: RetryPolicy,
}
