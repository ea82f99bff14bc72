//! Stage-level error taxonomy.
//!
//! Each pipeline component fails with its own named error. The orchestrator
//! folds fatal ones into an [`AbortCause`]; `ReportingUnavailable` becomes a
//! run warning and a gate FAIL is a normal outcome, not an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::run::{RunStage, TransitionError};

/// Credential trust failure. Fatal, never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("auth denied: {reason}")]
pub struct AuthDenied {
    pub reason: String,
}

impl AuthDenied {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Artifact production failure. Fatal, never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("build failed: {detail}")]
pub struct BuildFailed {
    /// Exit status and tail of the toolchain output.
    pub detail: String,
}

impl BuildFailed {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// The results sink could not be reached. Never fatal to a run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("reporting unavailable: {reason}")]
pub struct ReportingUnavailable {
    pub reason: String,
}

impl ReportingUnavailable {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Publisher failures, surfaced after local retries are exhausted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("push denied: {reason}")]
    PushDenied { reason: String },

    #[error("credential expired at {expired_at}")]
    CredentialExpired { expired_at: DateTime<Utc> },

    #[error("registry unavailable after {attempts} attempt(s): {reason}")]
    RegistryUnavailable { attempts: u32, reason: String },
}

/// Why a run entered `ABORTED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortCause {
    #[error("auth denied: {reason}")]
    AuthDenied { reason: String },

    #[error("build failed: {detail}")]
    BuildFailed { detail: String },

    #[error("push denied: {reason}")]
    PushDenied { reason: String },

    #[error("credential expired: {reason}")]
    CredentialExpired { reason: String },

    #[error("registry unavailable after {attempts} attempt(s): {reason}")]
    RegistryUnavailable { attempts: u32, reason: String },

    #[error("cancelled before {next_stage}")]
    Cancelled { next_stage: RunStage },

    #[error("orchestration error: {reason}")]
    Orchestration { reason: String },
}

impl AbortCause {
    /// The stage the run was trying to reach when it aborted.
    pub fn failed_stage(&self) -> RunStage {
        match self {
            AbortCause::AuthDenied { .. } => RunStage::Credentialed,
            AbortCause::BuildFailed { .. } => RunStage::Built,
            AbortCause::PushDenied { .. }
            | AbortCause::CredentialExpired { .. }
            | AbortCause::RegistryUnavailable { .. } => RunStage::Published,
            AbortCause::Cancelled { next_stage } => *next_stage,
            AbortCause::Orchestration { .. } => RunStage::Aborted,
        }
    }

    /// Short machine-friendly kind, matching the serde tag.
    pub fn kind(&self) -> &'static str {
        match self {
            AbortCause::AuthDenied { .. } => "auth_denied",
            AbortCause::BuildFailed { .. } => "build_failed",
            AbortCause::PushDenied { .. } => "push_denied",
            AbortCause::CredentialExpired { .. } => "credential_expired",
            AbortCause::RegistryUnavailable { .. } => "registry_unavailable",
            AbortCause::Cancelled { .. } => "cancelled",
            AbortCause::Orchestration { .. } => "orchestration",
        }
    }
}

impl From<AuthDenied> for AbortCause {
    fn from(e: AuthDenied) -> Self {
        AbortCause::AuthDenied { reason: e.reason }
    }
}

impl From<BuildFailed> for AbortCause {
    fn from(e: BuildFailed) -> Self {
        AbortCause::BuildFailed { detail: e.detail }
    }
}

impl From<PublishError> for AbortCause {
    fn from(e: PublishError) -> Self {
        match e {
            PublishError::PushDenied { reason } => AbortCause::PushDenied { reason },
            PublishError::CredentialExpired { expired_at } => AbortCause::CredentialExpired {
                reason: format!("lease expired at {} and renewal failed", expired_at),
            },
            PublishError::RegistryUnavailable { attempts, reason } => {
                AbortCause::RegistryUnavailable { attempts, reason }
            }
        }
    }
}

impl From<TransitionError> for AbortCause {
    fn from(e: TransitionError) -> Self {
        AbortCause::Orchestration {
            reason: e.to_string(),
        }
    }
}
