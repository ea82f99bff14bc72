//! Gate decisions and the publish approval they unlock.

use serde::{Deserialize, Serialize};

use super::finding::Finding;

/// Outcome of applying a severity policy to a scan report.
///
/// Computed once per run and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "UPPERCASE")]
pub enum GateDecision {
    Pass,
    Fail {
        /// Findings responsible for the failure, severity descending.
        blocking: Vec<Finding>,
    },
}

impl GateDecision {
    pub fn is_pass(&self) -> bool {
        matches!(self, GateDecision::Pass)
    }

    /// Findings that caused FAIL (empty on PASS).
    pub fn blocking(&self) -> &[Finding] {
        match self {
            GateDecision::Pass => &[],
            GateDecision::Fail { blocking } => blocking,
        }
    }

    pub fn blocking_ids(&self) -> Vec<String> {
        self.blocking().iter().map(|f| f.id.clone()).collect()
    }

    /// The publish precondition. Only a passing decision yields an approval.
    pub fn approval(&self) -> Option<PublishApproval> {
        match self {
            GateDecision::Pass => Some(PublishApproval { _private: () }),
            GateDecision::Fail { .. } => None,
        }
    }
}

/// Proof that the gate passed. Required by the publisher.
///
/// Cannot be constructed outside this module, so a publish without a passing
/// decision does not type-check.
#[derive(Debug)]
pub struct PublishApproval {
    _private: (),
}
