//! Severity policy applied by the vulnerability gate.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::digest::compute_digest;
use super::finding::{Finding, Severity};

/// Minimum severity that blocks publish, plus documented exceptions.
///
/// Supplied at run start and never mutated during the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityPolicy {
    #[serde(default = "default_minimum")]
    pub minimum_blocking_severity: Severity,

    /// Accepted finding identifiers.
    #[serde(default)]
    pub allow_list: BTreeSet<String>,
}

fn default_minimum() -> Severity {
    Severity::High
}

impl Default for SeverityPolicy {
    fn default() -> Self {
        Self {
            minimum_blocking_severity: default_minimum(),
            allow_list: BTreeSet::new(),
        }
    }
}

impl SeverityPolicy {
    pub fn with_minimum(mut self, severity: Severity) -> Self {
        self.minimum_blocking_severity = severity;
        self
    }

    pub fn allow(mut self, id: impl Into<String>) -> Self {
        self.allow_list.insert(id.into());
        self
    }

    pub fn is_allowed(&self, id: &str) -> bool {
        self.allow_list.contains(id)
    }

    /// Whether `finding` blocks publish under this policy.
    pub fn blocks(&self, finding: &Finding) -> bool {
        finding.severity >= self.minimum_blocking_severity && !self.is_allowed(&finding.id)
    }

    /// Stable fingerprint of the policy, recorded in run reports.
    pub fn digest(&self) -> String {
        // Serialising plain strings and an enum cannot fail.
        serde_json::to_value(self)
            .and_then(|v| compute_digest(&v))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_blocks_high_and_above() {
        let policy = SeverityPolicy::default();
        assert_eq!(policy.minimum_blocking_severity, Severity::High);
        assert!(policy.blocks(&Finding::new("CVE-1", Severity::High, "a", "")));
        assert!(policy.blocks(&Finding::new("CVE-2", Severity::Critical, "a", "")));
        assert!(!policy.blocks(&Finding::new("CVE-3", Severity::Medium, "a", "")));
        assert!(!policy.blocks(&Finding::new("CVE-4", Severity::Unknown, "a", "")));
    }

    #[test]
    fn allow_list_exempts_by_identifier() {
        let policy = SeverityPolicy::default().allow("CVE-X");
        assert!(!policy.blocks(&Finding::new("CVE-X", Severity::Critical, "a", "")));
        assert!(policy.blocks(&Finding::new("CVE-Y", Severity::Critical, "a", "")));
    }

    #[test]
    fn deserialize_fills_defaults() {
        let policy: SeverityPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy, SeverityPolicy::default());

        let policy: SeverityPolicy = serde_json::from_str(
            r#"{"minimum_blocking_severity":"MEDIUM","allow_list":["CVE-1"]}"#,
        )
        .unwrap();
        assert_eq!(policy.minimum_blocking_severity, Severity::Medium);
        assert!(policy.is_allowed("CVE-1"));
    }

    #[test]
    fn digest_changes_with_policy() {
        let a = SeverityPolicy::default();
        let b = SeverityPolicy::default().allow("CVE-1");
        assert_eq!(a.digest(), SeverityPolicy::default().digest());
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
    }
}
