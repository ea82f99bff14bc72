//! Credential broker: trades a caller identity assertion for a time-boxed
//! registry credential lease.
//!
//! The broker checks the assertion against a [`TrustPolicy`] before any
//! upstream call, forwards the exchange to a [`CredentialIssuer`], and clamps
//! the issued expiry to the requested lifetime ceiling. Every failure is
//! [`AuthDenied`]; none are retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::domain::{AuthDenied, CredentialLease, IdentityAssertion, RegistryScope, SecretString};

// ---------------------------------------------------------------------------
// Upstream issuer
// ---------------------------------------------------------------------------

/// Request forwarded to the upstream credential-issuing service.
#[derive(Debug)]
pub struct ExchangeRequest<'a> {
    pub assertion: &'a SecretString,
    pub scope: &'a RegistryScope,
    pub max_lifetime: Duration,
}

/// Credential returned by the upstream issuer.
#[derive(Debug, Clone, Deserialize)]
pub struct IssuedCredential {
    pub access_token: SecretString,
    pub expires_at: DateTime<Utc>,
}

/// Failures of the upstream exchange.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IssuerError {
    #[error("issuer rejected the assertion: {0}")]
    Rejected(String),

    #[error("issuer unavailable: {0}")]
    Unavailable(String),
}

/// STS-style service that issues short-lived credentials for a signed assertion.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn exchange(&self, request: ExchangeRequest<'_>) -> Result<IssuedCredential, IssuerError>;
}

// ---------------------------------------------------------------------------
// Trust policy
// ---------------------------------------------------------------------------

/// Glob over assertion subjects. `*` matches any run of characters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubjectPattern {
    glob: String,
    regex: Regex,
}

impl SubjectPattern {
    pub fn new(glob: &str) -> Result<Self, regex::Error> {
        let body = glob
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = Regex::new(&format!("^{}$", body))?;
        Ok(Self {
            glob: glob.to_string(),
            regex,
        })
    }

    pub fn matches(&self, subject: &str) -> bool {
        self.regex.is_match(subject)
    }

    pub fn as_str(&self) -> &str {
        &self.glob
    }
}

impl TryFrom<String> for SubjectPattern {
    type Error = regex::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(&s)
    }
}

impl From<SubjectPattern> for String {
    fn from(p: SubjectPattern) -> Self {
        p.glob
    }
}

/// One allowed (issuer, audience, subject) pattern for one registry scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustBinding {
    pub scope: RegistryScope,
    pub issuer: String,
    pub audience: String,
    pub subject: SubjectPattern,
}

impl TrustBinding {
    fn admits(&self, assertion: &IdentityAssertion) -> bool {
        self.issuer == assertion.issuer
            && self.audience == assertion.audience
            && self.subject.matches(&assertion.subject)
    }
}

/// Set of trust bindings. Default-deny: an assertion is trusted for a scope
/// only if some binding for that scope admits it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrustPolicy {
    #[serde(default)]
    pub bindings: Vec<TrustBinding>,
}

impl TrustPolicy {
    pub fn with_binding(mut self, binding: TrustBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Check the assertion's claims for `scope`.
    pub fn check(
        &self,
        assertion: &IdentityAssertion,
        scope: &RegistryScope,
    ) -> Result<(), AuthDenied> {
        let mut for_scope = self
            .bindings
            .iter()
            .filter(|b| &b.scope == scope)
            .peekable();
        if for_scope.peek().is_none() {
            return Err(AuthDenied::new(format!("no trust binding for scope {}", scope)));
        }
        if for_scope.any(|b| b.admits(assertion)) {
            Ok(())
        } else {
            Err(AuthDenied::new(format!(
                "assertion (issuer={}, audience={}, subject={}) \
                 matches no trust binding for scope {}",
                assertion.issuer, assertion.audience, assertion.subject, scope
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

/// Exchanges identity assertions for credential leases.
pub struct CredentialBroker {
    policy: TrustPolicy,
    issuer: Arc<dyn CredentialIssuer>,
    clock: Arc<dyn Clock>,
    exchange_timeout: Duration,
}

impl CredentialBroker {
    pub fn new(
        policy: TrustPolicy,
        issuer: Arc<dyn CredentialIssuer>,
        clock: Arc<dyn Clock>,
        exchange_timeout: Duration,
    ) -> Self {
        Self {
            policy,
            issuer,
            clock,
            exchange_timeout,
        }
    }

    /// Acquire a lease for `scope` valid for at most `max_lifetime`.
    pub async fn acquire(
        &self,
        assertion: &IdentityAssertion,
        scope: &RegistryScope,
        max_lifetime: Duration,
    ) -> Result<CredentialLease, AuthDenied> {
        let now = self.clock.now();
        if assertion.is_expired_at(now) {
            warn!(scope = %scope, expires_at = %assertion.expires_at, "identity assertion expired");
            return Err(AuthDenied::new(format!(
                "identity assertion expired at {}",
                assertion.expires_at
            )));
        }
        if max_lifetime.is_zero() {
            return Err(AuthDenied::new("requested credential lifetime is zero"));
        }

        self.policy.check(assertion, scope).inspect_err(|e| {
            warn!(scope = %scope, reason = %e.reason, "trust policy rejected assertion");
        })?;

        let request = ExchangeRequest {
            assertion: &assertion.token,
            scope,
            max_lifetime,
        };
        let exchange = tokio::time::timeout(self.exchange_timeout, self.issuer.exchange(request));
        let issued = match exchange.await {
            Ok(Ok(issued)) => issued,
            Ok(Err(e)) => return Err(AuthDenied::new(e.to_string())),
            Err(_) => {
                return Err(AuthDenied::new(format!(
                    "credential exchange timed out after {}ms",
                    self.exchange_timeout.as_millis()
                )))
            }
        };

        let issued_at = self.clock.now();
        let ceiling = chrono::Duration::from_std(max_lifetime)
            .ok()
            .and_then(|d| issued_at.checked_add_signed(d));
        let expires_at = match ceiling {
            Some(ceiling) => issued.expires_at.min(ceiling),
            None => issued.expires_at,
        };
        if expires_at <= issued_at {
            return Err(AuthDenied::new(format!(
                "issued credential already expired at {}",
                issued.expires_at
            )));
        }

        info!(scope = %scope, expires_at = %expires_at, "credential lease acquired");
        Ok(CredentialLease::new(
            issued.access_token,
            issued_at,
            expires_at,
            scope.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_glob_is_anchored() {
        let p = SubjectPattern::new("repo:org/app:ref:refs/heads/*").unwrap();
        assert!(p.matches("repo:org/app:ref:refs/heads/main"));
        assert!(p.matches("repo:org/app:ref:refs/heads/release/1.x"));
        assert!(!p.matches("repo:org/app:pull_request"));
        assert!(!p.matches("xrepo:org/app:ref:refs/heads/main"));
    }

    #[test]
    fn subject_glob_escapes_regex_metacharacters() {
        let p = SubjectPattern::new("repo:org/app.v2:*").unwrap();
        assert!(p.matches("repo:org/app.v2:environment:prod"));
        assert!(!p.matches("repo:org/appXv2:environment:prod"));
    }

    #[test]
    fn exact_subject_without_wildcard() {
        let p = SubjectPattern::new("repo:org/app:ref:refs/heads/main").unwrap();
        assert!(p.matches("repo:org/app:ref:refs/heads/main"));
        assert!(!p.matches("repo:org/app:ref:refs/heads/main2"));
    }

    #[test]
    fn subject_pattern_serde_roundtrip_keeps_glob() {
        let p: SubjectPattern = serde_json::from_str("\"repo:org/*\"").unwrap();
        assert_eq!(p.as_str(), "repo:org/*");
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"repo:org/*\"");
    }
}
