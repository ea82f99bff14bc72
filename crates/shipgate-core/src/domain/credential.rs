//! Identity assertions, registry scopes and credential leases.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A secret string whose `Debug` and `Display` never reveal the value.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw value. Call only at the wire boundary.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(***)")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Signed caller identity from the external identity provider.
///
/// The claims are what the trust policy inspects; `token` is the signed form
/// forwarded to the credential issuer, which verifies the signature.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityAssertion {
    pub issuer: String,
    pub audience: String,
    pub subject: String,
    pub expires_at: DateTime<Utc>,
    pub token: SecretString,
}

impl IdentityAssertion {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// The registry resource a lease authorises.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistryScope {
    /// Registry host, e.g. `123456789012.dkr.ecr.eu-west-1.amazonaws.com`.
    pub registry: String,
    pub repository: String,
}

impl RegistryScope {
    pub fn new(registry: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            repository: repository.into(),
        }
    }

    /// `registry/repository`, the image reference without tag or digest.
    pub fn image_ref(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }
}

impl fmt::Display for RegistryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)
    }
}

/// Short-lived registry credentials for one run.
///
/// Not `Clone` and not serialisable: the lease lives on the orchestrator's
/// stack for the duration of a run and is lent to the publisher by reference.
#[derive(Debug)]
pub struct CredentialLease {
    token: SecretString,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    scope: RegistryScope,
}

impl CredentialLease {
    pub fn new(
        token: SecretString,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        scope: RegistryScope,
    ) -> Self {
        Self {
            token,
            issued_at,
            expires_at,
            scope,
        }
    }

    pub fn token(&self) -> &SecretString {
        &self.token
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn scope(&self) -> &RegistryScope {
        &self.scope
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Remaining validity at `now` (zero once expired).
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn secret_never_formats_value() {
        let s = SecretString::new("hunter2");
        assert_eq!(format!("{}", s), "***");
        assert!(!format!("{:?}", s).contains("hunter2"));
        assert_eq!(s.expose(), "hunter2");
    }

    #[test]
    fn lease_debug_is_redacted() {
        let now = Utc::now();
        let lease = CredentialLease::new(
            SecretString::new("tok-123"),
            now,
            now + ChronoDuration::minutes(15),
            RegistryScope::new("registry.example.com", "app"),
        );
        assert!(!format!("{:?}", lease).contains("tok-123"));
    }

    #[test]
    fn lease_expiry_boundary_is_expired() {
        let now = Utc::now();
        let lease = CredentialLease::new(
            SecretString::new("t"),
            now,
            now + ChronoDuration::seconds(60),
            RegistryScope::new("r", "app"),
        );
        assert!(!lease.is_expired_at(now));
        assert!(lease.is_expired_at(now + ChronoDuration::seconds(60)));
        assert_eq!(
            lease.remaining_at(now + ChronoDuration::seconds(90)),
            Duration::ZERO
        );
        assert_eq!(lease.remaining_at(now), Duration::from_secs(60));
    }

    #[test]
    fn scope_image_ref() {
        let scope = RegistryScope::new("ghcr.io", "org/app");
        assert_eq!(scope.image_ref(), "ghcr.io/org/app");
        assert_eq!(scope.to_string(), "ghcr.io/org/app");
    }

    #[test]
    fn assertion_deserializes_from_claims_json() {
        let json = r#"{
            "issuer": "https://token.actions.githubusercontent.com",
            "audience": "sts.amazonaws.com",
            "subject": "repo:org/app:ref:refs/heads/main",
            "expires_at": "2030-01-01T00:00:00Z",
            "token": "eyJ..."
        }"#;
        let a: IdentityAssertion = serde_json::from_str(json).unwrap();
        assert_eq!(a.audience, "sts.amazonaws.com");
        assert!(!format!("{:?}", a).contains("eyJ"));
    }
}
