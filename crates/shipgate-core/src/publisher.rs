//! Publisher: pushes a gated artifact to the registry with a credential lease.
//!
//! Push is idempotent by digest: if the registry already holds the digest the
//! publisher only (re)points the tags. Transient registry unavailability is
//! retried with exponential backoff; denial and credential expiry are not.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::domain::{
    Artifact, ArtifactDigest, CredentialLease, PublishApproval, PublishError, RegistryScope,
    SecretString,
};
use crate::metrics::METRICS;
use crate::obs::emit_publish_retry;
use crate::retry::RetryPolicy;

/// Failures reported by a registry client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The registry refused the operation for this principal.
    #[error("denied: {0}")]
    Denied(String),

    /// The credential was not accepted (expired or revoked).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Transient failure: network, 5xx, throttling.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// Registry client. Content is addressed by digest; tags are last-write-wins.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Whether the registry already holds `digest` in `scope`.
    async fn contains(
        &self,
        scope: &RegistryScope,
        digest: &ArtifactDigest,
        token: &SecretString,
    ) -> Result<bool, RegistryError>;

    /// Upload the artifact and point its tags at it. Returns the digest the
    /// registry recorded.
    async fn push(
        &self,
        scope: &RegistryScope,
        artifact: &Artifact,
        token: &SecretString,
    ) -> Result<ArtifactDigest, RegistryError>;

    /// Point `tag` at an existing digest.
    async fn tag(
        &self,
        scope: &RegistryScope,
        digest: &ArtifactDigest,
        tag: &str,
        token: &SecretString,
    ) -> Result<(), RegistryError>;
}

/// Confirmation of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub digest: ArtifactDigest,
    /// `registry/repository@sha256:...`
    pub image_ref: String,
    pub tags: Vec<String>,
    /// The registry already held the digest; no content was uploaded.
    pub already_present: bool,
    pub attempts: u32,
    pub published_at: DateTime<Utc>,
}

pub struct Publisher {
    registry: Arc<dyn Registry>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    attempt_timeout: Duration,
}

impl Publisher {
    pub fn new(
        registry: Arc<dyn Registry>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            clock,
            retry,
            attempt_timeout,
        }
    }

    /// Publish `artifact` to the lease's scope.
    ///
    /// `approval` can only come from a passing gate decision.
    pub async fn publish(
        &self,
        artifact: &Artifact,
        _approval: &PublishApproval,
        lease: &CredentialLease,
    ) -> Result<PublishReceipt, PublishError> {
        let max_attempts = self.retry.attempts();
        let mut last_reason = String::new();

        for attempt in 1..=max_attempts {
            let now = self.clock.now();
            if lease.is_expired_at(now) {
                warn!(expired_at = %lease.expires_at(), "credential lease expired before push");
                return Err(PublishError::CredentialExpired {
                    expired_at: lease.expires_at(),
                });
            }

            let outcome =
                tokio::time::timeout(self.attempt_timeout, self.push_once(artifact, lease)).await;
            let reason = match outcome {
                Ok(Ok(already_present)) => {
                    let receipt = PublishReceipt {
                        digest: artifact.digest.clone(),
                        image_ref: format!("{}@{}", lease.scope().image_ref(), artifact.digest),
                        tags: artifact.tags.clone(),
                        already_present,
                        attempts: attempt,
                        published_at: self.clock.now(),
                    };
                    info!(
                        image = %receipt.image_ref,
                        already_present,
                        attempts = attempt,
                        "artifact published"
                    );
                    return Ok(receipt);
                }
                Ok(Err(RegistryError::Denied(reason))) => {
                    return Err(PublishError::PushDenied { reason });
                }
                Ok(Err(RegistryError::Unauthorized(reason))) => {
                    warn!(reason = %reason, "registry rejected credential");
                    return Err(PublishError::CredentialExpired {
                        expired_at: self.clock.now().min(lease.expires_at()),
                    });
                }
                Ok(Err(RegistryError::Unavailable(reason))) => reason,
                Err(_) => format!(
                    "push attempt timed out after {}s",
                    self.attempt_timeout.as_secs()
                ),
            };

            if attempt < max_attempts {
                let delay = self.retry.backoff(attempt);
                emit_publish_retry(attempt, delay.as_millis() as u64, &reason);
                METRICS.inc_publish_retries();
                tokio::time::sleep(delay).await;
            }
            last_reason = reason;
        }

        Err(PublishError::RegistryUnavailable {
            attempts: max_attempts,
            reason: last_reason,
        })
    }

    /// One push attempt. Returns whether the digest was already present.
    async fn push_once(
        &self,
        artifact: &Artifact,
        lease: &CredentialLease,
    ) -> Result<bool, RegistryError> {
        let scope = lease.scope();
        let token = lease.token();

        if self.registry.contains(scope, &artifact.digest, token).await? {
            for tag in &artifact.tags {
                self.registry.tag(scope, &artifact.digest, tag, token).await?;
            }
            return Ok(true);
        }

        let recorded = self.registry.push(scope, artifact, token).await?;
        if recorded != artifact.digest {
            return Err(RegistryError::Denied(format!(
                "registry recorded digest {} but artifact is {}",
                recorded, artifact.digest
            )));
        }
        Ok(false)
    }
}
