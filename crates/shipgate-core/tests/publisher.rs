use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;

use shipgate_core::fakes::{ManualClock, MemoryRegistry};
use shipgate_core::{
    Artifact, ArtifactDigest, Clock, CredentialLease, GateDecision, PublishApproval,
    PublishError, Publisher, Registry, RegistryError, RegistryScope, RetryPolicy, SecretString,
};

fn scope() -> RegistryScope {
    RegistryScope::new("registry.example.com", "team/app")
}

fn artifact() -> Artifact {
    Artifact::new(
        ArtifactDigest::of_bytes(b"layer-data"),
        4096,
        vec!["v1.2.0".to_string()],
    )
}

fn approval() -> PublishApproval {
    GateDecision::Pass.approval().unwrap()
}

fn lease(clock: &ManualClock, valid_for: ChronoDuration) -> CredentialLease {
    let now = clock.now();
    CredentialLease::new(SecretString::new("tok"), now, now + valid_for, scope())
}

fn publisher(clock: Arc<ManualClock>, registry: Arc<MemoryRegistry>, attempts: u32) -> Publisher {
    Publisher::new(
        registry,
        clock,
        RetryPolicy {
            max_attempts: attempts,
            backoff_base_ms: 10,
        },
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn same_digest_twice_uploads_once() {
    let clock = Arc::new(ManualClock::fixed());
    let registry = Arc::new(MemoryRegistry::new());
    let p = publisher(clock.clone(), registry.clone(), 3);
    let l = lease(&clock, ChronoDuration::minutes(15));

    let first = p.publish(&artifact(), &approval(), &l).await.unwrap();
    let second = p.publish(&artifact(), &approval(), &l).await.unwrap();

    assert_eq!(first.digest, second.digest);
    assert!(!first.already_present);
    assert!(second.already_present);
    assert_eq!(registry.uploads(), 1);
    assert!(registry.holds(&scope(), &artifact().digest));
    assert_eq!(
        registry.tag_target(&scope(), "v1.2.0"),
        Some(artifact().digest)
    );
}

#[tokio::test]
async fn expired_lease_never_reaches_registry() {
    let clock = Arc::new(ManualClock::fixed());
    let registry = Arc::new(MemoryRegistry::new());
    let p = publisher(clock.clone(), registry.clone(), 3);
    let l = lease(&clock, ChronoDuration::minutes(15));

    for past_expiry in [ChronoDuration::minutes(15), ChronoDuration::hours(2)] {
        clock.set(l.issued_at() + past_expiry);
        let err = p.publish(&artifact(), &approval(), &l).await.unwrap_err();
        assert_eq!(
            err,
            PublishError::CredentialExpired {
                expired_at: l.expires_at()
            }
        );
    }
    assert_eq!(registry.attempts(), 0);
}

#[tokio::test]
async fn unauthorized_maps_to_credential_expired() {
    let clock = Arc::new(ManualClock::fixed());
    let registry = Arc::new(MemoryRegistry::new());
    registry.fail_next(RegistryError::Unauthorized("401".into()));
    let p = publisher(clock.clone(), registry.clone(), 3);

    let err = p
        .publish(&artifact(), &approval(), &lease(&clock, ChronoDuration::minutes(15)))
        .await
        .unwrap_err();
    assert!(matches!(err, PublishError::CredentialExpired { .. }));
    assert_eq!(registry.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn unavailable_is_retried_with_backoff_then_surfaces() {
    let clock = Arc::new(ManualClock::fixed());
    let registry = Arc::new(MemoryRegistry::new());
    for _ in 0..2 {
        registry.fail_next(RegistryError::Unavailable("503 Service Unavailable".into()));
    }
    let p = publisher(clock.clone(), registry.clone(), 2);

    let started = tokio::time::Instant::now();
    let err = p
        .publish(&artifact(), &approval(), &lease(&clock, ChronoDuration::minutes(15)))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        PublishError::RegistryUnavailable {
            attempts: 2,
            reason: "503 Service Unavailable".to_string()
        }
    );
    assert_eq!(registry.attempts(), 2);
    assert!(started.elapsed() >= Duration::from_millis(10));
}

/// Registry whose existence check never answers.
#[derive(Default)]
struct HungRegistry {
    lookups: AtomicUsize,
}

#[async_trait]
impl Registry for HungRegistry {
    async fn contains(
        &self,
        _scope: &RegistryScope,
        _digest: &ArtifactDigest,
        _token: &SecretString,
    ) -> Result<bool, RegistryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    async fn push(
        &self,
        _scope: &RegistryScope,
        _artifact: &Artifact,
        _token: &SecretString,
    ) -> Result<ArtifactDigest, RegistryError> {
        panic!("push after a hung lookup")
    }

    async fn tag(
        &self,
        _scope: &RegistryScope,
        _digest: &ArtifactDigest,
        _tag: &str,
        _token: &SecretString,
    ) -> Result<(), RegistryError> {
        panic!("tag after a hung lookup")
    }
}

#[tokio::test(start_paused = true)]
async fn hung_attempts_time_out_and_are_retried() {
    let clock = Arc::new(ManualClock::fixed());
    let registry = Arc::new(HungRegistry::default());
    let p = Publisher::new(
        registry.clone(),
        clock.clone(),
        RetryPolicy {
            max_attempts: 3,
            backoff_base_ms: 10,
        },
        Duration::from_secs(5),
    );

    let started = tokio::time::Instant::now();
    let err = p
        .publish(&artifact(), &approval(), &lease(&clock, ChronoDuration::minutes(15)))
        .await
        .unwrap_err();

    match err {
        PublishError::RegistryUnavailable { attempts, reason } => {
            assert_eq!(attempts, 3);
            assert!(reason.contains("timed out"));
        }
        other => panic!("expected RegistryUnavailable, got {other:?}"),
    }
    assert_eq!(registry.lookups.load(Ordering::SeqCst), 3);
    assert!(started.elapsed() >= Duration::from_secs(15));
}

#[tokio::test]
async fn denial_is_not_retried() {
    let clock = Arc::new(ManualClock::fixed());
    let registry = Arc::new(MemoryRegistry::new());
    registry.fail_next(RegistryError::Denied("forbidden".into()));
    let p = publisher(clock.clone(), registry.clone(), 5);

    let err = p
        .publish(&artifact(), &approval(), &lease(&clock, ChronoDuration::minutes(15)))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        PublishError::PushDenied {
            reason: "forbidden".to_string()
        }
    );
    assert_eq!(registry.attempts(), 1);
    assert_eq!(registry.uploads(), 0);
}

#[test]
fn only_pass_yields_approval() {
    assert!(GateDecision::Pass.approval().is_some());
    assert!(GateDecision::Fail { blocking: vec![] }.approval().is_none());
}
