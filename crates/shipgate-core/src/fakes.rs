//! In-memory fakes for every collaborator trait (testing only)
//!
//! Each fake counts its invocations so tests can assert which stages ran.
//! `ManualClock` makes lease expiry deterministic.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::broker::{CredentialIssuer, ExchangeRequest, IssuedCredential, IssuerError};
use crate::builder::{ArtifactBuilder, BuildRequest};
use crate::clock::Clock;
use crate::domain::{
    Artifact, ArtifactDigest, BuildFailed, Finding, RegistryScope, ScannerInfo, SecretString,
};
use crate::gate::{ScanEngine, ScanEngineError, ScanOutput};
use crate::publisher::{Registry, RegistryError};
use crate::reporter::{ReportSink, SinkError};
use crate::sarif::SarifLog;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// ManualClock
// ---------------------------------------------------------------------------

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// A clock fixed at 2026-01-01T00:00:00Z.
    pub fn fixed() -> Self {
        Self::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().unwrap_or_default())
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = lock(&self.now);
        *now += by;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *lock(&self.now) = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

// ---------------------------------------------------------------------------
// StaticIssuer
// ---------------------------------------------------------------------------

/// Credential issuer that grants every exchange for a fixed lifetime, or
/// fails every exchange with a preset error.
pub struct StaticIssuer {
    clock: Arc<dyn Clock>,
    lifetime: chrono::Duration,
    failure: Option<IssuerError>,
    calls: AtomicUsize,
}

impl StaticIssuer {
    pub fn new(clock: Arc<dyn Clock>, lifetime: chrono::Duration) -> Self {
        Self {
            clock,
            lifetime,
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(clock: Arc<dyn Clock>, failure: IssuerError) -> Self {
        Self {
            failure: Some(failure),
            ..Self::new(clock, chrono::Duration::zero())
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialIssuer for StaticIssuer {
    async fn exchange(
        &self,
        _request: ExchangeRequest<'_>,
    ) -> Result<IssuedCredential, IssuerError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        Ok(IssuedCredential {
            access_token: SecretString::new(format!("token-{n}")),
            expires_at: self.clock.now() + self.lifetime,
        })
    }
}

// ---------------------------------------------------------------------------
// FakeBuilder
// ---------------------------------------------------------------------------

/// Builder whose artifact digest is the SHA-256 of the source ref.
pub struct FakeBuilder {
    failure: Option<String>,
    /// Simulated build duration applied to a manual clock.
    elapse: Option<(Arc<ManualClock>, chrono::Duration)>,
    calls: AtomicUsize,
}

impl Default for FakeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBuilder {
    pub fn new() -> Self {
        Self {
            failure: None,
            elapse: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(detail: impl Into<String>) -> Self {
        Self {
            failure: Some(detail.into()),
            ..Self::new()
        }
    }

    /// Advance `clock` by `by` during every build.
    pub fn taking(mut self, clock: Arc<ManualClock>, by: chrono::Duration) -> Self {
        self.elapse = Some((clock, by));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactBuilder for FakeBuilder {
    async fn build(&self, request: &BuildRequest) -> Result<Artifact, BuildFailed> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((clock, by)) = &self.elapse {
            clock.advance(*by);
        }
        if let Some(detail) = &self.failure {
            return Err(BuildFailed::new(detail.clone()));
        }
        Ok(Artifact::new(
            ArtifactDigest::of_bytes(request.source_ref.as_bytes()),
            request.source_ref.len() as u64 * 1024,
            request.tags.clone(),
        ))
    }
}

// ---------------------------------------------------------------------------
// FakeScanner
// ---------------------------------------------------------------------------

/// Scanner returning a preset result.
pub struct FakeScanner {
    result: Result<ScanOutput, ScanEngineError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FakeScanner {
    pub fn info() -> ScannerInfo {
        ScannerInfo::new("fake-scanner", Some("1.0.0".to_string()))
    }

    pub fn with_findings(findings: Vec<Finding>) -> Self {
        Self {
            result: Ok(ScanOutput::complete(Self::info(), findings)),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn clean() -> Self {
        Self::with_findings(Vec::new())
    }

    /// Scanner that stops without a terminal status.
    pub fn incomplete(reason: impl Into<String>, partial: Vec<Finding>) -> Self {
        Self {
            result: Ok(ScanOutput {
                scanner: Self::info(),
                complete: false,
                incomplete_reason: Some(reason.into()),
                findings: partial,
            }),
            ..Self::clean()
        }
    }

    pub fn failing(error: ScanEngineError) -> Self {
        Self {
            result: Err(error),
            ..Self::clean()
        }
    }

    /// Sleep before answering (use with a paused tokio clock).
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScanEngine for FakeScanner {
    fn info(&self) -> ScannerInfo {
        Self::info()
    }

    async fn scan(&self, _digest: &ArtifactDigest) -> Result<ScanOutput, ScanEngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result.clone()
    }
}

// ---------------------------------------------------------------------------
// MemoryRegistry
// ---------------------------------------------------------------------------

/// Content-addressed in-memory registry with scripted transient failures.
#[derive(Default)]
pub struct MemoryRegistry {
    /// image ref -> digests held
    blobs: Mutex<HashMap<String, HashSet<ArtifactDigest>>>,
    /// `image:tag` -> digest
    tags: Mutex<HashMap<String, ArtifactDigest>>,
    /// Errors returned, in order, by the next existence checks.
    scripted: Mutex<VecDeque<RegistryError>>,
    tokens_seen: Mutex<Vec<String>>,
    checks: AtomicUsize,
    uploads: AtomicUsize,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next push attempt with `error`. Calls queue up.
    pub fn fail_next(&self, error: RegistryError) {
        lock(&self.scripted).push_back(error);
    }

    /// Push attempts observed (one existence check per attempt).
    pub fn attempts(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    /// Content uploads actually performed.
    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn tokens_seen(&self) -> Vec<String> {
        lock(&self.tokens_seen).clone()
    }

    pub fn holds(&self, scope: &RegistryScope, digest: &ArtifactDigest) -> bool {
        lock(&self.blobs)
            .get(&scope.image_ref())
            .is_some_and(|set| set.contains(digest))
    }

    pub fn tag_target(&self, scope: &RegistryScope, tag: &str) -> Option<ArtifactDigest> {
        lock(&self.tags)
            .get(&format!("{}:{}", scope.image_ref(), tag))
            .cloned()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn contains(
        &self,
        scope: &RegistryScope,
        digest: &ArtifactDigest,
        token: &SecretString,
    ) -> Result<bool, RegistryError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        lock(&self.tokens_seen).push(token.expose().to_string());
        if let Some(error) = lock(&self.scripted).pop_front() {
            return Err(error);
        }
        Ok(self.holds(scope, digest))
    }

    async fn push(
        &self,
        scope: &RegistryScope,
        artifact: &Artifact,
        token: &SecretString,
    ) -> Result<ArtifactDigest, RegistryError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        lock(&self.blobs)
            .entry(scope.image_ref())
            .or_default()
            .insert(artifact.digest.clone());
        for tag in &artifact.tags {
            self.tag(scope, &artifact.digest, tag, token).await?;
        }
        Ok(artifact.digest.clone())
    }

    async fn tag(
        &self,
        scope: &RegistryScope,
        digest: &ArtifactDigest,
        tag: &str,
        _token: &SecretString,
    ) -> Result<(), RegistryError> {
        lock(&self.tags).insert(format!("{}:{}", scope.image_ref(), tag), digest.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemorySink
// ---------------------------------------------------------------------------

/// Report sink that keeps every submitted SARIF log.
#[derive(Default)]
pub struct MemorySink {
    failure: Option<SinkError>,
    submissions: Mutex<Vec<SarifLog>>,
    calls: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: SinkError) -> Self {
        Self {
            failure: Some(error),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> Vec<SarifLog> {
        lock(&self.submissions).clone()
    }
}

#[async_trait]
impl ReportSink for MemorySink {
    fn name(&self) -> String {
        "memory".to_string()
    }

    async fn submit(&self, log: &SarifLog) -> Result<Option<String>, SinkError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        lock(&self.submissions).push(log.clone());
        Ok(Some(format!("memory-{n}")))
    }
}
