//! shipgate core library
//!
//! Security-gated build, scan and publish pipeline: the domain model, the
//! five stage components, and the orchestrator that drives a run through
//! its state machine. Concrete adapters live in `shipgate-adapters`.

pub mod broker;
pub mod builder;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod domain;
pub mod fakes;
pub mod gate;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod publisher;
pub mod reporter;
pub mod reporting;
pub mod retry;
pub mod sarif;
pub mod telemetry;

pub use broker::{
    CredentialBroker, CredentialIssuer, ExchangeRequest, IssuedCredential, IssuerError,
    SubjectPattern, TrustBinding, TrustPolicy,
};
pub use builder::{build_artifact, ArtifactBuilder, BuildRequest};
pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use clock::{Clock, SystemClock};
pub use config::{PipelineSettings, StageTimeouts};
pub use domain::{
    AbortCause, Artifact, ArtifactDigest, AuthDenied, BuildFailed, CredentialLease, DigestError,
    Finding, GateDecision, IdentityAssertion, PipelineRun, PublishApproval, PublishError,
    RegistryScope, ReportingUnavailable, RunId, RunOutcome, RunStage, ScanReport, ScannerInfo,
    SecretString, Severity, SeverityPolicy, StageTransition, TransitionError, SCAN_INCOMPLETE_ID,
};
pub use gate::{decide, ScanEngine, ScanEngineError, ScanOutput, VulnerabilityGate};
pub use orchestrator::{
    Collaborators, PipelineOrchestrator, PipelineStages, RunReport, RunRequest,
};
pub use publisher::{PublishReceipt, Publisher, Registry, RegistryError};
pub use reporter::{FindingsReporter, ReportReceipt, ReportSink, SinkError};
pub use reporting::{
    render_run_summary_md, write_run_artifacts, write_run_report_json, write_run_summary_md,
    RunArtifactPaths, RunReportArtifact,
};
pub use retry::RetryPolicy;
pub use sarif::{to_sarif, SarifLog};

pub use metrics::METRICS;
pub use obs::RunSpan;
pub use telemetry::init_tracing;

/// shipgate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
