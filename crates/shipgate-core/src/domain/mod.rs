//! Domain models for shipgate.
//!
//! Canonical definitions for the core entities:
//! - `PipelineRun`: one execution and its state machine
//! - `CredentialLease`: short-lived registry credentials
//! - `Artifact`: the built, content-addressed unit
//! - `Finding` / `ScanReport`: scanner observations
//! - `SeverityPolicy` / `GateDecision`: the publish gate

pub mod artifact;
pub mod credential;
pub mod decision;
pub mod digest;
pub mod error;
pub mod finding;
pub mod policy;
pub mod run;

pub use artifact::Artifact;
pub use credential::{CredentialLease, IdentityAssertion, RegistryScope, SecretString};
pub use decision::{GateDecision, PublishApproval};
pub use digest::{ArtifactDigest, DigestError};
pub use error::{AbortCause, AuthDenied, BuildFailed, PublishError, ReportingUnavailable};
pub use finding::{Finding, ScanReport, ScannerInfo, Severity, SCAN_INCOMPLETE_ID};
pub use policy::SeverityPolicy;
pub use run::{PipelineRun, RunId, RunOutcome, RunStage, StageTransition, TransitionError};
