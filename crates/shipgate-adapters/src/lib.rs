//! Shipgate adapters
//!
//! Concrete collaborators for the pipeline controller:
//! - Container CLI image builds and registry pushes
//! - Trivy vulnerability scans
//! - OAuth token-exchange credential issuance
//! - SARIF sinks on disk or over HTTP

pub mod command;
pub mod docker;
pub mod sink;
pub mod sts;
pub mod trivy;

// Re-export key types
pub use command::{run_command, CommandError, CommandOutput, CommandSpec};
pub use docker::{digest_tag, DockerBuilder, DockerRegistry, DockerSettings};
pub use sink::{FileReportSink, HttpReportSink};
pub use sts::HttpCredentialIssuer;
pub use trivy::{parse_trivy_report, TrivyScanner, TrivySettings};
