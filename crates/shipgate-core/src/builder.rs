//! Artifact builder seam over the external container build toolchain.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{Artifact, BuildFailed};

/// Inputs to one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    /// Source revision being built (commit SHA or ref).
    pub source_ref: String,
    /// Build context directory.
    pub context: PathBuf,
    /// Tags to attach to the produced artifact.
    pub tags: Vec<String>,
}

/// Produces a content-addressed artifact from source.
///
/// Determinism for identical inputs is a goal of implementations, not a
/// guarantee the pipeline relies on.
#[async_trait]
pub trait ArtifactBuilder: Send + Sync {
    async fn build(&self, request: &BuildRequest) -> Result<Artifact, BuildFailed>;
}

/// Run `builder` with a deadline. Exceeding it is a build failure.
pub async fn build_artifact(
    builder: &dyn ArtifactBuilder,
    request: &BuildRequest,
    timeout: Duration,
) -> Result<Artifact, BuildFailed> {
    info!(source_ref = %request.source_ref, context = ?request.context, "building artifact");
    let artifact = tokio::time::timeout(timeout, builder.build(request))
        .await
        .map_err(|_| BuildFailed::new(format!("build timed out after {}s", timeout.as_secs())))?
        .inspect_err(|e| warn!(detail = %e.detail, "build failed"))?;
    info!(
        digest = %artifact.digest,
        size_bytes = artifact.size_bytes,
        "artifact built"
    );
    Ok(artifact)
}
