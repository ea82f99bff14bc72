//! Container CLI adapters: image build and registry push.
//!
//! Registry operations run against a throwaway client config directory that
//! is logged in with the lease token and deleted when the operation ends, so
//! credentials never outlive the call.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use shipgate_core::{
    Artifact, ArtifactBuilder, ArtifactDigest, BuildFailed, BuildRequest, Registry,
    RegistryError, RegistryScope, SecretString,
};

use crate::command::{run_command, CommandError, CommandOutput, CommandSpec};

/// Lines of toolchain output kept in failure details.
const DETAIL_LINES: usize = 20;

/// Settings shared by the builder and registry adapters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DockerSettings {
    /// Container CLI binary (`docker`, `podman`).
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Target platform passed to `build --platform`.
    #[serde(default)]
    pub platform: Option<String>,
    /// Extra `--build-arg KEY=VALUE` pairs.
    #[serde(default)]
    pub build_args: Vec<String>,
    /// Dockerfile path relative to the context.
    #[serde(default)]
    pub dockerfile: Option<String>,
    /// Username presented with the lease token at login.
    #[serde(default = "default_login_username")]
    pub login_username: String,
}

fn default_binary() -> String {
    "docker".to_string()
}

fn default_login_username() -> String {
    "oauth2accesstoken".to_string()
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            platform: None,
            build_args: Vec::new(),
            dockerfile: None,
            login_username: default_login_username(),
        }
    }
}

/// Tag under which every pushed artifact is also stored, so existence can be
/// checked by digest alone.
pub fn digest_tag(digest: &ArtifactDigest) -> String {
    format!("sha256-{}", digest.hex())
}

/// Map a failed container CLI call to a registry error kind by its stderr.
pub fn classify_registry_failure(out: &CommandOutput) -> RegistryError {
    let lower = out.stderr.to_ascii_lowercase();
    let detail = out.failure_detail(DETAIL_LINES);
    if lower.contains("unauthorized")
        || lower.contains("authentication required")
        || lower.contains("token has expired")
    {
        RegistryError::Unauthorized(detail)
    } else if lower.contains("denied")
        || lower.contains("forbidden")
        || lower.contains("tag invalid")
    {
        RegistryError::Denied(detail)
    } else {
        RegistryError::Unavailable(detail)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct DockerBuilder {
    settings: DockerSettings,
}

impl DockerBuilder {
    pub fn new(settings: DockerSettings) -> Self {
        Self { settings }
    }

    fn build_command(&self, request: &BuildRequest, iidfile: &Path) -> CommandSpec {
        let mut cmd = CommandSpec::new(&self.settings.binary)
            .arg("build")
            .arg("--iidfile")
            .arg(iidfile.display().to_string())
            .arg("--label")
            .arg(format!("org.opencontainers.image.revision={}", request.source_ref));
        if let Some(platform) = &self.settings.platform {
            cmd = cmd.arg("--platform").arg(platform);
        }
        if let Some(dockerfile) = &self.settings.dockerfile {
            cmd = cmd
                .arg("--file")
                .arg(request.context.join(dockerfile).display().to_string());
        }
        for build_arg in &self.settings.build_args {
            cmd = cmd.arg("--build-arg").arg(build_arg);
        }
        cmd.arg(request.context.display().to_string())
    }

    async fn image_size(&self, digest: &ArtifactDigest) -> Result<u64, BuildFailed> {
        let out = run(
            CommandSpec::new(&self.settings.binary)
                .args(["image", "inspect", "--format", "{{.Size}}"])
                .arg(digest.as_str()),
        )
        .await
        .map_err(|e| BuildFailed::new(e.to_string()))?;
        if !out.success {
            return Err(BuildFailed::new(format!(
                "image inspect failed: {}",
                out.failure_detail(DETAIL_LINES)
            )));
        }
        out.stdout
            .trim()
            .parse()
            .map_err(|_| BuildFailed::new(format!("unexpected image size {:?}", out.stdout.trim())))
    }
}

#[async_trait]
impl ArtifactBuilder for DockerBuilder {
    async fn build(&self, request: &BuildRequest) -> Result<Artifact, BuildFailed> {
        let scratch = TempDir::new().map_err(|e| BuildFailed::new(format!("scratch dir: {e}")))?;
        let iidfile = scratch.path().join("iid");

        let out = run(self.build_command(request, &iidfile))
            .await
            .map_err(|e| BuildFailed::new(e.to_string()))?;
        if !out.success {
            return Err(BuildFailed::new(out.failure_detail(DETAIL_LINES)));
        }

        let iid = tokio::fs::read_to_string(&iidfile)
            .await
            .map_err(|e| BuildFailed::new(format!("build produced no image id: {e}")))?;
        let digest: ArtifactDigest = iid
            .trim()
            .parse()
            .map_err(|e| BuildFailed::new(format!("invalid image id {:?}: {e}", iid.trim())))?;
        let size_bytes = self.image_size(&digest).await?;

        info!(digest = %digest, size_bytes, "image built");
        Ok(Artifact::new(digest, size_bytes, request.tags.clone()))
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub struct DockerRegistry {
    settings: DockerSettings,
}

/// A logged-in, throwaway client config directory.
struct Session {
    config_dir: TempDir,
}

impl Session {
    fn command(&self, binary: &str) -> CommandSpec {
        CommandSpec::new(binary)
            .arg("--config")
            .arg(self.config_dir.path().display().to_string())
    }
}

impl DockerRegistry {
    pub fn new(settings: DockerSettings) -> Self {
        Self { settings }
    }

    async fn login(
        &self,
        scope: &RegistryScope,
        token: &SecretString,
    ) -> Result<Session, RegistryError> {
        let config_dir = TempDir::new()
            .map_err(|e| RegistryError::Unavailable(format!("client config dir: {e}")))?;
        let session = Session { config_dir };
        let out = run(
            session
                .command(&self.settings.binary)
                .args(["login", "--username"])
                .arg(&self.settings.login_username)
                .arg("--password-stdin")
                .arg(&scope.registry)
                .stdin(token.expose()),
        )
        .await
        .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
        if !out.success {
            warn!(registry = %scope.registry, "registry login failed");
            return Err(classify_registry_failure(&out));
        }
        debug!(registry = %scope.registry, "logged in with ephemeral config");
        Ok(session)
    }

    async fn checked(&self, spec: CommandSpec) -> Result<CommandOutput, RegistryError> {
        let out = run(spec)
            .await
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
        if out.success {
            Ok(out)
        } else {
            Err(classify_registry_failure(&out))
        }
    }

    /// Tag the local image and push it under `tag`.
    async fn push_tag(
        &self,
        session: &Session,
        scope: &RegistryScope,
        digest: &ArtifactDigest,
        tag: &str,
    ) -> Result<CommandOutput, RegistryError> {
        let target = format!("{}:{}", scope.image_ref(), tag);
        self.checked(
            CommandSpec::new(&self.settings.binary)
                .arg("tag")
                .arg(digest.as_str())
                .arg(&target),
        )
        .await?;
        self.checked(session.command(&self.settings.binary).arg("push").arg(&target))
            .await
    }
}

#[async_trait]
impl Registry for DockerRegistry {
    async fn contains(
        &self,
        scope: &RegistryScope,
        digest: &ArtifactDigest,
        token: &SecretString,
    ) -> Result<bool, RegistryError> {
        let session = self.login(scope, token).await?;
        let out = run(
            session
                .command(&self.settings.binary)
                .args(["manifest", "inspect"])
                .arg(format!("{}:{}", scope.image_ref(), digest_tag(digest))),
        )
        .await
        .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
        if out.success {
            return Ok(true);
        }
        let lower = out.stderr.to_ascii_lowercase();
        if lower.contains("no such manifest")
            || lower.contains("manifest unknown")
            || lower.contains("not found")
        {
            return Ok(false);
        }
        Err(classify_registry_failure(&out))
    }

    async fn push(
        &self,
        scope: &RegistryScope,
        artifact: &Artifact,
        token: &SecretString,
    ) -> Result<ArtifactDigest, RegistryError> {
        let session = self.login(scope, token).await?;
        let pinned = self
            .push_tag(&session, scope, &artifact.digest, &digest_tag(&artifact.digest))
            .await?;
        if let Some(manifest) = pushed_manifest_digest(&pinned.stdout) {
            info!(manifest = %manifest, "registry accepted manifest");
        }
        for tag in &artifact.tags {
            self.push_tag(&session, scope, &artifact.digest, tag).await?;
        }
        Ok(artifact.digest.clone())
    }

    async fn tag(
        &self,
        scope: &RegistryScope,
        digest: &ArtifactDigest,
        tag: &str,
        token: &SecretString,
    ) -> Result<(), RegistryError> {
        let session = self.login(scope, token).await?;
        let source = format!("{}:{}", scope.image_ref(), digest_tag(digest));
        let target = format!("{}:{}", scope.image_ref(), tag);
        self.checked(
            session
                .command(&self.settings.binary)
                .args(["buildx", "imagetools", "create", "--tag"])
                .arg(&target)
                .arg(&source),
        )
        .await?;
        Ok(())
    }
}

/// Extract `sha256:...` from a `push` output line like
/// `latest: digest: sha256:abcd size: 1234`.
pub fn pushed_manifest_digest(stdout: &str) -> Option<String> {
    stdout.lines().rev().find_map(|line| {
        let (_, rest) = line.split_once("digest: ")?;
        rest.split_whitespace()
            .next()
            .filter(|d| d.starts_with("sha256:"))
            .map(str::to_string)
    })
}

async fn run(spec: CommandSpec) -> Result<CommandOutput, CommandError> {
    run_command(&spec).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn failed(stderr: &str) -> CommandOutput {
        CommandOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: stderr.to_string(),
            duration_ms: 1,
            success: false,
        }
    }

    #[test]
    fn classifies_registry_errors() {
        assert!(matches!(
            classify_registry_failure(&failed(
                "denied: requested access to the resource is denied"
            )),
            RegistryError::Denied(_)
        ));
        assert!(matches!(
            classify_registry_failure(&failed("unauthorized: authentication required")),
            RegistryError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_registry_failure(&failed("net/http: TLS handshake timeout")),
            RegistryError::Unavailable(ref d) if d.contains("TLS handshake")
        ));
    }

    #[test]
    fn parses_push_digest() {
        let out = "The push refers to repository [r.example/app]\n\
                   5f70bf18a086: Pushed\n\
                   sha256-ab: digest: sha256:0123abcd size: 528\n";
        assert_eq!(pushed_manifest_digest(out).as_deref(), Some("sha256:0123abcd"));
        assert_eq!(pushed_manifest_digest("nothing here"), None);
    }

    #[test]
    fn build_command_carries_iidfile_and_context() {
        let builder = DockerBuilder::new(DockerSettings {
            platform: Some("linux/amd64".to_string()),
            build_args: vec!["VERSION=1".to_string()],
            ..DockerSettings::default()
        });
        let request = BuildRequest {
            source_ref: "abc123".to_string(),
            context: PathBuf::from("/src"),
            tags: vec![],
        };
        let cmd = builder.build_command(&request, Path::new("/tmp/iid"));
        let line = cmd.display();
        assert!(line.starts_with("docker build --iidfile /tmp/iid"));
        assert!(line.contains("org.opencontainers.image.revision=abc123"));
        assert!(line.contains("--platform linux/amd64"));
        assert!(line.contains("--build-arg VERSION=1"));
        assert!(line.ends_with(" /src"));
    }

    #[test]
    fn digest_tag_is_registry_safe() {
        let d = ArtifactDigest::of_bytes(b"x");
        let tag = digest_tag(&d);
        assert!(tag.starts_with("sha256-"));
        assert!(!tag.contains(':'));
    }
}
