//! `shipgate.toml` loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use shipgate_adapters::{DockerSettings, TrivySettings};
use shipgate_core::{
    PipelineSettings, RegistryScope, RetryPolicy, SeverityPolicy, StageTimeouts, SubjectPattern,
    TrustBinding, TrustPolicy,
};

pub const DEFAULT_CONFIG_FILE: &str = "shipgate.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct ShipgateConfig {
    pub target: TargetConfig,
    #[serde(default)]
    pub policy: SeverityPolicy,
    #[serde(default)]
    pub trust: TrustConfig,
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub timeouts: StageTimeouts,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub build: DockerSettings,
    #[serde(default)]
    pub scan: TrivySettings,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub registry: String,
    pub repository: String,
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrustConfig {
    #[serde(default)]
    pub bindings: Vec<BindingConfig>,
}

/// One accepted identity for the configured target.
#[derive(Debug, Clone, Deserialize)]
pub struct BindingConfig {
    pub issuer: String,
    pub audience: String,
    pub subject: SubjectPattern,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsConfig {
    /// Token-exchange endpoint.
    pub endpoint: String,
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,
}

fn default_max_lifetime_secs() -> u64 {
    900
}

/// Where SARIF results go.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ReportConfig {
    File {
        path: PathBuf,
    },
    Http {
        endpoint: String,
        /// Environment variable holding the upload token.
        #[serde(default)]
        token_env: Option<String>,
    },
}

impl Default for ReportConfig {
    fn default() -> Self {
        ReportConfig::File {
            path: PathBuf::from("shipgate.sarif"),
        }
    }
}

impl ShipgateConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ShipgateConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.target.registry.trim().is_empty() || self.target.repository.trim().is_empty() {
            bail!("[target] needs both registry and repository");
        }
        if self.trust.bindings.is_empty() {
            bail!("[[trust.bindings]] is empty; no identity could ever be granted credentials");
        }
        if self.credentials.max_lifetime_secs == 0 {
            bail!("[credentials] max_lifetime_secs must be positive");
        }
        if self.retry.max_attempts == 0 {
            bail!("[retry] max_attempts must be at least 1");
        }
        Ok(())
    }

    pub fn scope(&self) -> RegistryScope {
        RegistryScope::new(&self.target.registry, &self.target.repository)
    }

    pub fn trust_policy(&self) -> TrustPolicy {
        self.trust
            .bindings
            .iter()
            .fold(TrustPolicy::default(), |policy, b| {
                policy.with_binding(TrustBinding {
                    scope: self.scope(),
                    issuer: b.issuer.clone(),
                    audience: b.audience.clone(),
                    subject: b.subject.clone(),
                })
            })
    }

    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            timeouts: self.timeouts,
            retry: self.retry,
        }
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.credentials.max_lifetime_secs)
    }
}
