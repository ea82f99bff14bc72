//! Report sinks: a SARIF file on disk, or an HTTP code-scanning endpoint.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use shipgate_core::{ReportSink, SarifLog, SecretString, SinkError};

/// Writes the SARIF log to a fixed path, replacing any previous file.
pub struct FileReportSink {
    path: PathBuf,
}

impl FileReportSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, bytes: &[u8]) -> std::io::Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        // Readers never observe a half-written log.
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[async_trait]
impl ReportSink for FileReportSink {
    fn name(&self) -> String {
        format!("file:{}", self.path.display())
    }

    async fn submit(&self, log: &SarifLog) -> Result<Option<String>, SinkError> {
        let bytes =
            serde_json::to_vec_pretty(log).map_err(|e| SinkError::Rejected(e.to_string()))?;
        self.write(&bytes)
            .map_err(|e| SinkError::Unavailable(format!("{}: {e}", self.path.display())))?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "sarif log written");
        Ok(Some(self.path.display().to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    id: Option<String>,
}

/// Posts the SARIF log as JSON to a code-scanning endpoint.
pub struct HttpReportSink {
    endpoint: String,
    token: Option<SecretString>,
    http_client: reqwest::Client,
}

impl HttpReportSink {
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<SecretString>,
    ) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("shipgate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            token,
            http_client,
        })
    }
}

#[async_trait]
impl ReportSink for HttpReportSink {
    fn name(&self) -> String {
        self.endpoint.clone()
    }

    async fn submit(&self, log: &SarifLog) -> Result<Option<String>, SinkError> {
        let mut request = self.http_client.post(&self.endpoint).json(log);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose());
        }

        let response = request
            .send()
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;
        let status = response.status();
        if status.is_client_error() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = %status, endpoint = %self.endpoint, "report upload rejected");
            return Err(SinkError::Rejected(format!("{status}: {}", text.trim())));
        }
        if !status.is_success() {
            return Err(SinkError::Unavailable(format!("sink returned {status}")));
        }

        // An acknowledgement without a readable id still counts as delivered.
        let body = response.text().await.unwrap_or_default();
        let id = serde_json::from_str::<UploadResponse>(&body)
            .ok()
            .and_then(|r| r.id);
        debug!(endpoint = %self.endpoint, id = ?id, "report uploaded");
        Ok(id)
    }
}
