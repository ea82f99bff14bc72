//! HTTP token-exchange credential issuer.
//!
//! Posts the signed assertion to an STS-style endpoint and reads back a
//! short-lived access token. 4xx answers are rejections; everything else
//! that is not a success counts as the issuer being unavailable.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use shipgate_core::{
    Clock, CredentialIssuer, ExchangeRequest, IssuedCredential, IssuerError, SecretString,
};

pub const GRANT_TYPE_TOKEN_EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
pub const TOKEN_TYPE_JWT: &str = "urn:ietf:params:oauth:token-type:jwt";

#[derive(Serialize)]
struct ExchangeBody<'a> {
    grant_type: &'static str,
    subject_token: &'a str,
    subject_token_type: &'static str,
    /// Registry host the token is for.
    audience: &'a str,
    /// `repository:<name>:push,pull`
    scope: String,
    requested_lifetime_secs: u64,
}

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    access_token: SecretString,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

pub struct HttpCredentialIssuer {
    endpoint: String,
    http_client: reqwest::Client,
    clock: Arc<dyn Clock>,
}

impl HttpCredentialIssuer {
    pub fn new(endpoint: impl Into<String>, clock: Arc<dyn Clock>) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("shipgate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            http_client,
            clock,
        })
    }

    fn expiry(&self, response: &ExchangeResponse) -> Result<DateTime<Utc>, IssuerError> {
        match (response.expires_at, response.expires_in) {
            (Some(at), _) => Ok(at),
            (None, Some(secs)) => chrono::Duration::try_seconds(secs)
                .and_then(|d| self.clock.now().checked_add_signed(d))
                .ok_or_else(|| {
                    IssuerError::Unavailable(format!("expires_in out of range: {secs}"))
                }),
            (None, None) => Err(IssuerError::Unavailable(
                "exchange response has no expiry".to_string(),
            )),
        }
    }
}

#[async_trait]
impl CredentialIssuer for HttpCredentialIssuer {
    async fn exchange(
        &self,
        request: ExchangeRequest<'_>,
    ) -> Result<IssuedCredential, IssuerError> {
        let body = ExchangeBody {
            grant_type: GRANT_TYPE_TOKEN_EXCHANGE,
            subject_token: request.assertion.expose(),
            subject_token_type: TOKEN_TYPE_JWT,
            audience: &request.scope.registry,
            scope: format!("repository:{}:push,pull", request.scope.repository),
            requested_lifetime_secs: request.max_lifetime.as_secs(),
        };
        debug!(endpoint = %self.endpoint, scope = %request.scope, "exchanging identity assertion");

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| IssuerError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = %status, "credential exchange rejected");
            return Err(IssuerError::Rejected(format!("{status}: {}", text.trim())));
        }
        if !status.is_success() {
            return Err(IssuerError::Unavailable(format!("issuer returned {status}")));
        }

        let parsed: ExchangeResponse = response
            .json()
            .await
            .map_err(|e| IssuerError::Unavailable(format!("malformed exchange response: {e}")))?;
        if parsed.access_token.is_empty() {
            return Err(IssuerError::Rejected("issuer returned an empty token".to_string()));
        }
        let expires_at = self.expiry(&parsed)?;
        Ok(IssuedCredential {
            access_token: parsed.access_token,
            expires_at,
        })
    }
}
