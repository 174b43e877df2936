//! Refresh protocol: exchange a refresh token for a new access token.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use super::Credential;
use crate::api::error::truncate_body;

/// Path of the refresh endpoint, relative to the API base URL.
pub const REFRESH_PATH: &str = "refresh";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("No refresh token available")]
    NoToken,

    /// The server rejected the refresh token; the credential is dead.
    #[error("Refresh token rejected (status {status}): {body}")]
    Unauthorized { status: u16, body: String },

    /// Network failure, timeout or server-side error. The refresh token may
    /// still be good.
    #[error("Token refresh failed: {0}")]
    Transient(String),

    #[error("Malformed refresh response: {0}")]
    Malformed(String),
}

impl RefreshError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RefreshError::Transient(_))
    }

    fn from_status(status: StatusCode, body: &str) -> Self {
        let body = truncate_body(body);
        match status.as_u16() {
            429 => RefreshError::Transient(format!("rate limited: {}", body)),
            400..=499 => RefreshError::Unauthorized {
                status: status.as_u16(),
                body,
            },
            _ => RefreshError::Transient(format!("status {}: {}", status, body)),
        }
    }
}

/// Performs one refresh exchange. No retries; retry policy belongs to the
/// caller.
#[async_trait]
pub trait RefreshClient: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<Credential, RefreshError>;
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// `POST {base}/refresh` with `{"refresh_token": ...}`.
#[derive(Clone)]
pub struct HttpRefreshClient {
    client: Client,
    endpoint: Url,
}

impl HttpRefreshClient {
    /// `client` should not be wrapped by the request gateway; refresh calls
    /// are never intercepted.
    pub fn new(client: Client, base_url: &Url) -> anyhow::Result<Self> {
        let endpoint = base_url.join(REFRESH_PATH)?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl RefreshClient for HttpRefreshClient {
    async fn refresh(&self, refresh_token: &str) -> Result<Credential, RefreshError> {
        if refresh_token.is_empty() {
            return Err(RefreshError::NoToken);
        }

        debug!(url = %self.endpoint, "Refreshing access token");
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Refresh request failed to complete");
                RefreshError::Transient(e.to_string())
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RefreshError::Transient(format!("failed to read response body: {}", e)))?;

        if !status.is_success() {
            warn!(status = %status, "Refresh endpoint returned an error");
            return Err(RefreshError::from_status(status, &body));
        }

        let parsed: RefreshResponse = serde_json::from_str(&body)
            .map_err(|e| RefreshError::Malformed(e.to_string()))?;

        let access_token = parsed
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RefreshError::Malformed("missing access_token".to_string()))?;

        // Servers are free not to rotate the refresh token.
        let rotated = parsed.refresh_token.filter(|t| !t.is_empty());
        if rotated.is_some() {
            info!("Access token refreshed, refresh token rotated");
        } else {
            info!("Access token refreshed");
        }
        let refresh_token = rotated.unwrap_or_else(|| refresh_token.to_string());

        Ok(Credential::new(access_token, refresh_token))
    }
}
