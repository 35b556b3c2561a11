//! OAuth2 refresh-token exchange.
//!
//! This module provides the client that trades a stored refresh token for a
//! new access token and ID token at the provider's token endpoint.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use crate::credential::OAuthToken;
use crate::error::{AuthError, Result};

/// Exchanges refresh material for a fresh OAuth token.
#[async_trait]
pub trait OAuthRefresher: Send + Sync {
    /// Trade `current`'s refresh token for a new token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::RefreshFailed`] if the grant is expired, revoked,
    /// or the endpoint cannot be reached.
    async fn refresh(&self, current: &OAuthToken) -> Result<OAuthToken>;
}

/// OAuth client application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthClientConfig {
    /// OAuth client ID.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Token endpoint URL.
    #[serde(default = "OAuthClientConfig::default_token_url")]
    pub token_url: String,
    /// Request timeout in seconds.
    #[serde(default = "OAuthClientConfig::default_timeout")]
    pub timeout_seconds: u64,
}

impl OAuthClientConfig {
    fn default_token_url() -> String {
        "https://oauth2.googleapis.com/token".to_string()
    }

    const fn default_timeout() -> u64 {
        30
    }

    /// Settings for `client_id`/`client_secret` against the default endpoint.
    #[must_use]
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: Self::default_token_url(),
            timeout_seconds: Self::default_timeout(),
        }
    }

    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Raw response from the token endpoint.
#[derive(Debug, Deserialize)]
struct RawTokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    id_token: Option<String>,
}

/// Error response from the token endpoint.
#[derive(Debug, Deserialize)]
struct RawErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Client for the provider's OAuth2 token endpoint.
pub struct OAuthClient {
    config: OAuthClientConfig,
    client: reqwest::Client,
}

impl OAuthClient {
    /// Create a new OAuth client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::RefreshFailed`] if the HTTP client cannot be built.
    pub fn new(config: OAuthClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| AuthError::RefreshFailed(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Handle the HTTP response and convert it to an `OAuthToken`.
    async fn handle_response(response: reqwest::Response, current: &OAuthToken) -> Result<OAuthToken> {
        let status = response.status();

        if status.is_success() {
            let raw: RawTokenResponse = response
                .json()
                .await
                .map_err(|e| AuthError::RefreshFailed(format!("invalid response: {e}")))?;

            let expiry = raw
                .expires_in
                .and_then(|secs| i64::try_from(secs).ok())
                .and_then(chrono::Duration::try_seconds)
                .and_then(|lifetime| Utc::now().checked_add_signed(lifetime));

            return Ok(OAuthToken {
                access_token: raw.access_token,
                token_type: raw.token_type,
                // Providers usually omit the refresh token on refresh; keep ours.
                refresh_token: raw
                    .refresh_token
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| current.refresh_token.clone()),
                expiry,
                id_token: raw.id_token,
            });
        }

        let error_response: Option<RawErrorResponse> = response.json().await.ok();
        match error_response {
            Some(err) => Err(AuthError::RefreshFailed(match err.error_description {
                Some(description) => format!("{}: {description}", err.error),
                None => err.error,
            })),
            None => Err(AuthError::RefreshFailed(format!("HTTP {status}"))),
        }
    }
}

#[async_trait]
impl OAuthRefresher for OAuthClient {
    async fn refresh(&self, current: &OAuthToken) -> Result<OAuthToken> {
        if current.refresh_token.is_empty() {
            return Err(AuthError::RefreshFailed("no refresh token available".to_string()));
        }

        tracing::debug!(url = %self.config.token_url, "Refreshing OAuth token");

        let response = self
            .client
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", current.refresh_token.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::RefreshFailed(format!("request failed: {e}")))?;

        Self::handle_response(response, current).await
    }
}
