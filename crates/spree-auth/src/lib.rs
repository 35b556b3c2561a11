//! Token authentication for spree services.
//!
//! This crate provides RSA ID-token validation against a single issuer,
//! including:
//!
//! - Decoding of published RSA signing keys
//! - A rate-limited, self-refreshing signing-key cache
//! - Issuer, expiry and allow-list checks
//! - Client credentials with OAuth refresh and on-disk persistence
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐
//! │   gRPC server    │────▶│  Authenticator   │
//! │   (auth layer)   │     │                  │
//! └──────────────────┘     └────────┬─────────┘
//!                                   │ KeyResolver
//!                          ┌────────▼─────────┐
//!                          │ SigningKeyCache  │
//!                          │ (rate-limited)   │
//!                          └────────┬─────────┘
//!                                   │ HTTPS
//!                          ┌────────▼─────────┐
//!                          │   Issuer key     │
//!                          │   set endpoint   │
//!                          └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use spree_auth::{AuthConfig, Authenticator};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthConfig::from_env();
//! let authenticator = Authenticator::from_config(&config)?;
//!
//! // In a request handler:
//! let token = "eyJhbGciOiJSUzI1NiIsImtpZCI6ImtpZC0xIn0...";
//! let parsed = authenticator.validate_token(token).await?;
//! authenticator
//!     .is_authorized_token(&parsed, &config.allowed_emails)
//!     .await?;
//!
//! println!("Caller: {:?}", parsed.email());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod allow_list;
pub mod credential;
pub mod error;
pub mod jwks;
pub mod jwt;
pub mod keys;
pub mod oauth;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

use std::time::Duration;

use serde::Deserialize;

pub use allow_list::AllowList;
pub use credential::{ClientCredential, ClientJwt, OAuthToken, AUTHORIZATION_METADATA_KEY};
pub use error::{AuthError, Result};
pub use jwks::{
    HttpKeySetSource, JwkSet, KeyResolver, KeySetSource, SigningKeyCache, StaticKeyResolver,
};
pub use jwt::{Authenticator, ParsedToken, TokenClaims};
pub use keys::{decode_rsa_components, RsaPublicKey};
pub use oauth::{OAuthClient, OAuthClientConfig, OAuthRefresher};
pub use store::CredentialStore;

/// Configuration for token authentication.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Expected `iss` claim.
    #[serde(default = "AuthConfig::default_issuer")]
    pub issuer: String,

    /// URL of the issuer's published key set.
    #[serde(default = "AuthConfig::default_key_set_url")]
    pub key_set_url: String,

    /// Minimum spacing between key-set fetches, in seconds.
    #[serde(default = "AuthConfig::default_refresh_interval")]
    pub refresh_interval_seconds: u64,

    /// Upper bound on a single key-set fetch, in seconds.
    #[serde(default = "AuthConfig::default_fetch_timeout")]
    pub fetch_timeout_seconds: u64,

    /// Clock skew tolerated on `exp`, in seconds.
    #[serde(default)]
    pub leeway_seconds: u64,

    /// Caller emails permitted past authorization.
    #[serde(default)]
    pub allowed_emails: AllowList,
}

impl AuthConfig {
    fn default_issuer() -> String {
        "accounts.google.com".to_string()
    }

    fn default_key_set_url() -> String {
        "https://www.googleapis.com/oauth2/v3/certs".to_string()
    }

    const fn default_refresh_interval() -> u64 {
        5
    }

    const fn default_fetch_timeout() -> u64 {
        10
    }

    /// Defaults overridden by `SPREE_AUTH_ISSUER`, `SPREE_AUTH_KEYS_URL` and
    /// `SPREE_ALLOWED_EMAILS` (comma separated).
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`AuthConfig::from_env`], reading variables through `lookup`.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(issuer) = lookup("SPREE_AUTH_ISSUER") {
            config.issuer = issuer;
        }
        if let Some(url) = lookup("SPREE_AUTH_KEYS_URL") {
            config.key_set_url = url;
        }
        if let Some(emails) = lookup("SPREE_ALLOWED_EMAILS") {
            config.allowed_emails = AllowList::from_csv(&emails);
        }
        config
    }

    /// Get the refresh interval as a `Duration`.
    #[must_use]
    pub const fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds)
    }

    /// Get the fetch timeout as a `Duration`.
    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }

    /// The configured allow-list.
    #[must_use]
    pub const fn allowed_emails(&self) -> &AllowList {
        &self.allowed_emails
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: Self::default_issuer(),
            key_set_url: Self::default_key_set_url(),
            refresh_interval_seconds: Self::default_refresh_interval(),
            fetch_timeout_seconds: Self::default_fetch_timeout(),
            leeway_seconds: 0,
            allowed_emails: AllowList::default(),
        }
    }
}
