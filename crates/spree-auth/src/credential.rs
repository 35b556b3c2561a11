//! Client-side credentials.
//!
//! A [`ClientJwt`] is the per-call credential: it attaches the current ID
//! token to every outbound call and insists on an encrypted channel. A
//! [`ClientCredential`] pairs it with the OAuth token needed to mint a new one.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

/// Metadata key carrying the token on each call.
pub const AUTHORIZATION_METADATA_KEY: &str = "authorization";

/// The signed ID token a client presents on every call.
///
/// Replaced wholesale on refresh, never mutated.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientJwt {
    token: String,
}

impl ClientJwt {
    /// Wrap an already-issued token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Derive the credential from the `id_token` carried by an OAuth response.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingIdToken`] if the field is absent or empty.
    pub fn from_oauth_token(token: &OAuthToken) -> Result<Self> {
        match token.id_token.as_deref() {
            Some(id_token) if !id_token.is_empty() => Ok(Self::new(id_token)),
            _ => {
                tracing::warn!("id_token field was empty or missing");
                Err(AuthError::MissingIdToken)
            }
        }
    }

    /// The wire token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Metadata to attach to an outbound call.
    #[must_use]
    pub fn request_metadata(&self) -> HashMap<&'static str, String> {
        HashMap::from([(AUTHORIZATION_METADATA_KEY, self.token.clone())])
    }

    /// This credential must never travel over a plaintext channel.
    #[must_use]
    pub const fn requires_transport_security(&self) -> bool {
        true
    }
}

impl fmt::Debug for ClientJwt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientJwt")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// OAuth2 token pair as returned by the token endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    /// Bearer access token.
    pub access_token: String,
    /// Token type, usually `Bearer`.
    #[serde(default)]
    pub token_type: String,
    /// Refresh token used to mint new access and ID tokens.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub refresh_token: String,
    /// When the access token expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
    /// The `id_token` extension field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthToken")
            .field("token_type", &self.token_type)
            .field("expiry", &self.expiry)
            .field("has_refresh_token", &!self.refresh_token.is_empty())
            .field("has_id_token", &self.id_token.is_some())
            .finish_non_exhaustive()
    }
}

/// A persisted client credential: OAuth material plus the derived ID token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCredential {
    /// OAuth token pair, including the refresh token.
    pub oauth_token: OAuthToken,
    /// The ID token presented on calls.
    pub jwt: ClientJwt,
}

impl ClientCredential {
    /// Pair an OAuth token with its derived ID token.
    #[must_use]
    pub const fn new(oauth_token: OAuthToken, jwt: ClientJwt) -> Self {
        Self { oauth_token, jwt }
    }

    /// Build a credential directly from a fresh OAuth response.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingIdToken`] if the response has no `id_token`.
    pub fn from_oauth_token(oauth_token: OAuthToken) -> Result<Self> {
        let jwt = ClientJwt::from_oauth_token(&oauth_token)?;
        Ok(Self::new(oauth_token, jwt))
    }

    /// Whether a refresh produced new material that should be persisted.
    #[must_use]
    pub fn changed_from(&self, previous: &Self) -> bool {
        self.oauth_token.access_token != previous.oauth_token.access_token
            || self.jwt != previous.jwt
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn oauth_token(id_token: Option<&str>) -> OAuthToken {
        OAuthToken {
            access_token: "ya29.access".to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: "1//refresh".to_string(),
            expiry: None,
            id_token: id_token.map(str::to_string),
        }
    }

    #[test]
    fn attaches_authorization_metadata() {
        let jwt = ClientJwt::new("header.claims.sig");
        let metadata = jwt.request_metadata();
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata["authorization"], "header.claims.sig");
        assert!(jwt.requires_transport_security());
    }

    #[test]
    fn derives_from_id_token() {
        let jwt = ClientJwt::from_oauth_token(&oauth_token(Some("id.token.sig"))).unwrap();
        assert_eq!(jwt.token(), "id.token.sig");
    }

    #[test]
    fn missing_or_empty_id_token_rejected() {
        assert!(matches!(
            ClientJwt::from_oauth_token(&oauth_token(None)),
            Err(AuthError::MissingIdToken)
        ));
        assert!(matches!(
            ClientJwt::from_oauth_token(&oauth_token(Some(""))),
            Err(AuthError::MissingIdToken)
        ));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let jwt = ClientJwt::new("secret.token.value");
        assert!(!format!("{jwt:?}").contains("secret"));

        let token = oauth_token(Some("id.token.sig"));
        let debug = format!("{token:?}");
        assert!(!debug.contains("ya29"));
        assert!(!debug.contains("1//refresh"));
    }

    #[test]
    fn credential_json_layout() {
        let credential = ClientCredential::from_oauth_token(oauth_token(Some("id.token.sig"))).unwrap();
        let json = serde_json::to_value(&credential).unwrap();
        assert_eq!(json["jwt"]["token"], "id.token.sig");
        assert_eq!(json["oauth_token"]["access_token"], "ya29.access");
        assert_eq!(json["oauth_token"]["refresh_token"], "1//refresh");
        assert!(json["oauth_token"].get("expiry").is_none());
    }

    #[test]
    fn change_detection() {
        let original = ClientCredential::from_oauth_token(oauth_token(Some("a.b.c"))).unwrap();
        assert!(!original.clone().changed_from(&original));

        let mut refreshed = original.clone();
        refreshed.jwt = ClientJwt::new("d.e.f");
        assert!(refreshed.changed_from(&original));
    }
}
