//! Token validation, authorization, and credential refresh.
//!
//! Every validation starts from the wire string: only signing keys are
//! cached, never validation results.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde::Deserialize;

use crate::allow_list::AllowList;
use crate::credential::{ClientCredential, ClientJwt};
use crate::error::{AuthError, Result};
use crate::jwks::{KeyResolver, SigningKeyCache};
use crate::keys::RsaPublicKey;
use crate::oauth::OAuthRefresher;
use crate::AuthConfig;

/// Claims read from a validated token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenClaims {
    /// Issuer.
    #[serde(default)]
    pub iss: String,
    /// Subject (the provider's account ID).
    #[serde(default)]
    pub sub: Option<String>,
    /// Caller email, checked against the allow-list.
    #[serde(default)]
    pub email: Option<String>,
    /// Expiration timestamp.
    pub exp: i64,
    /// Issued-at timestamp.
    #[serde(default)]
    pub iat: Option<i64>,
}

/// Email-only view used when re-reading a token during authorization.
#[derive(Debug, Deserialize)]
struct EmailClaims {
    #[serde(default)]
    email: Option<String>,
}

/// A token whose signature, issuer and expiry have been checked.
#[derive(Debug, Clone)]
pub struct ParsedToken {
    raw: String,
    key_id: String,
    algorithm: Algorithm,
    claims: TokenClaims,
}

impl ParsedToken {
    /// The wire token.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// ID of the key that signed the token.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// The validated claim set.
    #[must_use]
    pub const fn claims(&self) -> &TokenClaims {
        &self.claims
    }

    /// The email claim, if present and non-empty.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.claims.email.as_deref().filter(|e| !e.is_empty())
    }

    /// When the token expires.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.claims.exp, 0)
    }
}

/// Validates RSA-signed ID tokens from a single issuer.
///
/// The key resolver is owned here and shared by handle with whatever serves
/// inbound calls, so independent instances never share hidden state.
pub struct Authenticator {
    keys: Arc<dyn KeyResolver>,
    issuer: String,
    leeway_seconds: u64,
}

impl Authenticator {
    /// Create an authenticator expecting tokens from `issuer`.
    #[must_use]
    pub fn new(keys: Arc<dyn KeyResolver>, issuer: impl Into<String>) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            leeway_seconds: 0,
        }
    }

    /// Allow `seconds` of clock skew when checking expiry.
    #[must_use]
    pub const fn with_leeway(mut self, seconds: u64) -> Self {
        self.leeway_seconds = seconds;
        self
    }

    /// Create an authenticator backed by a [`SigningKeyCache`] on the
    /// configured key-set URL. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let cache = SigningKeyCache::from_config(config)?;
        Ok(Self::new(Arc::new(cache), config.issuer.clone()).with_leeway(config.leeway_seconds))
    }

    /// The expected issuer.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Validate a wire token's signature, issuer and expiry.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MalformedToken`] if the token cannot be parsed or is not RSA-signed
    /// - [`AuthError::UnknownSigningKey`] if the header has no key ID or the key is unknown
    /// - [`AuthError::InvalidSignature`], [`AuthError::InvalidIssuer`], [`AuthError::Expired`]
    pub async fn validate_token(&self, token: &str) -> Result<ParsedToken> {
        let header = decode_header(token).map_err(|e| AuthError::MalformedToken(e.to_string()))?;
        let algorithm = rsa_algorithm(header.alg)?;

        let key_id = header
            .kid
            .filter(|kid| !kid.is_empty())
            .ok_or(AuthError::UnknownSigningKey)?;
        let key = self.resolve(&key_id).await?;

        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        validation.validate_aud = false;
        validation.leeway = self.leeway_seconds;

        let data = decode::<TokenClaims>(token, key.decoding_key(), &validation)?;

        Ok(ParsedToken {
            raw: token.to_string(),
            key_id,
            algorithm,
            claims: data.claims,
        })
    }

    /// Check a validated token's email against `allowed`.
    ///
    /// Re-resolves the signing key and re-verifies the signature before
    /// reading the email. Returns `Ok(())` only when authorized.
    ///
    /// # Errors
    ///
    /// - [`AuthError::UnknownSigningKey`] if the signing key no longer resolves
    /// - [`AuthError::MissingEmail`] if the token has no email claim
    /// - [`AuthError::UnauthorizedEmail`] if the email is not on the list
    pub async fn is_authorized_token(&self, parsed: &ParsedToken, allowed: &AllowList) -> Result<()> {
        let key = self.resolve(&parsed.key_id).await?;

        let mut validation = Validation::new(parsed.algorithm);
        validation.set_required_spec_claims::<&str>(&[]);
        validation.validate_exp = false;
        validation.validate_aud = false;

        let data = decode::<EmailClaims>(&parsed.raw, key.decoding_key(), &validation)?;
        let email = data
            .claims
            .email
            .filter(|e| !e.is_empty())
            .ok_or(AuthError::MissingEmail)?;

        if allowed.contains(&email) {
            Ok(())
        } else {
            Err(AuthError::UnauthorizedEmail)
        }
    }

    /// Return `current` if its token still validates, otherwise mint a new
    /// credential through `refresher`.
    ///
    /// # Errors
    ///
    /// Errors from the OAuth exchange propagate unchanged;
    /// [`AuthError::MissingIdToken`] if the new OAuth token has no ID token.
    pub async fn refresh_credential(
        &self,
        current: &ClientCredential,
        refresher: &dyn OAuthRefresher,
    ) -> Result<ClientCredential> {
        match self.validate_token(current.jwt.token()).await {
            Ok(_) => {
                tracing::debug!("Held token is still valid");
                return Ok(current.clone());
            }
            Err(reason) => {
                tracing::info!(reason = %reason, "Held token rejected, refreshing credential");
            }
        }

        let oauth_token = refresher.refresh(&current.oauth_token).await?;
        let jwt = ClientJwt::from_oauth_token(&oauth_token)?;
        Ok(ClientCredential::new(oauth_token, jwt))
    }

    async fn resolve(&self, kid: &str) -> Result<RsaPublicKey> {
        self.keys.resolve(kid).await.ok_or_else(|| {
            tracing::debug!(kid = %kid, "Signing key not found");
            AuthError::UnknownSigningKey
        })
    }
}

fn rsa_algorithm(alg: Algorithm) -> Result<Algorithm> {
    match alg {
        Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => Ok(alg),
        other => Err(AuthError::MalformedToken(format!(
            "unsupported algorithm {other:?}"
        ))),
    }
}
