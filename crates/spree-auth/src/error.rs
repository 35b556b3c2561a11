//! Authentication error types.

use thiserror::Error;

/// A result type using `AuthError`.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors that can occur during authentication.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token names no key ID, or the key ID could not be resolved.
    #[error("unknown jwt signing key")]
    UnknownSigningKey,

    /// The JWT signature does not verify against the resolved key.
    #[error("invalid signature")]
    InvalidSignature,

    /// The JWT issuer does not match the expected value.
    #[error("invalid jwt issuer")]
    InvalidIssuer,

    /// The JWT has expired.
    #[error("token expired")]
    Expired,

    /// The token carries no email claim.
    #[error("jwt token is missing email")]
    MissingEmail,

    /// The token's email is not on the allow-list.
    #[error("jwt token email is for unauthorized user")]
    UnauthorizedEmail,

    /// The token is not a parseable RSA-signed JWT.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// Published key material could not be decoded.
    #[error("invalid key material: {0}")]
    Decode(String),

    /// The OAuth refresh exchange failed.
    #[error("credential refresh failed: {0}")]
    RefreshFailed(String),

    /// The OAuth response did not carry a usable `id_token`.
    #[error("oauth token has no id_token")]
    MissingIdToken,

    /// Network failure talking to the key-set endpoint.
    #[error("transport error: {0}")]
    Transport(String),

    /// A credential that requires TLS was offered for a plaintext channel.
    #[error("credential requires a secure transport")]
    InsecureTransport,

    /// Reading or writing the persisted credential failed.
    #[error("credential storage error: {0}")]
    Storage(String),
}

impl AuthError {
    /// Returns `true` if the caller may succeed by retrying, possibly with a new token.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Expired | Self::Transport(_))
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidIssuer => Self::InvalidIssuer,
            ErrorKind::MissingRequiredClaim(claim) if claim == "iss" => Self::InvalidIssuer,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            _ => Self::MalformedToken(err.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use jsonwebtoken::errors::ErrorKind;

    #[test]
    fn retriable_errors() {
        assert!(AuthError::Expired.is_retriable());
        assert!(AuthError::Transport("reset".into()).is_retriable());
        assert!(!AuthError::InvalidSignature.is_retriable());
        assert!(!AuthError::UnauthorizedEmail.is_retriable());
        assert!(!AuthError::RefreshFailed("revoked".into()).is_retriable());
    }

    #[test]
    fn jwt_error_mapping() {
        let expired: AuthError = jsonwebtoken::errors::Error::from(ErrorKind::ExpiredSignature).into();
        assert!(matches!(expired, AuthError::Expired));

        let issuer: AuthError = jsonwebtoken::errors::Error::from(ErrorKind::InvalidIssuer).into();
        assert!(matches!(issuer, AuthError::InvalidIssuer));

        let missing_iss: AuthError =
            jsonwebtoken::errors::Error::from(ErrorKind::MissingRequiredClaim("iss".into())).into();
        assert!(matches!(missing_iss, AuthError::InvalidIssuer));

        let signature: AuthError =
            jsonwebtoken::errors::Error::from(ErrorKind::InvalidSignature).into();
        assert!(matches!(signature, AuthError::InvalidSignature));

        let garbage: AuthError = jsonwebtoken::errors::Error::from(ErrorKind::InvalidToken).into();
        assert!(matches!(garbage, AuthError::MalformedToken(_)));
    }
}
