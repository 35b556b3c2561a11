//! Server-side authentication for gRPC.
//!
//! Reads the `authorization` metadata entry, validates the token, and checks
//! the caller against the allow-list before any handler runs.
//!
//! # Security
//!
//! - Every request needs a valid, authorized token
//! - Every failure surfaces as the same UNAUTHENTICATED status; the precise
//!   cause is only logged at debug level

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::HeaderMap;
use spree_auth::{AllowList, AuthError, Authenticator, AUTHORIZATION_METADATA_KEY};
use tonic::body::BoxBody;
use tonic::Status;
use tower::{Layer, Service};
use tracing::instrument;

/// Maximum token size in bytes (8KB).
pub const MAX_TOKEN_SIZE: usize = 8192;

/// Message returned with every rejection.
pub const REJECTION_MESSAGE: &str = "valid token required";

/// Identity of an authorized caller, stored in request extensions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatedCaller {
    /// The caller's email as it appeared in the token.
    pub email: String,
}

/// Validate and authorize the token carried in `headers`.
///
/// # Errors
///
/// Returns the first failure: a missing, repeated or oversize header, or any
/// validation or authorization error from the [`Authenticator`].
#[instrument(skip_all, name = "spree.grpc.authenticate")]
pub async fn authenticate(
    headers: &HeaderMap,
    authenticator: &Authenticator,
    allowed: &AllowList,
) -> Result<AuthenticatedCaller, AuthError> {
    let token = extract_token(headers)?;
    let parsed = authenticator.validate_token(token).await?;
    authenticator.is_authorized_token(&parsed, allowed).await?;

    let email = parsed.email().ok_or(AuthError::MissingEmail)?.to_string();
    Ok(AuthenticatedCaller { email })
}

/// Pull the token from a single-valued `authorization` entry, accepting
/// both the raw token and `Bearer <token>`.
fn extract_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let mut values = headers.get_all(AUTHORIZATION_METADATA_KEY).iter();
    let value = match (values.next(), values.next()) {
        (Some(value), None) => value,
        (None, _) => return Err(AuthError::MalformedToken("missing authorization".into())),
        (Some(_), Some(_)) => {
            return Err(AuthError::MalformedToken("repeated authorization".into()))
        }
    };

    let raw = value
        .to_str()
        .map_err(|_| AuthError::MalformedToken("non-ASCII authorization".into()))?;
    let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();

    if token.is_empty() {
        return Err(AuthError::MalformedToken("empty token".into()));
    }
    if token.len() > MAX_TOKEN_SIZE {
        return Err(AuthError::MalformedToken(format!(
            "token of {} bytes exceeds limit",
            token.len()
        )));
    }
    Ok(token)
}

/// Tower layer that authenticates every gRPC request.
#[derive(Clone)]
pub struct GrpcAuthLayer {
    authenticator: Arc<Authenticator>,
    allowed: Arc<AllowList>,
}

impl GrpcAuthLayer {
    /// Create a layer sharing `authenticator` (and its key cache).
    #[must_use]
    pub const fn new(authenticator: Arc<Authenticator>, allowed: Arc<AllowList>) -> Self {
        Self {
            authenticator,
            allowed,
        }
    }
}

impl<S> Layer<S> for GrpcAuthLayer {
    type Service = GrpcAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GrpcAuthService {
            inner,
            authenticator: Arc::clone(&self.authenticator),
            allowed: Arc::clone(&self.allowed),
        }
    }
}

/// Service produced by [`GrpcAuthLayer`].
#[derive(Clone)]
pub struct GrpcAuthService<S> {
    inner: S,
    authenticator: Arc<Authenticator>,
    allowed: Arc<AllowList>,
}

impl<S, ReqBody> Service<http::Request<ReqBody>> for GrpcAuthService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<BoxBody>>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<ReqBody>) -> Self::Future {
        // Take the service that was driven to readiness, leave a fresh clone.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let authenticator = Arc::clone(&self.authenticator);
        let allowed = Arc::clone(&self.allowed);

        Box::pin(async move {
            let caller = match authenticate(req.headers(), &authenticator, &allowed).await {
                Ok(caller) => caller,
                Err(e) => {
                    tracing::debug!(target: "spree.grpc.auth", error = %e, "Rejected request");
                    return Ok(unauthenticated_response());
                }
            };

            tracing::trace!(target: "spree.grpc.auth", email = %caller.email, "Authorized request");

            let (mut parts, body) = req.into_parts();
            parts.extensions.insert(caller);
            inner.call(http::Request::from_parts(parts, body)).await
        })
    }
}

fn unauthenticated_response() -> http::Response<BoxBody> {
    Status::unauthenticated(REJECTION_MESSAGE).into_http()
}
