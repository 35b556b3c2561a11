//! gRPC adapters for spree authentication.
//!
//! - [`GrpcAuthLayer`]: server-side layer that rejects any call without a
//!   valid, authorized token
//! - [`CredentialInterceptor`]: client-side interceptor that attaches the
//!   caller's token to every call
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use spree_auth::{AuthConfig, Authenticator};
//! use spree_grpc::GrpcAuthLayer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthConfig::from_env();
//! let authenticator = Arc::new(Authenticator::from_config(&config)?);
//! let layer = GrpcAuthLayer::new(authenticator, Arc::new(config.allowed_emails));
//! // tonic::transport::Server::builder().layer(layer)...
//! # let _ = layer;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod credentials;
pub mod interceptor;

pub use credentials::{ensure_secure_endpoint, CredentialInterceptor};
pub use interceptor::{
    authenticate, AuthenticatedCaller, GrpcAuthLayer, GrpcAuthService, MAX_TOKEN_SIZE,
    REJECTION_MESSAGE,
};
