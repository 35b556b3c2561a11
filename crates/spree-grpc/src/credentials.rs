//! Client-side credential attachment.

use http::Uri;
use spree_auth::{AuthError, ClientJwt};
use tonic::metadata::{Ascii, MetadataValue};
use tonic::service::Interceptor;
use tonic::{Request, Status};

/// Refuse to attach `jwt` to a call bound for a plaintext endpoint.
///
/// # Errors
///
/// Returns [`AuthError::InsecureTransport`] unless `endpoint` uses `https`.
pub fn ensure_secure_endpoint(endpoint: &Uri, jwt: &ClientJwt) -> Result<(), AuthError> {
    if jwt.requires_transport_security() && endpoint.scheme_str() != Some("https") {
        tracing::warn!(endpoint = %endpoint, "Refusing to send credential over plaintext");
        return Err(AuthError::InsecureTransport);
    }
    Ok(())
}

/// Attaches a [`ClientJwt`] to every outbound call.
///
/// Holds only the metadata of one token; build a new interceptor after a
/// refresh.
#[derive(Clone, Debug)]
pub struct CredentialInterceptor {
    metadata: Vec<(&'static str, MetadataValue<Ascii>)>,
}

impl CredentialInterceptor {
    /// Prepare the metadata for `jwt`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedToken`] if the token is not valid
    /// metadata.
    pub fn new(jwt: &ClientJwt) -> Result<Self, AuthError> {
        let metadata = jwt
            .request_metadata()
            .into_iter()
            .map(|(key, value)| {
                MetadataValue::try_from(value)
                    .map(|value| (key, value))
                    .map_err(|e| AuthError::MalformedToken(e.to_string()))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { metadata })
    }

    /// Like [`CredentialInterceptor::new`], after checking that `endpoint`
    /// is secure.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InsecureTransport`] for a non-`https` endpoint.
    pub fn for_endpoint(endpoint: &Uri, jwt: &ClientJwt) -> Result<Self, AuthError> {
        ensure_secure_endpoint(endpoint, jwt)?;
        Self::new(jwt)
    }
}

impl Interceptor for CredentialInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        for (key, value) in &self.metadata {
            request.metadata_mut().insert(*key, value.clone());
        }
        Ok(request)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn attaches_token() {
        let jwt = ClientJwt::new("header.claims.sig");
        let mut interceptor = CredentialInterceptor::new(&jwt).unwrap();

        let request = interceptor.call(Request::new(())).unwrap();
        assert_eq!(
            request.metadata().get("authorization").unwrap(),
            "header.claims.sig"
        );
    }

    #[test]
    fn replaces_existing_authorization() {
        let mut interceptor = CredentialInterceptor::new(&ClientJwt::new("new.token.sig")).unwrap();
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert("authorization", "old.token.sig".parse().unwrap());

        let request = interceptor.call(request).unwrap();
        let values: Vec<_> = request.metadata().get_all("authorization").iter().collect();
        assert_eq!(values, vec!["new.token.sig"]);
    }

    #[test]
    fn invalid_metadata_rejected() {
        let err = CredentialInterceptor::new(&ClientJwt::new("line\nbreak")).unwrap_err();
        assert!(matches!(err, AuthError::MalformedToken(_)));
    }

    #[test]
    fn plaintext_endpoint_refused() {
        let jwt = ClientJwt::new("a.b.c");
        let plaintext: Uri = "http://api.example.com:443".parse().unwrap();
        let secure: Uri = "https://api.example.com".parse().unwrap();

        assert!(matches!(
            ensure_secure_endpoint(&plaintext, &jwt),
            Err(AuthError::InsecureTransport)
        ));
        assert!(ensure_secure_endpoint(&secure, &jwt).is_ok());
        assert!(matches!(
            CredentialInterceptor::for_endpoint(&plaintext, &jwt),
            Err(AuthError::InsecureTransport)
        ));
        assert!(CredentialInterceptor::for_endpoint(&secure, &jwt).is_ok());
    }
}
