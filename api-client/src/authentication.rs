//! Credentials attached to every outgoing request.

use http::header::{InvalidHeaderValue, AUTHORIZATION};
use http::HeaderValue;
use secret::Secret;
use tower::layer::Layer;

/// Adds credentials to a request before it is sent.
pub trait Authentication: Clone {
    /// Return `req` with credentials applied.
    fn authenticate<B>(&self, req: http::Request<B>) -> http::Request<B>;
}

/// An `Authorization: Bearer` header.
///
/// The header value is rendered once and marked sensitive.
///
/// ```rust
/// use api_client::BearerAuth;
///
/// let auth = BearerAuth::new("ghp_token").unwrap();
/// assert_eq!(auth.header_value().to_str().unwrap(), "Bearer ghp_token");
///
/// let auth = BearerAuth::base64("token").unwrap();
/// assert_eq!(auth.header_value().to_str().unwrap(), "Bearer dG9rZW4=");
/// ```
#[derive(Debug, Clone)]
pub struct BearerAuth {
    header: HeaderValue,
}

impl BearerAuth {
    /// Send `token` as is. This is what the Github REST API expects.
    pub fn new<K: Into<Secret>>(token: K) -> Result<Self, InvalidHeaderValue> {
        let mut header = token.into().bearer()?;
        header.set_sensitive(true);
        Ok(BearerAuth { header })
    }

    /// Send the base64 encoding of `token`. This is what the container
    /// registry expects.
    pub fn base64<K: Into<Secret>>(token: K) -> Result<Self, InvalidHeaderValue> {
        Self::new(token.into().base64())
    }

    /// The rendered `Authorization` value.
    pub fn header_value(&self) -> HeaderValue {
        self.header.clone()
    }
}

impl Authentication for BearerAuth {
    fn authenticate<B>(&self, mut req: http::Request<B>) -> http::Request<B> {
        if req.headers().contains_key(AUTHORIZATION) {
            tracing::warn!("{AUTHORIZATION} header already set, leaving it in place");
        } else {
            req.headers_mut().insert(AUTHORIZATION, self.header_value());
        }
        req
    }
}

/// Anonymous requests.
impl Authentication for () {
    fn authenticate<B>(&self, req: http::Request<B>) -> http::Request<B> {
        req
    }
}

/// Applies an [`Authentication`] to each request passing through.
#[derive(Debug, Clone)]
pub struct AuthenticationLayer<A> {
    auth: A,
}

impl<A> AuthenticationLayer<A> {
    /// Authenticate requests with `auth`.
    pub fn new(auth: A) -> Self {
        Self { auth }
    }
}

impl<A: Clone, S> Layer<S> for AuthenticationLayer<A> {
    type Service = AuthenticationService<A, S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthenticationService {
            inner,
            auth: self.auth.clone(),
        }
    }
}

/// Service produced by [`AuthenticationLayer`].
#[derive(Debug, Clone)]
pub struct AuthenticationService<A, S> {
    inner: S,
    auth: A,
}

impl<A, S, BIn, BOut> tower::Service<http::Request<BIn>> for AuthenticationService<A, S>
where
    A: Authentication,
    S: tower::Service<http::Request<BIn>, Response = http::Response<BOut>>,
{
    type Response = http::Response<BOut>;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<BIn>) -> Self::Future {
        self.inner.call(self.auth.authenticate(req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_tokens_are_base64_encoded() {
        let auth = BearerAuth::base64("ghp_token").unwrap();
        let header = auth.header_value();
        assert!(header.is_sensitive());
        assert_eq!(header.to_str().unwrap(), "Bearer Z2hwX3Rva2Vu");
    }

    #[test]
    fn tokens_must_be_header_safe() {
        assert!(BearerAuth::new("line\nbreak").is_err());
    }

    #[test]
    fn existing_authorization_is_kept() {
        let auth = BearerAuth::new("replacement").unwrap();
        let req = http::Request::get("https://ghcr.io/v2/")
            .header(AUTHORIZATION, "Bearer original")
            .body(())
            .unwrap();

        let req = auth.authenticate(req);
        let values: Vec<_> = req
            .headers()
            .get_all(AUTHORIZATION)
            .iter()
            .map(|value| value.to_str().unwrap())
            .collect();
        assert_eq!(values, ["Bearer original"]);
    }

    #[test]
    fn anonymous_requests_are_untouched() {
        let req = ().authenticate(http::Request::get("https://ghcr.io/v2/").body(()).unwrap());
        assert!(req.headers().is_empty());
    }
}
