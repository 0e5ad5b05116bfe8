//! An authenticated HTTP client for JSON and registry APIs.
//!
//! [`ApiClient`] wraps a `hyperdriver` client service with an
//! [`Authentication`] layer and a base URI. Requests are built with
//! [`RequestBuilder`] and come back as [`response::Response`], which keeps the
//! request head around for error reporting.
//!
//! Retrying is not part of the service stack. Callers wrap the request they
//! want retried in [`RetryPolicy::execute`], so the retry decision can look at
//! the whole response.

use std::marker::PhantomData;

use http::{Method, Uri};
use hyperdriver::service::SharedService;
pub use secret::Secret;
use tower::ServiceExt as _;

mod authentication;
pub mod error;
pub mod mock;
pub mod request;
pub mod response;
mod retry;
pub mod uri;

pub use self::authentication::{
    Authentication, AuthenticationLayer, AuthenticationService, BearerAuth,
};
pub use self::error::{Cancelled, Error};
pub use self::request::{RequestBuilder, RequestExt};
use self::response::Response;
pub use self::retry::{
    is_retryable_status, Retryable, RetryPolicy, Verdict, DEFAULT_BACKOFF, DEFAULT_RETRIES,
};
use self::uri::UriExtension as _;

/// A client for one API, rooted at a base URI.
///
/// `A` is applied as a layer of the inner service when the client is built.
/// Clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct ApiClient<A> {
    base: Uri,
    inner: hyperdriver::client::SharedClientService<hyperdriver::Body, hyperdriver::Body>,
    authentication: PhantomData<fn() -> A>,
}

impl<A> ApiClient<A>
where
    A: Authentication + Send + Sync + 'static,
{
    /// Connect over TCP, with TLS where the URI asks for it.
    pub fn new(base: Uri, authentication: A) -> Self {
        let inner = hyperdriver::Client::build_tcp_http()
            .with_default_tls()
            .layer(AuthenticationLayer::new(authentication.clone()))
            .build_service();

        ApiClient {
            base,
            inner,
            authentication: PhantomData,
        }
    }

    /// Send requests through `inner` instead of the network.
    pub fn new_with_inner_service<S>(base: Uri, authentication: A, inner: S) -> Self
    where
        S: tower::Service<
                http::Request<hyperdriver::Body>,
                Response = http::Response<hyperdriver::Body>,
                Error = hyperdriver::client::Error,
            > + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        let inner = tower::ServiceBuilder::new()
            .layer(SharedService::layer())
            .layer(AuthenticationLayer::new(authentication.clone()))
            .service(inner);

        ApiClient {
            base,
            inner,
            authentication: PhantomData,
        }
    }
}

impl<A> ApiClient<A>
where
    A: Authentication,
{
    /// The base URI endpoints are joined onto.
    pub fn base(&self) -> &Uri {
        &self.base
    }

    fn endpoint(&self, method: Method, endpoint: &str) -> RequestBuilder<A> {
        RequestBuilder::new(self.clone(), method, self.base.join(endpoint))
    }

    /// GET an endpoint relative to the base URI.
    pub fn get(&self, endpoint: &str) -> RequestBuilder<A> {
        self.endpoint(Method::GET, endpoint)
    }

    /// HEAD an endpoint relative to the base URI.
    pub fn head(&self, endpoint: &str) -> RequestBuilder<A> {
        self.endpoint(Method::HEAD, endpoint)
    }

    /// PUT to an endpoint relative to the base URI.
    pub fn put(&self, endpoint: &str) -> RequestBuilder<A> {
        self.endpoint(Method::PUT, endpoint)
    }

    /// POST to an endpoint relative to the base URI.
    pub fn post(&self, endpoint: &str) -> RequestBuilder<A> {
        self.endpoint(Method::POST, endpoint)
    }

    /// A request to an absolute URI, such as an upload location.
    pub fn request(&self, method: Method, uri: Uri) -> RequestBuilder<A> {
        RequestBuilder::new(self.clone(), method, Ok(uri))
    }

    /// Send a fully formed request.
    pub async fn execute(&self, req: http::Request<hyperdriver::Body>) -> Result<Response, Error> {
        let parts = req.parts();
        let response = self.inner.clone().oneshot(req).await?;
        Ok(Response::new(parts, response))
    }
}
