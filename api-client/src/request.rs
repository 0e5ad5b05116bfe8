//! Building and sending requests through an [`ApiClient`].

use http::header::{HeaderName, HeaderValue};
use http::{Method, Uri};

use crate::error::Error;
use crate::response::Response;
use crate::{ApiClient, Authentication};

/// Extension methods for outgoing requests.
pub trait RequestExt {
    /// A body-less copy of the request head, kept alongside the response.
    fn parts(&self) -> http::request::Parts;
}

impl<B> RequestExt for http::Request<B> {
    fn parts(&self) -> http::request::Parts {
        let (mut parts, ()) = http::Request::new(()).into_parts();
        parts.method = self.method().clone();
        parts.uri = self.uri().clone();
        parts.version = self.version();
        parts.headers = self.headers().clone();
        parts
    }
}

/// A request under construction.
///
/// Errors from an invalid URI or header are held until [`RequestBuilder::send`].
#[derive(Debug)]
pub struct RequestBuilder<A> {
    client: ApiClient<A>,
    req: http::request::Builder,
    uri_error: Option<http::Error>,
    body: Option<hyperdriver::Body>,
}

impl<A> RequestBuilder<A> {
    pub(crate) fn new(client: ApiClient<A>, method: Method, uri: Result<Uri, http::Error>) -> Self {
        let req = http::Request::builder().method(method);
        let (req, uri_error) = match uri {
            Ok(uri) => (req.uri(uri), None),
            Err(error) => (req, Some(error)),
        };

        Self {
            client,
            req,
            uri_error,
            body: None,
        }
    }

    /// Add a header.
    pub fn header<K, V>(mut self, key: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        self.req = self.req.header(key, value);
        self
    }

    /// Set the body. Requests without one are sent with an empty body.
    pub fn body<B: Into<hyperdriver::Body>>(mut self, body: B) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Send the request.
    pub async fn send(self) -> Result<Response, Error>
    where
        A: Authentication,
    {
        if let Some(error) = self.uri_error {
            return Err(error.into());
        }

        let req = self
            .req
            .body(self.body.unwrap_or_else(hyperdriver::Body::empty))?;
        self.client.execute(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_copy_request_head() {
        let req = http::Request::put("https://ghcr.io/v2/org/repo/manifests/1.0.0")
            .header(
                http::header::CONTENT_TYPE,
                "application/vnd.oci.image.manifest.v1+json",
            )
            .body(hyperdriver::Body::empty())
            .unwrap();

        let parts = req.parts();
        assert_eq!(parts.method, Method::PUT);
        assert_eq!(parts.uri.path(), "/v2/org/repo/manifests/1.0.0");
        assert_eq!(
            parts.headers[http::header::CONTENT_TYPE],
            "application/vnd.oci.image.manifest.v1+json"
        );
    }
}
