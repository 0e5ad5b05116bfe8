//! Responses, paired with the head of the request that produced them.

use http::header::AsHeaderName;
use hyperdriver::Body;

pub mod futures {
    //! Futures which collect a response body and decode it.

    use std::fmt;
    use std::future::Future;
    use std::marker::PhantomData;
    use std::pin::Pin;
    use std::task::{ready, Context, Poll};

    use http_body_util::BodyExt as _;
    use pin_project::pin_project;
    use tower::BoxError;

    /// Turns a fully collected body into a value.
    pub trait Decode {
        /// The decoded value.
        type Output;

        /// Decode the collected bytes.
        fn decode(bytes: bytes::Bytes) -> Result<Self::Output, BoxError>;
    }

    /// Leave the body as raw bytes.
    #[derive(Debug)]
    pub enum Raw {}

    impl Decode for Raw {
        type Output = bytes::Bytes;

        fn decode(bytes: bytes::Bytes) -> Result<Self::Output, BoxError> {
            Ok(bytes)
        }
    }

    /// Decode the body as UTF-8 text.
    #[derive(Debug)]
    pub enum Utf8 {}

    impl Decode for Utf8 {
        type Output = String;

        fn decode(bytes: bytes::Bytes) -> Result<Self::Output, BoxError> {
            String::from_utf8(bytes.to_vec()).map_err(Into::into)
        }
    }

    /// Deserialize the body from JSON.
    #[derive(Debug)]
    pub struct AsJson<T>(PhantomData<fn() -> T>);

    impl<T> Decode for AsJson<T>
    where
        T: serde::de::DeserializeOwned,
    {
        type Output = T;

        fn decode(bytes: bytes::Bytes) -> Result<Self::Output, BoxError> {
            serde_json::from_slice(&bytes).map_err(Into::into)
        }
    }

    /// Collects a body, then decodes it with `D`.
    #[pin_project]
    pub struct Collect<D, Body = hyperdriver::Body>
    where
        Body: http_body::Body,
    {
        #[pin]
        inner: http_body_util::combinators::Collect<Body>,
        _decode: PhantomData<fn() -> D>,
    }

    impl<D, Body> fmt::Debug for Collect<D, Body>
    where
        Body: http_body::Body,
    {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Collect").finish()
        }
    }

    impl<D, Body> From<Body> for Collect<D, Body>
    where
        Body: http_body::Body,
    {
        fn from(body: Body) -> Self {
            Self {
                inner: body.collect(),
                _decode: PhantomData,
            }
        }
    }

    impl<D, Body> Future for Collect<D, Body>
    where
        D: Decode,
        Body: http_body::Body,
        Body::Error: Into<BoxError>,
    {
        type Output = Result<D::Output, BoxError>;

        fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            let collected = ready!(self.project().inner.poll(cx)).map_err(Into::into)?;
            Poll::Ready(D::decode(collected.to_bytes()))
        }
    }

    /// Collect the body as bytes.
    pub type Bytes<Body = hyperdriver::Body> = Collect<Raw, Body>;

    /// Collect the body as a string.
    pub type Text<Body = hyperdriver::Body> = Collect<Utf8, Body>;

    /// Collect the body and deserialize it.
    pub type Json<T, Body = hyperdriver::Body> = Collect<AsJson<T>, Body>;
}

/// Collecting and decoding a response body.
pub trait ResponseBodyExt<Body>
where
    Body: http_body::Body,
{
    /// Collect the body and decode it with `D`.
    fn collect<D>(self) -> self::futures::Collect<D, Body>;

    /// Collect the body as bytes.
    fn bytes(self) -> self::futures::Bytes<Body>
    where
        Self: Sized,
    {
        self.collect()
    }

    /// Collect the body as UTF-8 text.
    fn text(self) -> self::futures::Text<Body>
    where
        Self: Sized,
    {
        self.collect()
    }

    /// Collect the body and deserialize it as JSON.
    fn json<T>(self) -> self::futures::Json<T, Body>
    where
        T: serde::de::DeserializeOwned,
        Self: Sized,
    {
        self.collect()
    }
}

/// Status and headers of a response, and the URI it answered.
pub trait ResponseExt {
    /// Response status.
    fn status(&self) -> http::StatusCode;

    /// Response headers.
    fn headers(&self) -> &http::HeaderMap;

    /// URI of the request which produced this response.
    fn uri(&self) -> &http::Uri;

    /// A header value, if present and visible ASCII.
    fn header<K>(&self, name: K) -> Option<&str>
    where
        K: AsHeaderName,
    {
        self.headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
    }
}

/// An HTTP response paired with the request which produced it.
#[derive(Debug)]
pub struct Response {
    request: http::request::Parts,
    response: http::response::Parts,
    body: Body,
}

impl Response {
    /// Pair `response` with the head of its request.
    pub fn new(request: http::request::Parts, response: http::Response<Body>) -> Self {
        let (response, body) = response.into_parts();
        Self {
            request,
            response,
            body,
        }
    }

    /// Method of the request which produced this response.
    pub fn method(&self) -> &http::Method {
        &self.request.method
    }
}

impl ResponseBodyExt<Body> for Response {
    fn collect<D>(self) -> self::futures::Collect<D> {
        self.body.into()
    }
}

impl ResponseExt for Response {
    fn status(&self) -> http::StatusCode {
        self.response.status
    }

    fn headers(&self) -> &http::HeaderMap {
        &self.response.headers
    }

    fn uri(&self) -> &http::Uri {
        &self.request.uri
    }
}
