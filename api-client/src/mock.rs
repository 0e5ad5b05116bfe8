//! A scripted, recording stand-in for the HTTP transport.
//!
//! Routes are keyed by method and path. Each route holds a queue of responses;
//! responses are served in order and the last one repeats. A route with the path
//! `*` answers any path for its method when no exact route matches. Requests
//! without a route receive `501 Not Implemented`.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use http_body_util::BodyExt as _;
use parking_lot::Mutex;

/// Path which matches every request for a method.
pub const ANY_PATH: &str = "*";

/// A canned response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl MockResponse {
    /// An empty response with `status`.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Add a response header.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (HeaderName::try_from(name), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => tracing::warn!("ignoring invalid mock header {name}: {value}"),
        }
        self
    }

    /// Set the response body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    fn render(&self) -> http::Response<hyperdriver::Body> {
        let mut response = http::Response::new(hyperdriver::Body::from(self.body.clone()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response
    }
}

/// A request seen by the mock.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Request method.
    pub method: Method,

    /// Full request URI.
    pub uri: Uri,

    /// Request headers, after authentication was applied.
    pub headers: HeaderMap,

    /// Request body. Empty until the body has been read, or if reading it failed.
    pub body: Bytes,
}

impl RecordedRequest {
    /// A header value as a string, if present.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

#[derive(Debug)]
struct Route {
    method: Method,
    path: String,
    responses: VecDeque<MockResponse>,
}

impl Route {
    fn next(&mut self) -> Option<MockResponse> {
        if self.responses.len() > 1 {
            self.responses.pop_front()
        } else {
            self.responses.front().cloned()
        }
    }
}

#[derive(Debug, Default)]
struct State {
    routes: Vec<Route>,
    requests: Vec<RecordedRequest>,
}

impl State {
    fn respond(&mut self, method: &Method, path: &str) -> Option<MockResponse> {
        let exact = self
            .routes
            .iter()
            .position(|route| route.method == *method && route.path == path);
        let index = exact.or_else(|| {
            self.routes
                .iter()
                .position(|route| route.method == *method && route.path == ANY_PATH)
        })?;
        self.routes[index].next()
    }
}

/// A `tower::Service` serving scripted responses.
///
/// Clones share routes and the request log, so a test can keep one handle
/// while the client owns another.
#[derive(Debug, Default, Clone)]
pub struct MockService {
    state: Arc<Mutex<State>>,
}

impl MockService {
    /// A mock with no routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `response` for requests to `method path`.
    pub fn add(&self, method: Method, path: &str, response: MockResponse) {
        let mut state = self.state.lock();
        match state
            .routes
            .iter_mut()
            .find(|route| route.method == method && route.path == path)
        {
            Some(route) => route.responses.push_back(response),
            None => state.routes.push(Route {
                method,
                path: path.to_owned(),
                responses: VecDeque::from([response]),
            }),
        }
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    /// Number of requests received for `method`.
    pub fn count(&self, method: &Method) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|req| req.method == *method)
            .count()
    }

    /// Number of requests received for `method path`.
    pub fn count_path(&self, method: &Method, path: &str) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|req| req.method == *method && req.uri.path() == path)
            .count()
    }
}

impl tower::Service<http::Request<hyperdriver::Body>> for MockService {
    type Response = http::Response<hyperdriver::Body>;
    type Error = hyperdriver::client::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<hyperdriver::Body>) -> Self::Future {
        let mut state = self.state.lock();
        let index = state.requests.len();
        state.requests.push(RecordedRequest {
            method: req.method().clone(),
            uri: req.uri().clone(),
            headers: req.headers().clone(),
            body: Bytes::new(),
        });

        let response = match state.respond(req.method(), req.uri().path()) {
            Some(response) => response.render(),
            None => {
                tracing::warn!("no mock route for {} {}", req.method(), req.uri());
                MockResponse::new(StatusCode::NOT_IMPLEMENTED)
                    .body(format!("no mock route for {} {}", req.method(), req.uri().path()))
                    .render()
            }
        };

        drop(state);

        let shared = self.state.clone();
        Box::pin(async move {
            if let Ok(collected) = req.into_body().collect().await {
                shared.lock().requests[index].body = collected.to_bytes();
            }
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use tower::ServiceExt as _;

    use super::*;

    fn request(method: Method, uri: &str) -> http::Request<hyperdriver::Body> {
        http::Request::builder()
            .method(method)
            .uri(uri)
            .body(hyperdriver::Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn responses_are_served_in_order_and_the_last_repeats() {
        let mock = MockService::new();
        mock.add(Method::GET, "/a", MockResponse::new(StatusCode::SERVICE_UNAVAILABLE));
        mock.add(Method::GET, "/a", MockResponse::new(StatusCode::OK));

        let mut statuses = Vec::new();
        for _ in 0..3 {
            let res = mock
                .clone()
                .oneshot(request(Method::GET, "http://mock/a"))
                .await
                .unwrap();
            statuses.push(res.status());
        }

        assert_eq!(
            statuses,
            [StatusCode::SERVICE_UNAVAILABLE, StatusCode::OK, StatusCode::OK]
        );
        assert_eq!(mock.count(&Method::GET), 3);
    }

    #[tokio::test]
    async fn wildcard_and_unrouted_requests() {
        let mock = MockService::new();
        mock.add(Method::HEAD, ANY_PATH, MockResponse::new(StatusCode::NOT_FOUND));
        mock.add(Method::HEAD, "/exists", MockResponse::new(StatusCode::OK));

        let res = mock
            .clone()
            .oneshot(request(Method::HEAD, "http://mock/exists"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = mock
            .clone()
            .oneshot(request(Method::HEAD, "http://mock/other"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = mock
            .clone()
            .oneshot(request(Method::POST, "http://mock/other"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_IMPLEMENTED);

        assert_eq!(mock.count_path(&Method::HEAD, "/other"), 1);
        assert_eq!(mock.requests().len(), 3);
    }

    #[tokio::test]
    async fn request_bodies_are_recorded() {
        let mock = MockService::new();
        mock.add(Method::PUT, ANY_PATH, MockResponse::new(StatusCode::CREATED));

        let req = http::Request::builder()
            .method(Method::PUT)
            .uri("http://mock/blob")
            .body(hyperdriver::Body::from(Bytes::from_static(b"layer")))
            .unwrap();
        let res = mock.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);

        let requests = mock.requests();
        assert_eq!(requests[0].body, Bytes::from_static(b"layer"));
    }
}
