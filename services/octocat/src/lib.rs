//! Client for the parts of the Github REST API used when publishing actions.

use std::time::Duration;

use api_client::response::{ResponseBodyExt as _, ResponseExt as _};
use api_client::{ApiClient, BearerAuth, Secret};
use http::header::{self, HeaderName, HeaderValue};
use http::Uri;
use thiserror::Error;
use tower::ServiceBuilder;
use tower_http::set_header::{SetRequestHeader, SetRequestHeaderLayer};
use url::Url;

pub mod models;

pub use crate::models::Repository;

const TIMEOUT: Duration = Duration::from_secs(60);
const GITHUB_ACCEPT: &str = "application/vnd.github+json";
const GITHUB_V3_ACCEPT: &str = "application/vnd.github.v3+json";
const GITHUB_API_VERSION: &str = "2022-11-28";
const GITHUB_API_VERSION_HEADER: &str = "x-github-api-version";

/// Errors that can occur when using the Github client.
#[derive(Debug, Error)]
pub enum Error {
    /// The repository lookup was rejected.
    #[error("Failed to fetch repository metadata due to bad status code: {0}")]
    RepositoryStatus(u16),

    /// The repository lookup returned something other than a repository.
    #[error("Failed to fetch repository metadata: unexpected response format")]
    RepositoryFormat(#[source] tower::BoxError),

    /// The registry URL lookup was rejected.
    #[error("Failed to fetch container registry url due to bad status code: {0}")]
    RegistryStatus(u16),

    /// The registry URL lookup did not return a URL.
    #[error("Failed to fetch container registry url: unexpected response format")]
    RegistryFormat(#[source] tower::BoxError),

    /// The token cannot be sent as an HTTP header.
    #[error("Github token is not a valid header value")]
    Token(#[source] http::header::InvalidHeaderValue),

    /// An error that occurs when sending a request.
    #[error("Sending request: {0}")]
    Request(#[from] api_client::Error),
}

type GithubService<S> = SetRequestHeader<SetRequestHeader<S, HeaderValue>, HeaderValue>;

/// Add the Github media type and API version headers, unless already set.
fn github_headers<S>(inner: S) -> GithubService<S> {
    ServiceBuilder::new()
        .layer(SetRequestHeaderLayer::if_not_present(
            header::ACCEPT,
            HeaderValue::from_static(GITHUB_ACCEPT),
        ))
        .layer(SetRequestHeaderLayer::if_not_present(
            HeaderName::from_static(GITHUB_API_VERSION_HEADER),
            HeaderValue::from_static(GITHUB_API_VERSION),
        ))
        .service(inner)
}

/// A Github client authenticated with a workflow token.
#[derive(Debug, Clone)]
pub struct GithubClient {
    client: ApiClient<BearerAuth>,
}

impl GithubClient {
    /// Create a client for the API rooted at `api_base`.
    pub fn new(api_base: Uri, token: impl Into<Secret>) -> Result<Self, Error> {
        let client = hyperdriver::Client::build_tcp_http()
            .with_default_tls()
            .with_user_agent(format!("action-publisher/{}", env!("CARGO_PKG_VERSION")))
            .with_timeout(TIMEOUT)
            .build_service();

        Self::with_inner_service(api_base, token, client)
    }

    /// Create a client which sends requests through `inner`.
    pub fn with_inner_service<S>(
        api_base: Uri,
        token: impl Into<Secret>,
        inner: S,
    ) -> Result<Self, Error>
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
        let auth = BearerAuth::new(token).map_err(Error::Token)?;
        Ok(Self {
            client: ApiClient::new_with_inner_service(api_base, auth, github_headers(inner)),
        })
    }

    /// Fetch a repository by `owner/name`.
    #[tracing::instrument(skip(self))]
    pub async fn repository(&self, name_with_owner: &str) -> Result<Repository, Error> {
        let response = self
            .client
            .get(&format!("repos/{name_with_owner}"))
            .header(header::ACCEPT, GITHUB_V3_ACCEPT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::RepositoryStatus(response.status().as_u16()));
        }

        let repository: Repository = response.json().await.map_err(Error::RepositoryFormat)?;
        tracing::debug!(
            id = repository.id,
            owner = repository.owner.id,
            "Fetched repository metadata"
        );
        Ok(repository)
    }

    /// The URL of the container registry paired with this Github instance.
    pub async fn container_registry_url(&self) -> Result<Url, Error> {
        let response = self
            .client
            .get("packages/container-registry-url")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::RegistryStatus(response.status().as_u16()));
        }

        let registry: models::ContainerRegistry =
            response.json().await.map_err(Error::RegistryFormat)?;
        Url::parse(&registry.url).map_err(|error| Error::RegistryFormat(error.into()))
    }
}
