//! Github API object models.

use serde::Deserialize;

/// The fields of `GET /repos/{owner}/{repo}` the publisher relies on.
#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    /// Repository ID.
    pub id: u64,

    /// Account owning the repository.
    pub owner: Owner,

    /// `public`, `internal` or `private`.
    #[serde(default)]
    pub visibility: Option<String>,
}

/// Account owning a repository.
#[derive(Debug, Clone, Deserialize)]
pub struct Owner {
    /// Account ID.
    pub id: u64,

    /// Account login.
    #[serde(default)]
    pub login: Option<String>,
}

/// Response of `GET /packages/container-registry-url`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ContainerRegistry {
    pub(crate) url: String,
}
