//! Command line and environment configuration.

use std::time::Duration;

use api_client::uri::IntoUri as _;
use api_client::{RetryPolicy, Secret, DEFAULT_RETRIES};
use camino::{Utf8Path, Utf8PathBuf};
use clap::builder::FalseyValueParser;
use clap::{ArgAction, Parser};
use http::Uri;
use octocat::GithubClient;
use url::Url;

use crate::Error;

/// Package a Github Action and publish it to the Github container registry.
///
/// Every option can be given through the environment variable a Github Actions
/// runner sets for it.
#[derive(Debug, Clone, Parser)]
#[command(name = "publish-action", version)]
pub struct Args {
    /// Token for the Github API and the container registry.
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Name of the event which triggered the workflow.
    #[arg(long, env = "GITHUB_EVENT_NAME")]
    pub event_name: Option<String>,

    /// Git ref which triggered the workflow.
    #[arg(long = "ref", env = "GITHUB_REF")]
    pub git_ref: Option<String>,

    /// Repository, as `owner/name`.
    #[arg(long, env = "GITHUB_REPOSITORY")]
    pub repository: Option<String>,

    /// Commit being packaged.
    #[arg(long, env = "GITHUB_SHA")]
    pub sha: Option<String>,

    /// Github REST API base URL.
    #[arg(long, env = "GITHUB_API_URL", default_value = "https://api.github.com")]
    pub api_url: String,

    /// Github server URL, used to detect Github Enterprise Server.
    #[arg(long, env = "GITHUB_SERVER_URL", default_value = "https://github.com")]
    pub server_url: String,

    /// Checkout directory.
    #[arg(long, env = "GITHUB_WORKSPACE")]
    pub workspace: Option<Utf8PathBuf>,

    /// Directory for temporary files.
    #[arg(long, env = "RUNNER_TEMP")]
    pub runner_temp: Option<Utf8PathBuf>,

    /// Numeric id of the repository.
    #[arg(long, env = "GITHUB_REPOSITORY_ID")]
    pub repository_id: Option<String>,

    /// Numeric id of the repository owner.
    #[arg(long, env = "GITHUB_REPOSITORY_OWNER_ID")]
    pub repository_owner_id: Option<String>,

    /// Event payload file.
    #[arg(long, env = "GITHUB_EVENT_PATH")]
    pub event_path: Option<Utf8PathBuf>,

    /// File step outputs are appended to.
    #[arg(long, env = "GITHUB_OUTPUT")]
    pub output: Option<Utf8PathBuf>,

    /// Command which prints a signed sigstore bundle for the package.
    #[arg(long, env = "PUBLISHER_ATTEST_COMMAND")]
    pub attest_command: Option<String>,

    /// Retries after a failed registry request.
    #[arg(long, env = "PUBLISHER_RETRIES", default_value_t = DEFAULT_RETRIES)]
    pub retries: usize,

    /// Delay between registry request attempts, in milliseconds.
    #[arg(long, env = "PUBLISHER_BACKOFF_MS", default_value_t = 1000)]
    pub backoff_ms: u64,

    /// Log every registry request. Runners set `RUNNER_DEBUG=1`.
    #[arg(
        long,
        env = "RUNNER_DEBUG",
        action = ArgAction::SetTrue,
        value_parser = FalseyValueParser::new()
    )]
    pub debug: bool,

    /// Log as JSON lines.
    #[arg(
        long,
        env = "PUBLISHER_LOG_JSON",
        action = ArgAction::SetTrue,
        value_parser = FalseyValueParser::new()
    )]
    pub log_json: bool,

    /// Directory to package, relative to the workspace.
    #[arg(default_value = ".")]
    pub path: Utf8PathBuf,
}

fn required<T: AsRef<str>>(name: &'static str, value: Option<T>) -> Result<T, Error> {
    value
        .filter(|value| !value.as_ref().is_empty())
        .ok_or(Error::Missing(name))
}

fn required_path(name: &'static str, value: Option<Utf8PathBuf>) -> Result<Utf8PathBuf, Error> {
    value
        .filter(|value| !value.as_str().is_empty())
        .ok_or(Error::Missing(name))
}

impl Args {
    /// Check that every required setting is present.
    pub fn into_config(self) -> Result<Config, Error> {
        let token = required("GITHUB_TOKEN", self.token)?;
        let event_name = required("event name", self.event_name)?;
        let git_ref = required("GITHUB_REF", self.git_ref)?;
        let repository = required("Repository", self.repository)?;
        let sha = required("GITHUB_SHA", self.sha)?;
        let api_url = required("GITHUB_API_URL", Some(self.api_url))?;
        let server_url = required("GITHUB_SERVER_URL", Some(self.server_url))?;
        let workspace = required_path("GITHUB_WORKSPACE", self.workspace)?;
        let runner_temp = required_path("RUNNER_TEMP", self.runner_temp)?;
        let repository_id = required("GITHUB_REPOSITORY_ID", self.repository_id)?;
        let repository_owner_id =
            required("GITHUB_REPOSITORY_OWNER_ID", self.repository_owner_id)?;

        let api_url = Url::parse(&api_url)
            .map_err(|source| Error::InvalidUrl {
                name: "GITHUB_API_URL",
                value: api_url.clone(),
                source,
            })?
            .into_uri()?;

        Ok(Config {
            token: Secret::from(token),
            event_name,
            git_ref,
            repository,
            sha,
            api_url,
            server_url,
            workspace,
            runner_temp,
            repository_id,
            repository_owner_id,
            event_path: self.event_path.filter(|path| !path.as_str().is_empty()),
            output: self.output.filter(|path| !path.as_str().is_empty()),
            attest_command: self.attest_command.filter(|command| !command.trim().is_empty()),
            retries: self.retries,
            backoff: Duration::from_millis(self.backoff_ms),
            debug: self.debug,
            path: self.path,
        })
    }
}

/// Validated settings for one run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Token for the Github API and the container registry.
    pub token: Secret,
    /// Name of the triggering event.
    pub event_name: String,
    /// Triggering git ref.
    pub git_ref: String,
    /// `owner/name`.
    pub repository: String,
    /// Commit being packaged.
    pub sha: String,
    /// Github REST API base.
    pub api_url: Uri,
    /// Github server URL.
    pub server_url: String,
    /// Checkout directory.
    pub workspace: Utf8PathBuf,
    /// Directory for temporary files.
    pub runner_temp: Utf8PathBuf,
    /// Repository id from the environment.
    pub repository_id: String,
    /// Owner id from the environment.
    pub repository_owner_id: String,
    /// Event payload file.
    pub event_path: Option<Utf8PathBuf>,
    /// Step outputs file.
    pub output: Option<Utf8PathBuf>,
    /// Attestation command line.
    pub attest_command: Option<String>,
    /// Registry request retries.
    pub retries: usize,
    /// Delay between registry request attempts.
    pub backoff: Duration,
    /// Log every registry request.
    pub debug: bool,
    /// Directory to package, relative to the workspace.
    pub path: Utf8PathBuf,
}

impl Config {
    /// Whether this is Github Enterprise Server rather than github.com or a
    /// `ghe.com` tenant.
    pub fn is_enterprise(&self) -> bool {
        !self.server_url.contains("https://github.com") && !self.server_url.ends_with(".ghe.com")
    }

    /// The directory to package.
    pub fn package_dir(&self) -> Utf8PathBuf {
        self.workspace.join(&self.path)
    }

    /// Event payload file, if any.
    pub fn event_path(&self) -> Option<&Utf8Path> {
        self.event_path.as_deref()
    }

    /// Registry retry policy for this run.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, self.backoff)
    }
}

/// Settings completed from the Github API.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// Local settings.
    pub config: Config,
    /// The container registry paired with this Github instance.
    pub container_registry_url: Url,
    /// `public`, `internal` or `private`.
    pub repository_visibility: String,
    /// Running against Github Enterprise Server.
    pub is_enterprise: bool,
}

impl PublishOptions {
    /// Look up the registry and repository, and check the repository matches
    /// the environment.
    pub async fn resolve(config: Config, github: &GithubClient) -> Result<Self, Error> {
        let container_registry_url = github.container_registry_url().await?;
        let repository = github.repository(&config.repository).await?;

        let repository_visibility = required("repository visibility", repository.visibility)?;
        if repository.id.to_string() != config.repository_id {
            return Err(Error::RepositoryIdMismatch);
        }
        if repository.owner.id.to_string() != config.repository_owner_id {
            return Err(Error::OwnerIdMismatch);
        }

        let is_enterprise = config.is_enterprise();
        tracing::info!(
            repository = %config.repository,
            event = %config.event_name,
            git_ref = %config.git_ref,
            sha = %config.sha,
            api = %config.api_url,
            registry = %container_registry_url,
            visibility = %repository_visibility,
            is_enterprise,
            "Resolved publish options"
        );

        Ok(Self {
            config,
            container_registry_url,
            repository_visibility,
            is_enterprise,
        })
    }
}
