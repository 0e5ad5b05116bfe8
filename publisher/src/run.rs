//! One complete publish run, from the runner environment to step outputs.

use api_client::Secret;
use camino::{Utf8Path, Utf8PathBuf};
use ghcr::RegistryClient;
use octocat::GithubClient;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::archive::{create_archives, Archives};
use crate::attestation::{Attester, CommandAttester};
use crate::config::{Config, PublishOptions};
use crate::outputs::Outputs;
use crate::publish::{Package, Publisher};
use crate::stage::stage_action_files;
use crate::version::resolve_version;
use crate::Error;

/// Package the action described by `config` and publish it.
///
/// Registry requests stop being retried once `cancel` fires.
pub async fn run(config: Config, cancel: CancellationToken) -> Result<Outputs, Error> {
    let github = GithubClient::new(config.api_url.clone(), config.token.clone())?;
    let attester = config
        .attest_command
        .as_deref()
        .and_then(CommandAttester::new)
        .map(|attester| Box::new(attester) as Box<dyn Attester>);
    let retry = config.retry_policy().with_cancellation(cancel);
    let debug = config.debug;

    run_with(config, &github, attester, |registry, token| {
        Ok(RegistryClient::new(registry, token)?
            .with_retry_policy(retry)
            .with_debug(debug))
    })
    .await
}

/// Publish through the given Github client and attester.
///
/// `connect` builds the registry client once the registry URL is known.
/// Staging and archive directories are created under `RUNNER_TEMP` and removed
/// before this returns, whether or not the publish succeeded.
pub async fn run_with<F>(
    config: Config,
    github: &GithubClient,
    attester: Option<Box<dyn Attester>>,
    connect: F,
) -> Result<Outputs, Error>
where
    F: FnOnce(Url, Secret) -> Result<RegistryClient, ghcr::Error>,
{
    let version = resolve_version(&config.event_name, &config.git_ref, config.event_path())
        .await?
        .to_string();

    let options = PublishOptions::resolve(config, github).await?;
    let config = &options.config;

    let staging = temp_dir(&config.runner_temp, "staging")?;
    let archive_dir = temp_dir(&config.runner_temp, "archives")?;
    let archives = prepare(
        config.package_dir(),
        utf8_path(&staging)?,
        utf8_path(&archive_dir)?,
    )
    .await?;

    let registry = connect(options.container_registry_url.clone(), config.token.clone())?;
    let mut publisher =
        Publisher::new(registry, config.token.clone()).enterprise(options.is_enterprise);
    if let Some(attester) = attester {
        publisher = publisher.with_attester(attester);
    }

    let outputs = publisher
        .publish(&Package {
            repository: &config.repository,
            repository_id: &config.repository_id,
            owner_id: &config.repository_owner_id,
            source_commit: &config.sha,
            version: &version,
            archives: &archives,
            created: None,
        })
        .await?;

    outputs.write(config.output.as_deref()).await?;
    Ok(outputs)
}

async fn prepare(
    source: Utf8PathBuf,
    staging: Utf8PathBuf,
    target: Utf8PathBuf,
) -> Result<Archives, Error> {
    tokio::task::spawn_blocking(move || {
        stage_action_files(&source, &staging)?;
        create_archives(&staging, &target)
    })
    .await?
}

fn temp_dir(parent: &Utf8Path, prefix: &str) -> Result<TempDir, Error> {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir_in(parent)
        .map_err(Error::io(format!("Creating temporary directory in {parent}")))
}

fn utf8_path(dir: &TempDir) -> Result<Utf8PathBuf, Error> {
    Utf8Path::from_path(dir.path())
        .map(Utf8Path::to_path_buf)
        .ok_or_else(|| Error::NonUtf8Path(dir.path().to_path_buf()))
}
