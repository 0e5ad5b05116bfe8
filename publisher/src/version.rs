//! Working out which version is being published from the triggering event.

use camino::Utf8Path;
use semver::Version;
use serde::Deserialize;

use crate::Error;

const TAG_REF_PREFIX: &str = "refs/tags/";

#[derive(Debug, Default, Deserialize)]
struct ReleasePayload {
    #[serde(default)]
    release: Option<Release>,
}

#[derive(Debug, Default, Deserialize)]
struct Release {
    #[serde(default)]
    tag_name: Option<String>,
}

/// The `release.tag_name` of a release event payload, empty if absent.
pub fn release_tag(payload: &str) -> Result<String, serde_json::Error> {
    let payload: ReleasePayload = serde_json::from_str(payload)?;
    Ok(payload
        .release
        .and_then(|release| release.tag_name)
        .unwrap_or_default())
}

/// The raw tag named by a `release` or tag `push` event.
///
/// `release_tag` is the tag from the event payload, and is only consulted for
/// `release` events.
pub fn source_tag(
    event_name: &str,
    git_ref: &str,
    release_tag: Option<&str>,
) -> Result<String, Error> {
    let tag = match event_name {
        "release" => release_tag.unwrap_or_default(),
        "push" => git_ref
            .strip_prefix(TAG_REF_PREFIX)
            .ok_or(Error::UnsupportedEvent)?,
        _ => return Err(Error::UnsupportedEvent),
    };

    if tag.is_empty() {
        return Err(Error::MissingTag);
    }

    Ok(tag.to_owned())
}

/// Parse a tag as a semantic version, ignoring a leading `v`.
pub fn parse_version(tag: &str) -> Result<Version, Error> {
    let candidate = tag.strip_prefix('v').unwrap_or(tag);
    Version::parse(candidate).map_err(|source| Error::InvalidVersion {
        tag: tag.to_owned(),
        source,
    })
}

/// Resolve the version to publish from the triggering event.
pub async fn resolve_version(
    event_name: &str,
    git_ref: &str,
    event_path: Option<&Utf8Path>,
) -> Result<Version, Error> {
    let release = match event_name {
        "release" => {
            let path = event_path.ok_or(Error::Missing("GITHUB_EVENT_PATH"))?;
            let payload = tokio::fs::read_to_string(path)
                .await
                .map_err(Error::io(format!("Reading event payload {path}")))?;
            let tag = release_tag(&payload).map_err(|source| Error::EventPayload {
                path: path.to_path_buf(),
                source,
            })?;
            Some(tag)
        }
        _ => None,
    };

    let tag = source_tag(event_name, git_ref, release.as_deref())?;
    let version = parse_version(&tag)?;
    tracing::info!(%tag, %version, "Resolved package version");
    Ok(version)
}
