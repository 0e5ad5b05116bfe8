use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::attestation::AttestationError;

/// Errors which abort a publish run.
#[derive(Debug, Error)]
pub enum Error {
    /// A required setting was absent or empty.
    #[error("Could not find {0}.")]
    Missing(&'static str),

    /// The run was triggered by an event which does not name a version.
    #[error("This action can only be triggered by release events or tag push events.")]
    UnsupportedEvent,

    /// The triggering event carried an empty tag.
    #[error("Could not find a Semantic Version tag in the event payload.")]
    MissingTag,

    /// The tag is not a semantic version.
    #[error("{tag} is not a valid semantic version, and so cannot be uploaded as an Immutable Action.")]
    InvalidVersion {
        /// The tag as found in the event.
        tag: String,
        /// Why it did not parse.
        #[source]
        source: semver::Error,
    },

    /// The event payload file could not be parsed.
    #[error("Parsing event payload {path}: {source}")]
    EventPayload {
        /// Payload file.
        path: Utf8PathBuf,
        /// The parse failure.
        #[source]
        source: serde_json::Error,
    },

    /// The repository id reported by Github differs from the environment.
    #[error("Repository ID mismatch.")]
    RepositoryIdMismatch,

    /// The owner id reported by Github differs from the environment.
    #[error("Repository Owner ID mismatch.")]
    OwnerIdMismatch,

    /// A URL setting could not be parsed.
    #[error("Invalid {name} {value}: {source}")]
    InvalidUrl {
        /// The setting.
        name: &'static str,
        /// Its value.
        value: String,
        /// The parse failure.
        #[source]
        source: url::ParseError,
    },

    /// A URL setting is not usable as an API base.
    #[error("Invalid API URL: {0}")]
    Uri(#[from] api_client::uri::ParseUriError),

    /// The directory to package does not exist or is not a directory.
    #[error("{0} is not a directory")]
    NotADirectory(Utf8PathBuf),

    /// A path in the packaged tree is not valid UTF-8.
    #[error("Path is not valid UTF-8: {0}")]
    NonUtf8Path(std::path::PathBuf),

    /// A filesystem operation failed.
    #[error("{context}: {source}")]
    Io {
        /// What was being done.
        context: String,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// Writing the zip archive failed.
    #[error("Writing zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// A blocking filesystem task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// A manifest could not be encoded.
    #[error("Encoding manifest: {0}")]
    Encode(#[from] serde_json::Error),

    /// A Github API call failed.
    #[error(transparent)]
    Github(#[from] octocat::Error),

    /// A registry operation failed.
    #[error(transparent)]
    Registry(#[from] ghcr::Error),

    /// The attestation could not be produced.
    #[error(transparent)]
    Attestation(#[from] AttestationError),
}

impl Error {
    pub(crate) fn io(context: impl Into<String>) -> impl FnOnce(io::Error) -> Self {
        let context = context.into();
        move |source| Error::Io { context, source }
    }
}
