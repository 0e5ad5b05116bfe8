use std::fmt;

use api_client::response::{Response, ResponseBodyExt as _, ResponseExt as _};
use api_client::uri::ParseUriError;
use http::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Errors from talking to the container registry.
#[derive(Debug, Error)]
pub enum Error {
    /// The registry answered with a status the operation does not accept.
    #[error("Unexpected {status} response from {description}. {details}")]
    UnexpectedResponse {
        /// What the request was for.
        description: String,
        /// The status received.
        status: StatusCode,
        /// Registry error entries, or the raw body.
        details: ErrorDetails,
    },

    /// An upload session was opened without telling us where to upload.
    #[error("No location header in response from upload post {url} for layer {digest}")]
    MissingLocation {
        /// URL the session was requested from.
        url: String,
        /// The blob being uploaded.
        digest: String,
    },

    /// A manifest upload succeeded but the registry did not report its digest.
    #[error("No docker-content-digest header in response from manifest upload for {reference}")]
    MissingDigestHeader {
        /// Tag or digest the manifest was uploaded under.
        reference: String,
    },

    /// The registry computed a different digest for an uploaded manifest.
    #[error("Digest mismatch. Expected {expected}, got {actual}.")]
    DigestMismatch {
        /// Digest computed locally.
        expected: String,
        /// Digest reported by the registry.
        actual: String,
    },

    /// A manifest references a blob that was not supplied.
    #[error("Blob for layer {0} not found")]
    BlobNotFound(String),

    /// A supplied blob does not have the size its descriptor declares.
    #[error("Blob for layer {digest} is {actual} bytes, expected {expected}")]
    SizeMismatch {
        /// The blob digest.
        digest: String,
        /// Size from the descriptor.
        expected: u64,
        /// Size of the supplied bytes.
        actual: u64,
    },

    /// A manifest references a blob media type this client does not upload.
    #[error("Unknown media type {0}")]
    UnknownMediaType(String),

    /// An upload location could not be resolved against the upload request URL.
    #[error("Invalid upload location {location}: {source}")]
    InvalidLocation {
        /// The location header value.
        location: String,
        /// Why it could not be resolved.
        #[source]
        source: url::ParseError,
    },

    /// The registry URL or an upload URL is not a valid request URI.
    #[error("Invalid registry URI: {0}")]
    Uri(#[from] ParseUriError),

    /// The token cannot be sent as an HTTP header.
    #[error("Registry token is not a valid header value")]
    Token(#[source] http::header::InvalidHeaderValue),

    /// A manifest could not be encoded.
    #[error("Encoding manifest: {0}")]
    Encode(#[from] serde_json::Error),

    /// The request never produced a response.
    #[error("Request to {description} failed: {source}")]
    Request {
        /// What the request was for.
        description: String,
        /// The transport error.
        #[source]
        source: api_client::Error,
    },
}

impl Error {
    /// Build an [`Error::UnexpectedResponse`], reading the body for details.
    pub async fn from_response(description: impl Into<String>, response: Response) -> Self {
        let status = response.status();
        let body = match response.bytes().await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(error) => format!("<unreadable: {error}>"),
        };

        Error::UnexpectedResponse {
            description: description.into(),
            status,
            details: ErrorDetails::parse(&body),
        }
    }

    pub(crate) fn request(description: impl Into<String>) -> impl FnOnce(api_client::Error) -> Self {
        let description = description.into();
        move |source| Error::Request {
            description,
            source,
        }
    }

    /// Whether the operation stopped because it was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Error::Request {
                source: api_client::Error::Cancelled(_),
                ..
            }
        )
    }

    /// The registry status, for unexpected responses.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::UnexpectedResponse { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// One entry of a registry `{"errors": [...]}` body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegistryError {
    /// Error code, e.g. `DENIED`.
    pub code: String,
    /// Human readable message.
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct RegistryErrorBody {
    errors: Vec<RegistryError>,
}

/// The useful part of an error response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorDetails {
    /// A well formed registry error list.
    Registry(Vec<RegistryError>),
    /// Anything else, verbatim.
    Body(String),
}

impl ErrorDetails {
    /// Parse a registry error body, falling back to the raw text.
    ///
    /// Only a non-empty `errors` array whose entries all carry string `code`
    /// and `message` fields counts as a registry error list.
    pub fn parse(body: &str) -> Self {
        match serde_json::from_str::<RegistryErrorBody>(body) {
            Ok(parsed) if !parsed.errors.is_empty() => ErrorDetails::Registry(parsed.errors),
            _ => ErrorDetails::Body(body.to_owned()),
        }
    }
}

impl fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorDetails::Registry(errors) => {
                f.write_str("Errors: ")?;
                for (index, error) in errors.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} - {}", error.code, error.message)?;
                }
                Ok(())
            }
            ErrorDetails::Body(body) => write!(f, "Response Body: {body}."),
        }
    }
}
