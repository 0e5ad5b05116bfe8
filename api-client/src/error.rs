//! Errors raised while exchanging a request with a server.

use thiserror::Error;

/// A request could not be completed. Error statuses are not errors at this
/// level; they arrive as ordinary responses.
#[derive(Debug, Error)]
pub enum Error {
    /// The request could not be assembled.
    #[error("Invalid request: {0}")]
    Build(#[from] http::Error),

    /// The connection failed or was dropped.
    #[error(transparent)]
    Transport(#[from] hyperdriver::client::Error),

    /// The caller gave up on the request.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl Error {
    /// Whether sending the same request again might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

/// Returned in place of a response once a cancellation token fires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Error)]
#[error("request cancelled")]
pub struct Cancelled;
