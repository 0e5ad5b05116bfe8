//! Fixed-delay retries around a request-issuing closure.
//!
//! [`RetryPolicy::execute`] is the one place retry decisions are made. The
//! closure is invoked once per attempt, so each attempt builds a fresh request
//! (and a fresh body), and the outcome of every attempt is classified through
//! the [`Retryable`] trait.

use std::borrow::Cow;
use std::future::Future;
use std::time::Duration;

use http::StatusCode;
use tokio_util::sync::CancellationToken;

use crate::error::{Cancelled, Error};
use crate::response::{Response, ResponseExt as _};

/// Number of retries after the first attempt when none is configured.
pub const DEFAULT_RETRIES: usize = 5;

/// Delay between attempts when none is configured.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(1000);

const RETRYABLE_STATUS: [StatusCode; 6] = [
    StatusCode::REQUEST_TIMEOUT,
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// Whether a status code is worth another attempt.
pub fn is_retryable_status(status: StatusCode) -> bool {
    RETRYABLE_STATUS.contains(&status)
}

/// The classification of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Hand this outcome back to the caller.
    Done,

    /// Try again, after `after` if the server asked for a specific delay.
    Retry {
        /// Server-requested delay, overriding the policy backoff.
        after: Option<Duration>,

        /// Short description for the retry log line.
        reason: Cow<'static, str>,
    },
}

/// Outcomes of an attempt which can be classified for retrying.
pub trait Retryable {
    /// Decide whether this outcome should be retried.
    fn verdict(&self) -> Verdict;
}

impl Retryable for Response {
    fn verdict(&self) -> Verdict {
        let status = self.status();
        if !is_retryable_status(status) {
            return Verdict::Done;
        }

        let after = self
            .headers()
            .get(http::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        Verdict::Retry {
            after,
            reason: format!("Received {} response", status.as_u16()).into(),
        }
    }
}

impl Retryable for Error {
    fn verdict(&self) -> Verdict {
        if self.is_transient() {
            Verdict::Retry {
                after: None,
                reason: format!("Encountered error: {self}").into(),
            }
        } else {
            Verdict::Done
        }
    }
}

/// A fixed-delay retry policy.
///
/// A policy allows `retries + 1` attempts in total. Between attempts it sleeps
/// for the configured backoff, or for the server's `retry-after` when one is
/// present. Whatever the last allowed attempt produced is returned unchanged.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    retries: usize,
    backoff: Duration,
    cancellation: Option<CancellationToken>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRIES, DEFAULT_BACKOFF)
    }
}

impl RetryPolicy {
    /// Create a policy with a retry count and a fixed delay.
    pub fn new(retries: usize, backoff: Duration) -> Self {
        Self {
            retries,
            backoff,
            cancellation: None,
        }
    }

    /// Abort attempts and backoff sleeps as soon as `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Number of retries after the first attempt.
    pub fn retries(&self) -> usize {
        self.retries
    }

    /// Delay between attempts.
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Total number of attempts this policy allows.
    pub fn attempts(&self) -> usize {
        self.retries.saturating_add(1)
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Run `request` until it produces a final outcome.
    ///
    /// The closure is called once per attempt.
    pub async fn execute<F, Fut, T, E>(&self, mut request: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Retryable,
        E: Retryable + From<Cancelled>,
    {
        let attempts = self.attempts();
        let mut attempt = 1;

        loop {
            if self.is_cancelled() {
                return Err(Cancelled.into());
            }

            let outcome = self.attempt(request()).await;
            if attempt >= attempts {
                return outcome;
            }

            let verdict = match &outcome {
                Ok(response) => response.verdict(),
                Err(error) => error.verdict(),
            };

            match verdict {
                Verdict::Done => return outcome,
                Verdict::Retry { after, reason } => {
                    drop(outcome);
                    let delay = after.unwrap_or(self.backoff);
                    tracing::info!(
                        %attempt,
                        "{reason}. Retrying after {}ms...",
                        delay.as_millis()
                    );
                    self.sleep(delay).await?;
                }
            }

            attempt += 1;
        }
    }

    async fn attempt<Fut, T, E>(&self, request: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: From<Cancelled>,
    {
        match &self.cancellation {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(Cancelled.into()),
                outcome = request => outcome,
            },
            None => request.await,
        }
    }

    async fn sleep(&self, delay: Duration) -> Result<(), Cancelled> {
        match &self.cancellation {
            Some(token) => tokio::select! {
                _ = token.cancelled() => Err(Cancelled),
                _ = tokio::time::sleep(delay) => Ok(()),
            },
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}
