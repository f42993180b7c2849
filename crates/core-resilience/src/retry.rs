//! Bounded retry loop with pluggable error classification
//!
//! [`TolerantExecutor`] runs an action up to `max_attempts + 1` times. After
//! each failure it asks a classifier whether the error is worth another try,
//! notifies an observer, and waits `per_attempt_wait` before the next attempt.
//! The wait races a [`CancellationToken`], so shutdown is never held up by a
//! sleeping retry.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::classify::Verdict;

/// Retry behaviour for tolerant operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Number of retries after the first attempt (0 = no retries)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Wait between attempts in milliseconds
    #[serde(default = "default_per_attempt_wait_ms")]
    pub per_attempt_wait_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_per_attempt_wait_ms() -> u64 {
    100
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            per_attempt_wait_ms: default_per_attempt_wait_ms(),
        }
    }
}

impl RetryConfig {
    /// A configuration that never retries
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            per_attempt_wait_ms: 0,
        }
    }

    /// Wait between attempts
    pub fn per_attempt_wait(&self) -> Duration {
        Duration::from_millis(self.per_attempt_wait_ms)
    }
}

/// Failure of a single attempt
#[derive(Debug)]
pub enum AttemptError<E> {
    /// Judged by the classifier
    Failed(E),
    /// Never retried, whatever the classifier would say
    Terminal(E),
}

impl<E> AttemptError<E> {
    /// Mark an error as non-retryable
    pub fn terminal(err: E) -> Self {
        AttemptError::Terminal(err)
    }

    /// The wrapped error
    pub fn into_inner(self) -> E {
        match self {
            AttemptError::Failed(err) | AttemptError::Terminal(err) => err,
        }
    }
}

impl<E> From<E> for AttemptError<E> {
    fn from(err: E) -> Self {
        AttemptError::Failed(err)
    }
}

/// Final outcome of a failed tolerant run
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every allowed attempt failed with a retryable error
    #[error("gave up after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },

    /// The failure was classified as not worth retrying
    #[error(transparent)]
    Terminal(E),

    /// The cancellation token fired before or between attempts
    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

impl<E> RetryError<E> {
    /// The last error observed, if the run got that far
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Exhausted { source, .. } | RetryError::Terminal(source) => Some(source),
            RetryError::Cancelled { .. } => None,
        }
    }
}

/// Executes actions with a bounded number of retries
#[derive(Debug, Clone)]
pub struct TolerantExecutor {
    max_attempts: u32,
    wait: Duration,
}

impl TolerantExecutor {
    /// Create an executor from a retry configuration
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            wait: config.per_attempt_wait(),
        }
    }

    /// Number of retries allowed after the first attempt
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `action` until it succeeds, fails terminally, or runs out of attempts.
    ///
    /// `on_retry` receives the 1-based retry number and the error that caused
    /// it, before the wait. A panicking observer is logged and ignored.
    pub async fn run<T, E, A, Fut, K, R>(
        &self,
        cancel: &CancellationToken,
        mut action: A,
        classify: K,
        mut on_retry: R,
    ) -> Result<T, RetryError<E>>
    where
        A: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AttemptError<E>>>,
        K: Fn(&E) -> Verdict,
        R: FnMut(u32, &E),
    {
        let mut attempt: u32 = 0;
        let mut last: Option<E> = None;

        loop {
            if let Some(err) = last.take() {
                let observed = panic::catch_unwind(AssertUnwindSafe(|| on_retry(attempt, &err)));
                if observed.is_err() {
                    warn!(attempt, "retry observer panicked; continuing");
                }

                if !self.wait.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(RetryError::Cancelled { attempts: attempt });
                        }
                        _ = tokio::time::sleep(self.wait) => {}
                    }
                }
            }

            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled { attempts: attempt });
            }

            match action().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempt, "tolerant operation recovered");
                    }
                    return Ok(value);
                }
                Err(AttemptError::Terminal(err)) => return Err(RetryError::Terminal(err)),
                Err(AttemptError::Failed(err)) => {
                    if classify(&err) == Verdict::Terminal {
                        return Err(RetryError::Terminal(err));
                    }
                    if attempt >= self.max_attempts {
                        return Err(RetryError::Exhausted {
                            attempts: attempt + 1,
                            source: err,
                        });
                    }
                    attempt += 1;
                    last = Some(err);
                }
            }
        }
    }
}
