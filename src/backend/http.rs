//! Tolerant HTTP client
//!
//! Wraps a [`reqwest::Client`] with the shared [`TolerantExecutor`]. Only
//! transport timeouts are retried. A response is success from the retry loop's
//! point of view whatever its status code, so a `500` comes back to the caller
//! after a single request.

use std::sync::Arc;

use reqwest::{Client, Request, Response};
use switchyard_core_resilience::{
    AttemptError, CancellationToken, RetryConfig, RetryError, RetryObserver, TolerantExecutor,
    Verdict,
};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("request body cannot be replayed")]
    BodyNotReplayable,

    #[error("http request failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("http request cancelled")]
    Cancelled,
}

impl HttpError {
    pub fn is_timeout(&self) -> bool {
        match self {
            HttpError::Transport(err) | HttpError::Exhausted { source: err, .. } => err.is_timeout(),
            _ => false,
        }
    }
}

fn classify(err: &HttpError) -> Verdict {
    Verdict::from_retryable(matches!(err, HttpError::Transport(e) if e.is_timeout()))
}

/// HTTP client that retries requests which timed out
#[derive(Clone)]
pub struct TolerantHttpClient {
    client: Client,
    executor: TolerantExecutor,
    on_retry: Option<RetryObserver<HttpError>>,
}

impl TolerantHttpClient {
    pub fn new(client: Client, retry: &RetryConfig) -> Self {
        Self {
            client,
            executor: TolerantExecutor::new(retry),
            on_retry: None,
        }
    }

    /// Observer called with the request URL and the error before each retry
    pub fn with_retry_observer(mut self, observer: RetryObserver<HttpError>) -> Self {
        self.on_retry = Some(observer);
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Send `request`, retrying on timeouts.
    ///
    /// Each attempt sends a fresh copy of the request. A request whose body
    /// cannot be copied (a stream) is sent exactly once.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        request: Request,
    ) -> Result<Response, HttpError> {
        if cancel.is_cancelled() {
            return Err(HttpError::Cancelled);
        }

        if request.try_clone().is_none() {
            debug!(url = %request.url(), "request body is not replayable; sending once");
            return self.send_once(cancel, request).await;
        }

        let url = request.url().to_string();
        let template = &request;

        let result = self
            .executor
            .run(
                cancel,
                || {
                    let attempt = template.try_clone();
                    async move {
                        let Some(attempt) = attempt else {
                            return Err(AttemptError::Terminal(HttpError::BodyNotReplayable));
                        };
                        self.send_once(cancel, attempt).await.map_err(|err| match err {
                            HttpError::Cancelled => AttemptError::Terminal(err),
                            other => AttemptError::Failed(other),
                        })
                    }
                },
                classify,
                |attempt, err| {
                    warn!(attempt, url = %url, error = %err, "retrying http request");
                    if let Some(observer) = &self.on_retry {
                        observer(&url, err);
                    }
                },
            )
            .await;

        result.map_err(|err| match err {
            RetryError::Exhausted {
                attempts,
                source: HttpError::Transport(source),
            } => HttpError::Exhausted { attempts, source },
            RetryError::Exhausted { source, .. } | RetryError::Terminal(source) => source,
            RetryError::Cancelled { .. } => HttpError::Cancelled,
        })
    }

    async fn send_once(
        &self,
        cancel: &CancellationToken,
        request: Request,
    ) -> Result<Response, HttpError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(HttpError::Cancelled),
            response = self.client.execute(request) => response.map_err(HttpError::from),
        }
    }
}

impl std::fmt::Debug for TolerantHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TolerantHttpClient")
            .field("executor", &self.executor)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

/// Shared-ownership helper for observers built from plain closures
pub fn observer<F>(f: F) -> RetryObserver<HttpError>
where
    F: Fn(&str, &HttpError) + Send + Sync + 'static,
{
    Arc::new(f)
}
