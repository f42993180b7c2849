//! TCP reachability probe
//!
//! A [`Connection`] whose ping is a TCP connect with a deadline. It carries no
//! payload protocol; the `probe` command uses it to exercise shard setup,
//! health checks and close against live endpoints.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use switchyard_core_resilience::{
    CircuitBreaker, Connection, Connector, DriverError, ErrorClassifier, Shard, ShardConfig,
};
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::trace;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum TcpError {
    #[error("tcp: no available node")]
    Unavailable,

    #[error("connection timed out")]
    Timeout,

    #[error("{0}")]
    Io(#[from] io::Error),
}

impl DriverError for TcpError {
    fn unavailable() -> Self {
        TcpError::Unavailable
    }

    fn is_unavailable(&self) -> bool {
        matches!(self, TcpError::Unavailable)
    }
}

/// Probe handle for one `host:port`
#[derive(Debug, Clone)]
pub struct TcpConnection {
    target: Option<String>,
    timeout: Duration,
}

impl TcpConnection {
    pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            target: Some(target.into()),
            timeout,
        }
    }

    /// Stand-in for an unreachable node
    pub fn null() -> Self {
        Self {
            target: None,
            timeout: Duration::ZERO,
        }
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }
}

#[async_trait]
impl Connection for TcpConnection {
    type Error = TcpError;

    async fn ping(&self) -> Result<(), TcpError> {
        let Some(target) = self.target.as_deref() else {
            return Err(TcpError::Unavailable);
        };

        match tokio::time::timeout(self.timeout, TcpStream::connect(target)).await {
            Ok(Ok(_stream)) => {
                trace!(target, "tcp probe connected");
                Ok(())
            }
            Ok(Err(err)) => Err(TcpError::Io(err)),
            Err(_) => Err(TcpError::Timeout),
        }
    }

    async fn close(&self) -> Result<(), TcpError> {
        Ok(())
    }
}

/// Opens [`TcpConnection`]s; setup's ping performs the first connect
#[derive(Debug, Clone, Copy)]
pub struct TcpConnector {
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

#[async_trait]
impl Connector<TcpConnection> for TcpConnector {
    async fn connect(&self, address: &str) -> Result<Arc<TcpConnection>, TcpError> {
        Ok(Arc::new(TcpConnection::new(address, self.timeout)))
    }
}

/// Timeouts and transient socket failures are retryable
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpClassifier;

impl ErrorClassifier<TcpError> for TcpClassifier {
    fn is_retryable(&self, err: &TcpError) -> bool {
        match err {
            TcpError::Timeout => true,
            TcpError::Io(io_err) => is_io_transient(io_err),
            TcpError::Unavailable => false,
        }
    }
}

fn is_io_transient(io_err: &io::Error) -> bool {
    use io::ErrorKind::*;
    matches!(
        io_err.kind(),
        ConnectionRefused
            | ConnectionReset
            | ConnectionAborted
            | NotConnected
            | BrokenPipe
            | TimedOut
            | Interrupted
            | WouldBlock
    )
}

/// Build a probe shard for `config`
pub fn probe_shard(
    config: &ShardConfig,
    breaker: Option<Arc<dyn CircuitBreaker>>,
) -> Shard<TcpConnection> {
    Shard::new(
        config,
        Arc::new(TcpConnection::null()),
        Arc::new(TcpClassifier),
        breaker,
    )
}
