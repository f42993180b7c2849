//! Redis binding
//!
//! Commands go to the master; read-only commands may be served by replicas.
//! Server replies whose first word marks a transient cluster state
//! (`TRYAGAIN`, `LOADING`, `CLUSTERDOWN`, `MASTERDOWN`) are retried along with
//! dropped connections and timeouts.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use switchyard_core_resilience::{
    CancellationToken, CircuitBreaker, Connection, Connector, DriverError, ErrorClassifier,
    HealthCheck, NodeStats, RetryObserver, RouteError, Shard, ShardConfig,
};
use thiserror::Error;

/// Error prefixes the server uses for transient states
pub const RETRYABLE_REPLY_PREFIXES: [&str; 4] = ["TRYAGAIN", "LOADING", "CLUSTERDOWN", "MASTERDOWN"];

#[derive(Debug, Error)]
pub enum KvError {
    #[error("redis: no available node")]
    Unavailable,

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("i/o timeout")]
    Timeout,

    /// Error reply, e.g. `LOADING Redis is loading the dataset in memory`
    #[error("{0}")]
    Server(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl KvError {
    /// First word of a server error reply
    pub fn code(&self) -> Option<&str> {
        match self {
            KvError::Server(message) => message.split_whitespace().next(),
            _ => None,
        }
    }
}

impl DriverError for KvError {
    fn unavailable() -> Self {
        KvError::Unavailable
    }

    fn is_unavailable(&self) -> bool {
        matches!(self, KvError::Unavailable)
    }
}

/// A command and its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: Vec<Vec<u8>>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.args.push(arg.as_ref().to_vec());
        self
    }
}

/// A decoded reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Nil,
    Status(String),
    Int(i64),
    Bulk(Vec<u8>),
    Array(Vec<Reply>),
}

/// Operations a Redis connection provides
#[async_trait]
pub trait KvConnection: Connection<Error = KvError> {
    async fn execute(&self, cmd: &Command) -> Result<Reply, KvError>;
}

/// Connection that fails every call with [`KvError::Unavailable`]
#[derive(Debug, Default, Clone, Copy)]
pub struct NullKv;

#[async_trait]
impl Connection for NullKv {
    type Error = KvError;

    async fn ping(&self) -> Result<(), KvError> {
        Err(KvError::Unavailable)
    }

    async fn close(&self) -> Result<(), KvError> {
        Ok(())
    }
}

#[async_trait]
impl KvConnection for NullKv {
    async fn execute(&self, _cmd: &Command) -> Result<Reply, KvError> {
        Err(KvError::Unavailable)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RedisClassifier;

impl ErrorClassifier<KvError> for RedisClassifier {
    fn is_retryable(&self, err: &KvError) -> bool {
        match err {
            KvError::Io(_) | KvError::Timeout => true,
            KvError::Server(_) => err
                .code()
                .is_some_and(|code| RETRYABLE_REPLY_PREFIXES.contains(&code)),
            KvError::Unavailable | KvError::Protocol(_) => false,
        }
    }
}

/// Redis master/replica shard
pub struct RedisShard {
    inner: Shard<dyn KvConnection>,
}

impl RedisShard {
    pub fn new(config: &ShardConfig, breaker: Option<Arc<dyn CircuitBreaker>>) -> Self {
        let fallback: Arc<dyn KvConnection> = Arc::new(NullKv);
        Self {
            inner: Shard::new(config, fallback, Arc::new(RedisClassifier), breaker),
        }
    }

    pub fn with_retry_observer(self, observer: RetryObserver<KvError>) -> Self {
        Self {
            inner: self.inner.with_retry_observer(observer),
        }
    }

    pub async fn setup<K>(&self, connector: &K) -> Result<(), RouteError<KvError>>
    where
        K: Connector<dyn KvConnection> + ?Sized,
    {
        self.inner.setup(connector).await
    }

    pub async fn close(&self) -> Result<(), RouteError<KvError>> {
        self.inner.close().await
    }

    pub fn stats(&self) -> Vec<NodeStats> {
        self.inner.stats()
    }

    pub fn health_checks(&self) -> Result<Vec<HealthCheck>, RouteError<KvError>> {
        self.inner.health_checks()
    }

    pub fn inner(&self) -> &Shard<dyn KvConnection> {
        &self.inner
    }

    pub async fn exec_master(
        &self,
        cancel: &CancellationToken,
        cmd: &Command,
    ) -> Result<Reply, RouteError<KvError>> {
        self.inner
            .exec_master(cancel, |conn| async move { conn.execute(cmd).await })
            .await
    }

    pub async fn exec_master_tolerant(
        &self,
        cancel: &CancellationToken,
        cmd: &Command,
    ) -> Result<Reply, RouteError<KvError>> {
        self.inner
            .exec_master_tolerant(cancel, |conn| async move { conn.execute(cmd).await })
            .await
    }

    pub async fn query_replica(
        &self,
        cancel: &CancellationToken,
        cmd: &Command,
    ) -> Result<Reply, RouteError<KvError>> {
        self.inner
            .exec_replica(cancel, |conn| async move { conn.execute(cmd).await })
            .await
    }

    pub async fn query_replica_tolerant(
        &self,
        cancel: &CancellationToken,
        cmd: &Command,
    ) -> Result<Reply, RouteError<KvError>> {
        self.inner
            .exec_replica_tolerant(cancel, |conn| async move { conn.execute(cmd).await })
            .await
    }
}
