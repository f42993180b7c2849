//! MySQL binding
//!
//! Wire protocol and DSN handling belong to the driver. This module defines
//! the capability a MySQL connection exposes to the router, the null
//! connection used when no node is healthy, and which driver errors are
//! worth retrying.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use switchyard_core_resilience::{
    CancellationToken, CircuitBreaker, Connection, Connector, DriverError, ErrorClassifier,
    HealthCheck, NodeStats, RetryObserver, RouteError, Shard, ShardConfig,
};
use thiserror::Error;

use super::types::Value;

/// Server error codes that indicate a transient condition
///
/// 1040 too many connections, 1042 bad host, 1043 bad handshake,
/// 1053 server shutdown, 1317 query interrupted.
pub const RETRYABLE_SERVER_CODES: [u16; 5] = [1040, 1042, 1043, 1053, 1317];

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("mysql: no available node")]
    Unavailable,

    #[error("driver: bad connection")]
    BadConn,

    #[error("invalid connection")]
    InvalidConnection,

    #[error("network error: {0}")]
    Network(#[from] io::Error),

    #[error("server error {code}: {message}")]
    Server { code: u16, message: String },

    #[error("{0}")]
    Other(String),
}

impl DriverError for SqlError {
    fn unavailable() -> Self {
        SqlError::Unavailable
    }

    fn is_unavailable(&self) -> bool {
        matches!(self, SqlError::Unavailable)
    }
}

/// A statement with positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }
}

/// Outcome of a write statement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub rows_affected: u64,
    pub last_insert_id: Option<u64>,
}

/// Result set of a read statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Operations a MySQL connection provides
#[async_trait]
pub trait SqlConnection: Connection<Error = SqlError> {
    async fn exec(&self, stmt: &Statement) -> Result<ExecResult, SqlError>;

    async fn query(&self, stmt: &Statement) -> Result<Rows, SqlError>;
}

/// Connection that fails every call with [`SqlError::Unavailable`]
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSql;

#[async_trait]
impl Connection for NullSql {
    type Error = SqlError;

    async fn ping(&self) -> Result<(), SqlError> {
        Err(SqlError::Unavailable)
    }

    async fn close(&self) -> Result<(), SqlError> {
        Ok(())
    }
}

#[async_trait]
impl SqlConnection for NullSql {
    async fn exec(&self, _stmt: &Statement) -> Result<ExecResult, SqlError> {
        Err(SqlError::Unavailable)
    }

    async fn query(&self, _stmt: &Statement) -> Result<Rows, SqlError> {
        Err(SqlError::Unavailable)
    }
}

/// Retries lost connections, network failures and the transient server codes
#[derive(Debug, Default, Clone, Copy)]
pub struct MysqlClassifier;

impl ErrorClassifier<SqlError> for MysqlClassifier {
    fn is_retryable(&self, err: &SqlError) -> bool {
        match err {
            SqlError::BadConn | SqlError::InvalidConnection | SqlError::Network(_) => true,
            SqlError::Server { code, .. } => RETRYABLE_SERVER_CODES.contains(code),
            SqlError::Unavailable | SqlError::Other(_) => false,
        }
    }
}

/// MySQL master/replica shard
pub struct MysqlShard {
    inner: Shard<dyn SqlConnection>,
}

impl MysqlShard {
    pub fn new(config: &ShardConfig, breaker: Option<Arc<dyn CircuitBreaker>>) -> Self {
        let fallback: Arc<dyn SqlConnection> = Arc::new(NullSql);
        Self {
            inner: Shard::new(config, fallback, Arc::new(MysqlClassifier), breaker),
        }
    }

    pub fn with_retry_observer(self, observer: RetryObserver<SqlError>) -> Self {
        Self {
            inner: self.inner.with_retry_observer(observer),
        }
    }

    pub async fn setup<K>(&self, connector: &K) -> Result<(), RouteError<SqlError>>
    where
        K: Connector<dyn SqlConnection> + ?Sized,
    {
        self.inner.setup(connector).await
    }

    pub async fn close(&self) -> Result<(), RouteError<SqlError>> {
        self.inner.close().await
    }

    pub fn stats(&self) -> Vec<NodeStats> {
        self.inner.stats()
    }

    pub fn health_checks(&self) -> Result<Vec<HealthCheck>, RouteError<SqlError>> {
        self.inner.health_checks()
    }

    pub fn inner(&self) -> &Shard<dyn SqlConnection> {
        &self.inner
    }

    pub async fn exec_master(
        &self,
        cancel: &CancellationToken,
        stmt: &Statement,
    ) -> Result<ExecResult, RouteError<SqlError>> {
        self.inner
            .exec_master(cancel, |conn| async move { conn.exec(stmt).await })
            .await
    }

    pub async fn exec_master_tolerant(
        &self,
        cancel: &CancellationToken,
        stmt: &Statement,
    ) -> Result<ExecResult, RouteError<SqlError>> {
        self.inner
            .exec_master_tolerant(cancel, |conn| async move { conn.exec(stmt).await })
            .await
    }

    pub async fn query_master(
        &self,
        cancel: &CancellationToken,
        stmt: &Statement,
    ) -> Result<Rows, RouteError<SqlError>> {
        self.inner
            .exec_master(cancel, |conn| async move { conn.query(stmt).await })
            .await
    }

    pub async fn query_master_tolerant(
        &self,
        cancel: &CancellationToken,
        stmt: &Statement,
    ) -> Result<Rows, RouteError<SqlError>> {
        self.inner
            .exec_master_tolerant(cancel, |conn| async move { conn.query(stmt).await })
            .await
    }

    pub async fn exec_replica(
        &self,
        cancel: &CancellationToken,
        stmt: &Statement,
    ) -> Result<ExecResult, RouteError<SqlError>> {
        self.inner
            .exec_replica(cancel, |conn| async move { conn.exec(stmt).await })
            .await
    }

    pub async fn exec_replica_tolerant(
        &self,
        cancel: &CancellationToken,
        stmt: &Statement,
    ) -> Result<ExecResult, RouteError<SqlError>> {
        self.inner
            .exec_replica_tolerant(cancel, |conn| async move { conn.exec(stmt).await })
            .await
    }

    pub async fn query_replica(
        &self,
        cancel: &CancellationToken,
        stmt: &Statement,
    ) -> Result<Rows, RouteError<SqlError>> {
        self.inner
            .exec_replica(cancel, |conn| async move { conn.query(stmt).await })
            .await
    }

    pub async fn query_replica_tolerant(
        &self,
        cancel: &CancellationToken,
        stmt: &Statement,
    ) -> Result<Rows, RouteError<SqlError>> {
        self.inner
            .exec_replica_tolerant(cancel, |conn| async move { conn.query(stmt).await })
            .await
    }
}
