//! Tarantool binding
//!
//! Stored-procedure calls routed over a master/replica group. Only the box
//! error codes for a lost connection and a timeout are retried; application
//! errors raised by the procedure are returned as-is.

use std::sync::Arc;

use async_trait::async_trait;
use switchyard_core_resilience::{
    CancellationToken, CircuitBreaker, Connection, Connector, DriverError, ErrorClassifier,
    HealthCheck, NodeStats, RetryObserver, RouteError, Shard, ShardConfig,
};
use thiserror::Error;

use super::types::Value;

/// Box error codes
pub mod codes {
    pub const NO_SUCH_PROC: u32 = 33;
    pub const NO_CONNECTION: u32 = 77;
    pub const TIMEOUT: u32 = 78;
}

const RETRYABLE_CODES: [u32; 2] = [codes::NO_CONNECTION, codes::TIMEOUT];

#[derive(Debug, Error)]
pub enum TarantoolError {
    #[error("tarantool: no available node")]
    Unavailable,

    #[error("tarantool error {code}: {message}")]
    Box { code: u32, message: String },

    #[error("decode error: {0}")]
    Decode(String),
}

impl TarantoolError {
    pub fn code(&self) -> Option<u32> {
        match self {
            TarantoolError::Box { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl DriverError for TarantoolError {
    fn unavailable() -> Self {
        TarantoolError::Unavailable
    }

    fn is_unavailable(&self) -> bool {
        matches!(self, TarantoolError::Unavailable)
    }
}

/// A stored-procedure invocation
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub function: String,
    pub args: Vec<Value>,
}

impl Call {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }
}

/// Operations a Tarantool connection provides
#[async_trait]
pub trait TarantoolConnection: Connection<Error = TarantoolError> {
    /// Invoke a function, returning its result tuple
    async fn call(&self, call: &Call) -> Result<Vec<Value>, TarantoolError>;
}

/// Connection that fails every call with [`TarantoolError::Unavailable`]
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTarantool;

#[async_trait]
impl Connection for NullTarantool {
    type Error = TarantoolError;

    async fn ping(&self) -> Result<(), TarantoolError> {
        Err(TarantoolError::Unavailable)
    }

    async fn close(&self) -> Result<(), TarantoolError> {
        Ok(())
    }
}

#[async_trait]
impl TarantoolConnection for NullTarantool {
    async fn call(&self, _call: &Call) -> Result<Vec<Value>, TarantoolError> {
        Err(TarantoolError::Unavailable)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TarantoolClassifier;

impl ErrorClassifier<TarantoolError> for TarantoolClassifier {
    fn is_retryable(&self, err: &TarantoolError) -> bool {
        err.code().is_some_and(|code| RETRYABLE_CODES.contains(&code))
    }
}

/// Tarantool master/replica shard
pub struct TarantoolShard {
    inner: Shard<dyn TarantoolConnection>,
}

impl TarantoolShard {
    pub fn new(config: &ShardConfig, breaker: Option<Arc<dyn CircuitBreaker>>) -> Self {
        let fallback: Arc<dyn TarantoolConnection> = Arc::new(NullTarantool);
        Self {
            inner: Shard::new(config, fallback, Arc::new(TarantoolClassifier), breaker),
        }
    }

    pub fn with_retry_observer(self, observer: RetryObserver<TarantoolError>) -> Self {
        Self {
            inner: self.inner.with_retry_observer(observer),
        }
    }

    pub async fn setup<K>(&self, connector: &K) -> Result<(), RouteError<TarantoolError>>
    where
        K: Connector<dyn TarantoolConnection> + ?Sized,
    {
        self.inner.setup(connector).await
    }

    pub async fn close(&self) -> Result<(), RouteError<TarantoolError>> {
        self.inner.close().await
    }

    pub fn stats(&self) -> Vec<NodeStats> {
        self.inner.stats()
    }

    pub fn health_checks(&self) -> Result<Vec<HealthCheck>, RouteError<TarantoolError>> {
        self.inner.health_checks()
    }

    pub fn inner(&self) -> &Shard<dyn TarantoolConnection> {
        &self.inner
    }

    pub async fn call_master(
        &self,
        cancel: &CancellationToken,
        call: &Call,
    ) -> Result<Vec<Value>, RouteError<TarantoolError>> {
        self.inner
            .exec_master(cancel, |conn| async move { conn.call(call).await })
            .await
    }

    pub async fn call_master_tolerant(
        &self,
        cancel: &CancellationToken,
        call: &Call,
    ) -> Result<Vec<Value>, RouteError<TarantoolError>> {
        self.inner
            .exec_master_tolerant(cancel, |conn| async move { conn.call(call).await })
            .await
    }

    pub async fn call_replica(
        &self,
        cancel: &CancellationToken,
        call: &Call,
    ) -> Result<Vec<Value>, RouteError<TarantoolError>> {
        self.inner
            .exec_replica(cancel, |conn| async move { conn.call(call).await })
            .await
    }

    pub async fn call_replica_tolerant(
        &self,
        cancel: &CancellationToken,
        call: &Call,
    ) -> Result<Vec<Value>, RouteError<TarantoolError>> {
        self.inner
            .exec_replica_tolerant(cancel, |conn| async move { conn.call(call).await })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use switchyard_core_resilience::RetryConfig;

    /// Fails the first `timeouts` calls with a box timeout, then echoes
    struct Flaky {
        timeouts: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Connection for Flaky {
        type Error = TarantoolError;

        async fn ping(&self) -> Result<(), TarantoolError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), TarantoolError> {
            Ok(())
        }
    }

    #[async_trait]
    impl TarantoolConnection for Flaky {
        async fn call(&self, call: &Call) -> Result<Vec<Value>, TarantoolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if call.function == "missing" {
                return Err(TarantoolError::Box {
                    code: codes::NO_SUCH_PROC,
                    message: "Procedure 'missing' is not defined".into(),
                });
            }
            let remaining = self.timeouts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.timeouts.store(remaining - 1, Ordering::SeqCst);
                return Err(TarantoolError::Box {
                    code: codes::TIMEOUT,
                    message: "Timeout exceeded".into(),
                });
            }
            Ok(call.args.clone())
        }
    }

    struct FlakyConnector(Arc<Flaky>);

    #[async_trait]
    impl Connector<dyn TarantoolConnection> for FlakyConnector {
        async fn connect(&self, _address: &str) -> Result<Arc<dyn TarantoolConnection>, TarantoolError> {
            Ok(self.0.clone() as Arc<dyn TarantoolConnection>)
        }
    }

    fn shard(max_attempts: u32) -> TarantoolShard {
        TarantoolShard::new(
            &ShardConfig::new("tnt-master:3301").with_retry(RetryConfig {
                max_attempts,
                per_attempt_wait_ms: 10,
            }),
            None,
        )
    }

    #[test]
    fn test_classifier() {
        let classifier = TarantoolClassifier;
        let err = |code| TarantoolError::Box {
            code,
            message: String::new(),
        };
        assert!(classifier.is_retryable(&err(codes::NO_CONNECTION)));
        assert!(classifier.is_retryable(&err(codes::TIMEOUT)));
        assert!(!classifier.is_retryable(&err(codes::NO_SUCH_PROC)));
        assert!(!classifier.is_retryable(&TarantoolError::Decode("bad msgpack".into())));
        assert!(!classifier.is_retryable(&TarantoolError::Unavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_master_tolerant_retries_timeouts() {
        let conn = Arc::new(Flaky {
            timeouts: AtomicU32::new(2),
            calls: AtomicU32::new(0),
        });
        let shard = shard(2);
        shard.setup(&FlakyConnector(conn.clone())).await.unwrap();

        let result = shard
            .call_master_tolerant(&CancellationToken::new(), &Call::new("echo").arg(5))
            .await
            .unwrap();

        assert_eq!(result, vec![Value::Int(5)]);
        assert_eq!(conn.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_function_is_not_retried() {
        let conn = Arc::new(Flaky {
            timeouts: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        });
        let shard = shard(5);
        shard.setup(&FlakyConnector(conn.clone())).await.unwrap();

        let err = shard
            .call_replica_tolerant(&CancellationToken::new(), &Call::new("missing"))
            .await
            .unwrap_err();

        assert_eq!(err.driver_error().and_then(|e| e.code()), Some(codes::NO_SUCH_PROC));
        assert_eq!(conn.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_timeouts() {
        let conn = Arc::new(Flaky {
            timeouts: AtomicU32::new(10),
            calls: AtomicU32::new(0),
        });
        let shard = shard(1);
        shard.setup(&FlakyConnector(conn.clone())).await.unwrap();

        let err = shard
            .call_master_tolerant(&CancellationToken::new(), &Call::new("echo"))
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::Exhausted { attempts: 2, .. }));
    }
}
