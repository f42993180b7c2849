//! Shard: one master/replica group with the four routed call shapes
//!
//! A [`Shard`] binds a [`NodeSet`], a [`TolerantExecutor`] and a backend
//! [`ErrorClassifier`]. Every operation is a closure over the chosen node's
//! connection:
//!
//! | Call                      | Node            | Retries |
//! |---------------------------|-----------------|---------|
//! | `exec_master`             | master/fallback | no      |
//! | `exec_master_tolerant`    | master/fallback | yes     |
//! | `exec_replica`            | picked replica  | no      |
//! | `exec_replica_tolerant`   | re-picked per attempt | yes |
//!
//! Any driver error other than the null connection's `Unavailable` is reported
//! to the circuit breaker against the node that produced it.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::circuit_breaker::CircuitBreaker;
use crate::classify::{ErrorClassifier, Verdict};
use crate::error::{DriverError, RouteError};
use crate::health::{node_check, HealthCheck};
use crate::node::{Connection, Connector, Node};
use crate::node_set::{NodeSet, NodeStats, Selection};
use crate::retry::{AttemptError, RetryConfig, RetryError, TolerantExecutor};

/// Observer called before each retry with the failing node's address
pub type RetryObserver<E> = Arc<dyn Fn(&str, &E) + Send + Sync>;

/// Static description of one shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardConfig {
    /// Master address
    pub master: String,

    /// Replica addresses, in id order
    #[serde(default)]
    pub replicas: Vec<String>,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub selection: Selection,

    /// Breaker probes per replica selection
    #[serde(default = "default_max_barber_attempts")]
    pub max_barber_attempts: usize,
}

fn default_max_barber_attempts() -> usize {
    3
}

impl ShardConfig {
    pub fn new(master: impl Into<String>) -> Self {
        Self {
            master: master.into(),
            replicas: Vec::new(),
            retry: RetryConfig::default(),
            selection: Selection::default(),
            max_barber_attempts: default_max_barber_attempts(),
        }
    }

    pub fn with_replicas<I, S>(mut self, replicas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.replicas = replicas.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }
}

/// Why a tolerant attempt failed
enum Failure<C: ?Sized + Connection> {
    /// Node selection itself failed
    Route(RouteError<C::Error>),
    /// The operation failed on a node
    Node { node: Node<C>, error: C::Error },
}

impl<C: ?Sized + Connection> Failure<C> {
    fn into_route(self) -> RouteError<C::Error> {
        match self {
            Failure::Route(err) => err,
            Failure::Node { error, .. } => RouteError::from_driver(error),
        }
    }
}

/// A master/replica group
pub struct Shard<C: ?Sized + Connection> {
    nodes: NodeSet<C>,
    executor: TolerantExecutor,
    classifier: Arc<dyn ErrorClassifier<C::Error>>,
    on_retry: Option<RetryObserver<C::Error>>,
}

impl<C: ?Sized + Connection> Shard<C> {
    /// Create a shard; call [`setup`](Self::setup) before routing
    pub fn new(
        config: &ShardConfig,
        fallback: Arc<C>,
        classifier: Arc<dyn ErrorClassifier<C::Error>>,
        breaker: Option<Arc<dyn CircuitBreaker>>,
    ) -> Self {
        let nodes = NodeSet::new(config.master.clone(), config.replicas.clone(), fallback)
            .with_selection(config.selection)
            .with_max_barber_attempts(config.max_barber_attempts)
            .with_breaker(breaker);
        Self {
            nodes,
            executor: TolerantExecutor::new(&config.retry),
            classifier,
            on_retry: None,
        }
    }

    pub fn with_retry_observer(mut self, observer: RetryObserver<C::Error>) -> Self {
        self.on_retry = Some(observer);
        self
    }

    pub fn node_set(&self) -> &NodeSet<C> {
        &self.nodes
    }

    pub async fn setup<K>(&self, connector: &K) -> Result<(), RouteError<C::Error>>
    where
        K: Connector<C> + ?Sized,
    {
        self.nodes.setup(connector).await
    }

    /// Idempotent; safe to call from several tasks at once
    pub async fn close(&self) -> Result<(), RouteError<C::Error>> {
        self.nodes.close().await
    }

    /// Breaker counters keyed by node address
    pub fn stats(&self) -> Vec<NodeStats> {
        self.nodes.stats()
    }

    /// Run `op` once on the master (or the fallback when the master is down)
    pub async fn exec_master<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, RouteError<C::Error>>
    where
        F: FnOnce(Arc<C>) -> Fut,
        Fut: Future<Output = Result<T, C::Error>>,
    {
        if cancel.is_cancelled() {
            return Err(RouteError::Cancelled);
        }
        let node = self.nodes.master()?;
        self.call_once(cancel, node, op).await
    }

    /// Run `op` once on a selected replica
    pub async fn exec_replica<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, RouteError<C::Error>>
    where
        F: FnOnce(Arc<C>) -> Fut,
        Fut: Future<Output = Result<T, C::Error>>,
    {
        if cancel.is_cancelled() {
            return Err(RouteError::Cancelled);
        }
        let node = self.nodes.pick()?;
        self.call_once(cancel, node, op).await
    }

    /// Run `op` on the master with bounded retries
    pub async fn exec_master_tolerant<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, RouteError<C::Error>>
    where
        F: FnMut(Arc<C>) -> Fut,
        Fut: Future<Output = Result<T, C::Error>>,
    {
        self.tolerant(cancel, || self.nodes.master(), op).await
    }

    /// Run `op` on replicas with bounded retries, selecting a replica per attempt
    pub async fn exec_replica_tolerant<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, RouteError<C::Error>>
    where
        F: FnMut(Arc<C>) -> Fut,
        Fut: Future<Output = Result<T, C::Error>>,
    {
        self.tolerant(cancel, || self.nodes.pick(), op).await
    }

    async fn call_once<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        node: Node<C>,
        op: F,
    ) -> Result<T, RouteError<C::Error>>
    where
        F: FnOnce(Arc<C>) -> Fut,
        Fut: Future<Output = Result<T, C::Error>>,
    {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(RouteError::Cancelled),
            outcome = op(Arc::clone(node.conn())) => outcome,
        };
        outcome.map_err(|err| self.fail(&node, err))
    }

    fn fail(&self, node: &Node<C>, err: C::Error) -> RouteError<C::Error> {
        if !err.is_unavailable() {
            self.nodes.record_error(node);
        }
        RouteError::from_driver(err)
    }

    async fn tolerant<T, S, F, Fut>(
        &self,
        cancel: &CancellationToken,
        select: S,
        mut op: F,
    ) -> Result<T, RouteError<C::Error>>
    where
        S: Fn() -> Result<Node<C>, RouteError<C::Error>>,
        F: FnMut(Arc<C>) -> Fut,
        Fut: Future<Output = Result<T, C::Error>>,
    {
        let nodes = &self.nodes;
        let action = || {
            let attempt = select().map(|node| {
                let call = op(Arc::clone(node.conn()));
                (node, call)
            });
            async move {
                let (node, call) = match attempt {
                    Ok(selected) => selected,
                    Err(err) => return Err(AttemptError::Terminal(Failure::Route(err))),
                };
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(AttemptError::Terminal(Failure::Route(RouteError::Cancelled)));
                    }
                    outcome = call => outcome,
                };
                outcome.map_err(|error| {
                    if !error.is_unavailable() {
                        nodes.record_error(&node);
                    }
                    AttemptError::Failed(Failure::Node { node, error })
                })
            }
        };

        let classify = |failure: &Failure<C>| match failure {
            Failure::Node { error, .. } if !error.is_unavailable() => self.classifier.verdict(error),
            _ => Verdict::Terminal,
        };

        let on_retry = |attempt: u32, failure: &Failure<C>| {
            if let Failure::Node { node, error } = failure {
                warn!(
                    attempt,
                    node = %node.id(),
                    address = node.address(),
                    error = %error,
                    "retrying operation"
                );
                if let Some(observer) = &self.on_retry {
                    observer(node.address(), error);
                }
            }
        };

        match self.executor.run(cancel, action, classify, on_retry).await {
            Ok(value) => Ok(value),
            Err(RetryError::Cancelled { .. }) => Err(RouteError::Cancelled),
            Err(RetryError::Terminal(failure)) => Err(failure.into_route()),
            Err(RetryError::Exhausted { attempts, source }) => match source {
                Failure::Node { error, .. } => Err(RouteError::Exhausted {
                    attempts,
                    source: error,
                }),
                Failure::Route(err) => Err(err),
            },
        }
    }
}

impl<C: ?Sized + Connection + 'static> Shard<C> {
    /// One health check per node, master first
    pub fn health_checks(&self) -> Result<Vec<HealthCheck>, RouteError<C::Error>> {
        Ok(self.nodes.nodes()?.into_iter().map(node_check).collect())
    }
}
