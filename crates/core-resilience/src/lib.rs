//! Switchyard Core Resilience: Pure-logic master/replica routing
//!
//! # Overview
//!
//! This crate routes operations to one of several interchangeable backend
//! connections, a master and N replicas, and keeps working when some of them
//! are failing. It includes:
//!
//! - **Circuit Breaker**: per-node availability contract plus the sliding-window [`Barber`]
//! - **Node Set**: master, replicas and a null-connection fallback with breaker-aware selection
//! - **Tolerant Executor**: bounded retry with pluggable classification and a cancellable wait
//! - **Error Classifier**: per-backend "is this transient?" predicate
//! - **Shard**: the four call shapes (master/replica, direct/tolerant)
//! - **Cluster**: ordered shards picked by first, random, given index or CRC32 of a key
//! - **Health**: ping-and-grade callbacks for every node
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - Wire protocols (MySQL, Redis, Tarantool, HTTP)
//! - Connection strings, TLS or pooling inside a driver
//! - How errors are logged or alerted on
//!
//! Backends plug in through the [`Connection`] and [`Connector`] traits, a
//! [`DriverError`] implementation and an [`ErrorClassifier`].
//!
//! # Architecture
//!
//! ```text
//!  caller
//!    │
//!    ▼
//! ┌─────────────────────────────────────────┐
//! │       Cluster::choose                    │  ← First / Random / Given / Crc32
//! └─────────────┬───────────────────────────┘
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Shard                              │  ← exec_{master,replica}[_tolerant]
//! │  (TolerantExecutor + ErrorClassifier)    │
//! └─────────────┬───────────────────────────┘
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       NodeSet::master / pick             │  ← consults CircuitBreaker
//! └─────────────┬───────────────────────────┘
//!               ▼
//!      master │ replica │ fallback (null connection)
//!               │
//!          On failure: CircuitBreaker::add_error(node)
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use switchyard_core_resilience::prelude::*;
//!
//! # async fn example<C, K>(fallback: Arc<C>, connector: K,
//! #     classifier: Arc<dyn ErrorClassifier<C::Error>>) -> Result<(), RouteError<C::Error>>
//! # where C: Connection, K: Connector<C> {
//! let config = ShardConfig::new("db-master:3306").with_replicas(["db-replica-1:3306"]);
//! let breaker: Arc<dyn CircuitBreaker> = Arc::new(Barber::new_default());
//!
//! let shard = Shard::new(&config, fallback, classifier, Some(breaker));
//! shard.setup(&connector).await?;
//!
//! let cancel = CancellationToken::new();
//! shard
//!     .exec_replica_tolerant(&cancel, |conn| async move { conn.ping().await })
//!     .await?;
//!
//! shard.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod classify;
pub mod cluster;
pub mod error;
pub mod health;
pub mod node;
pub mod node_set;
pub mod retry;
pub mod shard;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use circuit_breaker::{Barber, BarberConfig, BreakerStats, CircuitBreaker, HostStats};
pub use classify::{ErrorClassifier, Verdict};
pub use cluster::{shard_for_key, Choose, Cluster, ClusterConfig};
pub use error::{DriverError, InvalidShard, RouteError};
pub use health::{node_check, run_checks, HealthCheck, HealthReport, HealthStatus, CRITICAL_LATENCY};
pub use node::{Connection, Connector, Node, NodeId, Role};
pub use node_set::{NodeSet, NodeStats, Selection};
pub use retry::{AttemptError, RetryConfig, RetryError, TolerantExecutor};
pub use shard::{RetryObserver, Shard, ShardConfig};

pub use tokio_util::sync::CancellationToken;

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use switchyard_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::circuit_breaker::{Barber, BarberConfig, CircuitBreaker};
    pub use super::classify::{ErrorClassifier, Verdict};
    pub use super::cluster::{Choose, Cluster, ClusterConfig};
    pub use super::error::{DriverError, RouteError};
    pub use super::health::{HealthCheck, HealthReport, HealthStatus};
    pub use super::node::{Connection, Connector, Node, NodeId, Role};
    pub use super::node_set::Selection;
    pub use super::retry::RetryConfig;
    pub use super::shard::{Shard, ShardConfig};
    pub use tokio_util::sync::CancellationToken;
}
