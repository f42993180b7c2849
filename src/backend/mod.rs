//! Backend bindings over the routing core
//!
//! Each backend defines a capability trait on top of
//! [`Connection`](switchyard_core_resilience::Connection), a null connection
//! used as the fallback node, an error classifier with the backend's retryable
//! codes, and a shard wrapper exposing named master/replica calls.
//!
//! - [`mysql`]: `exec`/`query` with [`Statement`] payloads
//! - [`redis`]: commands with [`Command`] payloads
//! - [`tarantool`]: stored-procedure [`Call`]s
//! - [`http`]: a [`reqwest`] client that retries timeouts
//! - [`tcp`]: connect-only probe used by the CLI
//!
//! # Example
//!
//! ```no_run
//! use switchyard::backend::mysql::{MysqlShard, Statement};
//! use switchyard_core_resilience::{Barber, CancellationToken, ShardConfig};
//! use std::sync::Arc;
//!
//! # async fn run(connector: &dyn switchyard_core_resilience::Connector<dyn switchyard::backend::mysql::SqlConnection>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = ShardConfig::new("db-master:3306").with_replicas(["db-replica:3306"]);
//! let shard = MysqlShard::new(&config, Some(Arc::new(Barber::new_default())));
//! shard.setup(connector).await?;
//!
//! let cancel = CancellationToken::new();
//! let rows = shard
//!     .query_replica_tolerant(&cancel, &Statement::new("SELECT id FROM users WHERE name = ?").bind("alice"))
//!     .await?;
//! println!("{} rows", rows.rows.len());
//! shard.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod http;
pub mod mysql;
pub mod redis;
pub mod tarantool;
pub mod tcp;
pub mod types;

pub use http::{HttpError, TolerantHttpClient};
pub use mysql::{MysqlClassifier, MysqlShard, NullSql, SqlConnection, SqlError, Statement};
pub use redis::{Command, KvConnection, KvError, NullKv, RedisClassifier, RedisShard, Reply};
pub use tarantool::{
    Call, NullTarantool, TarantoolClassifier, TarantoolConnection, TarantoolError, TarantoolShard,
};
pub use tcp::{probe_shard, TcpClassifier, TcpConnection, TcpConnector, TcpError};
pub use types::Value;
