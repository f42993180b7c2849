//! Cluster: an ordered list of independent shards
//!
//! A [`Choose`] strategy maps a request onto one shard. `Crc32` hashing is
//! stable across restarts only while the shard list keeps its order, so the
//! order of shards in configuration is part of the routing contract.

use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::classify::ErrorClassifier;
use crate::error::{InvalidShard, RouteError};
use crate::node::{Connection, Connector};
use crate::shard::{Shard, ShardConfig};

/// Ordered shard descriptions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub shards: Vec<ShardConfig>,
}

/// Shard selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choose<'a> {
    /// Always the first shard
    First,
    /// A uniformly random shard
    Random,
    /// A fixed index.
    ///
    /// Only `idx > len` is rejected here; `idx == len` passes and is caught
    /// when the cluster looks the shard up.
    Given(usize),
    /// IEEE CRC32 of the key modulo the shard count
    Crc32(&'a [u8]),
}

impl Choose<'_> {
    /// Resolve to a shard index for a cluster of `len` shards
    pub fn index(&self, len: usize) -> Result<usize, InvalidShard> {
        if len == 0 {
            return Err(InvalidShard { index: 0, len });
        }
        match *self {
            Choose::First => Ok(0),
            Choose::Random => Ok(rand::rng().random_range(0..len)),
            Choose::Given(index) if index > len => Err(InvalidShard { index, len }),
            Choose::Given(index) => Ok(index),
            Choose::Crc32(key) => shard_for_key(key, len).ok_or(InvalidShard { index: 0, len }),
        }
    }
}

/// Shard index for `key`, or `None` when there are no shards
pub fn shard_for_key(key: &[u8], shards: usize) -> Option<usize> {
    (crc32fast::hash(key) as usize).checked_rem(shards)
}

/// Ordered collection of shards sharing one connection type
pub struct Cluster<C: ?Sized + Connection> {
    shards: Vec<Shard<C>>,
}

impl<C: ?Sized + Connection> Cluster<C> {
    pub fn new(shards: Vec<Shard<C>>) -> Self {
        Self { shards }
    }

    /// Build one shard per config entry.
    ///
    /// Node ids restart at zero in every shard, so `breaker` is called once per
    /// shard index and must not hand the same breaker to two shards.
    pub fn from_config<B>(
        config: &ClusterConfig,
        fallback: Arc<C>,
        classifier: Arc<dyn ErrorClassifier<C::Error>>,
        mut breaker: B,
    ) -> Self
    where
        B: FnMut(usize) -> Option<Arc<dyn CircuitBreaker>>,
    {
        let shards = config
            .shards
            .iter()
            .enumerate()
            .map(|(index, shard)| {
                Shard::new(shard, Arc::clone(&fallback), Arc::clone(&classifier), breaker(index))
            })
            .collect();
        Self { shards }
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn shards(&self) -> &[Shard<C>] {
        &self.shards
    }

    /// The shard selected by `strategy`
    pub fn choose(&self, strategy: Choose<'_>) -> Result<&Shard<C>, RouteError<C::Error>> {
        let index = strategy.index(self.shards.len())?;
        self.shards.get(index).ok_or_else(|| {
            RouteError::InvalidShard(InvalidShard {
                index,
                len: self.shards.len(),
            })
        })
    }

    /// Set up every shard in order; on failure the shards already set up are closed
    pub async fn setup_all<K>(&self, connector: &K) -> Result<(), RouteError<C::Error>>
    where
        K: Connector<C> + ?Sized,
    {
        for (index, shard) in self.shards.iter().enumerate() {
            if let Err(err) = shard.setup(connector).await {
                for ready in &self.shards[..index] {
                    if let Err(close_err) = ready.close().await {
                        warn!(error = %close_err, "rollback close failed");
                    }
                }
                return Err(err);
            }
        }
        info!(shards = self.shards.len(), "cluster ready");
        Ok(())
    }

    /// Close every shard, returning the first error
    pub async fn close_all(&self) -> Result<(), RouteError<C::Error>> {
        let mut first_error = None;
        for shard in &self.shards {
            if let Err(err) = shard.close().await {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
