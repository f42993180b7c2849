//! End-to-end routing behaviour through the public API

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use switchyard_core_resilience::prelude::*;
use switchyard_core_resilience::{NodeSet, RetryConfig};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
enum KvError {
    #[error("unavailable")]
    Unavailable,
    #[error("server error {0}")]
    Code(u16),
}

impl DriverError for KvError {
    fn unavailable() -> Self {
        KvError::Unavailable
    }

    fn is_unavailable(&self) -> bool {
        matches!(self, KvError::Unavailable)
    }
}

#[async_trait]
trait KvConnection: Connection<Error = KvError> {
    async fn get(&self, key: &str) -> Result<String, KvError>;
}

struct MemoryConn {
    name: String,
    failures: Mutex<Vec<KvError>>,
    closes: AtomicU32,
}

#[async_trait]
impl Connection for MemoryConn {
    type Error = KvError;

    async fn ping(&self) -> Result<(), KvError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), KvError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl KvConnection for MemoryConn {
    async fn get(&self, key: &str) -> Result<String, KvError> {
        match self.failures.lock().unwrap().pop() {
            Some(err) => Err(err),
            None => Ok(format!("{}:{}", self.name, key)),
        }
    }
}

struct NullConn;

#[async_trait]
impl Connection for NullConn {
    type Error = KvError;

    async fn ping(&self) -> Result<(), KvError> {
        Err(KvError::unavailable())
    }

    async fn close(&self) -> Result<(), KvError> {
        Ok(())
    }
}

#[async_trait]
impl KvConnection for NullConn {
    async fn get(&self, _key: &str) -> Result<String, KvError> {
        Err(KvError::unavailable())
    }
}

#[derive(Default)]
struct MemoryConnector {
    opened: Mutex<HashMap<String, Arc<MemoryConn>>>,
}

impl MemoryConnector {
    fn conn(&self, address: &str) -> Arc<MemoryConn> {
        self.opened.lock().unwrap()[address].clone()
    }
}

#[async_trait]
impl Connector<dyn KvConnection> for MemoryConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn KvConnection>, KvError> {
        let conn = Arc::new(MemoryConn {
            name: address.to_string(),
            failures: Mutex::new(Vec::new()),
            closes: AtomicU32::new(0),
        });
        self.opened
            .lock()
            .unwrap()
            .insert(address.to_string(), conn.clone());
        Ok(conn as Arc<dyn KvConnection>)
    }
}

fn retryable(err: &KvError) -> bool {
    matches!(err, KvError::Code(1040))
}

fn shard_config(replicas: usize, max_attempts: u32) -> ShardConfig {
    ShardConfig::new("master")
        .with_replicas((0..replicas).map(|i| format!("replica-{i}")))
        .with_retry(RetryConfig {
            max_attempts,
            per_attempt_wait_ms: 1,
        })
}

fn null() -> Arc<dyn KvConnection> {
    Arc::new(NullConn)
}

fn new_shard(config: &ShardConfig, breaker: Option<Arc<dyn CircuitBreaker>>) -> Shard<dyn KvConnection> {
    Shard::new(config, null(), Arc::new(retryable), breaker)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_picks_stay_fair() {
    let set = Arc::new(NodeSet::new(
        "master",
        (0..4).map(|i| format!("replica-{i}")).collect(),
        null(),
    ));
    set.setup(&MemoryConnector::default()).await.unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let set = set.clone();
            tokio::spawn(async move {
                (0..100)
                    .map(|_| set.pick().unwrap().address().to_string())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut visits: HashMap<String, usize> = HashMap::new();
    for task in tasks {
        for address in task.await.unwrap() {
            *visits.entry(address).or_default() += 1;
        }
    }

    // 800 tickets over 4 replicas, each ticket unique
    assert_eq!(visits.len(), 4);
    assert!(visits.values().all(|&count| count == 200));
}

#[tokio::test(start_paused = true)]
async fn test_tolerant_read_fails_over_between_replicas() {
    let connector = MemoryConnector::default();
    let barber: Arc<dyn CircuitBreaker> = Arc::new(Barber::new(BarberConfig {
        threshold: 1,
        ..Default::default()
    }));
    let shard = new_shard(&shard_config(2, 2), Some(barber));
    shard.setup(&connector).await.unwrap();

    connector
        .conn("replica-0")
        .failures
        .lock()
        .unwrap()
        .push(KvError::Code(1040));

    let value = shard
        .exec_replica_tolerant(&CancellationToken::new(), |conn| async move {
            conn.get("user-42").await
        })
        .await
        .unwrap();

    assert_eq!(value, "replica-1:user-42");
    let stats = shard.stats();
    assert_eq!(stats[1].address, "replica-0");
    assert_eq!(stats[1].fails_count, 1);
    assert_eq!(stats[2].fails_count, 0);
}

#[tokio::test]
async fn test_terminal_errors_are_returned_untouched() {
    let connector = MemoryConnector::default();
    let shard = new_shard(&shard_config(0, 5), None);
    shard.setup(&connector).await.unwrap();

    connector
        .conn("master")
        .failures
        .lock()
        .unwrap()
        .push(KvError::Code(1064));

    let err = shard
        .exec_master_tolerant(&CancellationToken::new(), |conn| async move {
            conn.get("k").await
        })
        .await
        .unwrap_err();

    assert!(err.is_terminal());
    assert_eq!(err.driver_error(), Some(&KvError::Code(1064)));
}

#[tokio::test]
async fn test_fallback_calls_leave_breaker_untouched() {
    let connector = MemoryConnector::default();
    let barber = Arc::new(Barber::new(BarberConfig {
        threshold: 1,
        ..Default::default()
    }));
    let breaker: Arc<dyn CircuitBreaker> = barber.clone();
    let shard = new_shard(&shard_config(1, 3), Some(breaker));
    shard.setup(&connector).await.unwrap();

    // Trip the master, then hammer the fallback
    barber.add_error(NodeId::MASTER, std::time::Instant::now());
    let before = barber.stats();

    let cancel = CancellationToken::new();
    for _ in 0..10 {
        let err = shard
            .exec_master(&cancel, |conn| async move { conn.get("k").await })
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
    }

    assert_eq!(barber.stats(), before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_close_closes_each_connection_once() {
    let connector = MemoryConnector::default();
    let shard = Arc::new(new_shard(&shard_config(3, 0), None));
    shard.setup(&connector).await.unwrap();

    let closers: Vec<_> = (0..16)
        .map(|_| {
            let shard = shard.clone();
            tokio::spawn(async move { shard.close().await })
        })
        .collect();
    for closer in closers {
        closer.await.unwrap().unwrap();
    }

    for address in ["master", "replica-0", "replica-1", "replica-2"] {
        assert_eq!(connector.conn(address).closes.load(Ordering::SeqCst), 1);
    }
    assert!(matches!(
        shard
            .exec_master(&CancellationToken::new(), |conn| async move { conn.get("k").await })
            .await,
        Err(RouteError::Closed)
    ));
}

#[tokio::test]
async fn test_cluster_routes_keys_to_stable_shards() {
    let config = ClusterConfig {
        shards: (0..4)
            .map(|i| ShardConfig::new(format!("shard-{i}")))
            .collect(),
    };
    let cluster: Cluster<dyn KvConnection> =
        Cluster::from_config(&config, null(), Arc::new(retryable), |_| None);
    cluster.setup_all(&MemoryConnector::default()).await.unwrap();

    let cancel = CancellationToken::new();
    for _ in 0..10 {
        let value = cluster
            .choose(Choose::Crc32(b"user-42"))
            .unwrap()
            .exec_replica(&cancel, |conn| async move { conn.get("user-42").await })
            .await
            .unwrap();
        assert_eq!(value, "shard-3:user-42");
    }

    cluster.close_all().await.unwrap();
}
