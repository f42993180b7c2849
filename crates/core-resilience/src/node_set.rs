//! Master/replica node set with breaker-aware selection
//!
//! A [`NodeSet`] owns one master, an ordered list of replicas and a fallback
//! node wrapping a null connection. Connections are opened once by
//! [`NodeSet::setup`] and closed once by [`NodeSet::close`]; in between the
//! membership never changes.
//!
//! Replica selection probes the circuit breaker up to `max_barber_attempts`
//! times. When every probe reports the replica down the last probed replica is
//! returned anyway, so a returned node is best effort rather than guaranteed
//! healthy.

use std::iter;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::error::RouteError;
use crate::node::{Connection, Connector, Node, NodeId, Role};

/// Replica selection strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    #[default]
    RoundRobin,
    Random,
}

/// Per-node counters exposed for observability
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStats {
    pub id: NodeId,
    pub address: String,
    pub role: Role,
    /// Failures the circuit breaker currently holds for this node
    pub fails_count: u64,
    /// Times selection skipped this replica because the breaker reported it down
    pub probe_misses: u64,
}

struct Members<C: ?Sized> {
    master: Node<C>,
    replicas: Vec<Node<C>>,
    probe_misses: Vec<AtomicU64>,
}

impl<C: ?Sized> Members<C> {
    fn all(&self) -> impl Iterator<Item = &Node<C>> {
        iter::once(&self.master).chain(self.replicas.iter())
    }
}

/// Ordered set of master, replicas and fallback
pub struct NodeSet<C: ?Sized + Connection> {
    master_address: String,
    replica_addresses: Vec<String>,
    selection: Selection,
    max_barber_attempts: usize,
    breaker: Option<Arc<dyn CircuitBreaker>>,
    fallback: Node<C>,
    members: OnceCell<Members<C>>,
    cursor: AtomicU32,
    closed: AtomicBool,
}

impl<C: ?Sized + Connection> NodeSet<C> {
    /// Create an empty node set; nothing is opened until [`setup`](Self::setup)
    pub fn new(master: impl Into<String>, replicas: Vec<String>, fallback: Arc<C>) -> Self {
        Self {
            master_address: master.into(),
            replica_addresses: replicas,
            selection: Selection::default(),
            max_barber_attempts: 1,
            breaker: None,
            fallback: Node::fallback(fallback),
            members: OnceCell::new(),
            cursor: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }

    /// Number of breaker probes per selection; 0 is treated as 1
    pub fn with_max_barber_attempts(mut self, attempts: usize) -> Self {
        self.max_barber_attempts = attempts.max(1);
        self
    }

    pub fn with_breaker(mut self, breaker: Option<Arc<dyn CircuitBreaker>>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn breaker(&self) -> Option<&Arc<dyn CircuitBreaker>> {
        self.breaker.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.members.initialized() && !self.closed.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Open and ping the master, then every replica in order.
    ///
    /// The first failure closes everything opened so far and aborts setup.
    /// Calling `setup` again after success is a no-op.
    pub async fn setup<K>(&self, connector: &K) -> Result<(), RouteError<C::Error>>
    where
        K: Connector<C> + ?Sized,
    {
        if self.is_closed() {
            return Err(RouteError::Closed);
        }
        self.members
            .get_or_try_init(|| self.open_all(connector))
            .await?;
        Ok(())
    }

    async fn open_all<K>(&self, connector: &K) -> Result<Members<C>, RouteError<C::Error>>
    where
        K: Connector<C> + ?Sized,
    {
        let master_conn = open_node(connector, &self.master_address)
            .await
            .map_err(|source| setup_error(&self.master_address, source))?;
        let master = Node::new(master_conn, NodeId::MASTER, Role::Master, self.master_address.as_str());

        let mut replicas: Vec<Node<C>> = Vec::with_capacity(self.replica_addresses.len());
        for (index, address) in self.replica_addresses.iter().enumerate() {
            match open_node(connector, address).await {
                Ok(conn) => replicas.push(Node::new(
                    conn,
                    NodeId::replica(index),
                    Role::Replica,
                    address.as_str(),
                )),
                Err(source) => {
                    for node in iter::once(&master).chain(replicas.iter()) {
                        close_quietly(node).await;
                    }
                    return Err(setup_error(address, source));
                }
            }
        }

        info!(
            master = %self.master_address,
            replicas = replicas.len(),
            "node set ready"
        );

        let probe_misses = replicas.iter().map(|_| AtomicU64::new(0)).collect();
        Ok(Members {
            master,
            replicas,
            probe_misses,
        })
    }

    fn members(&self) -> Result<&Members<C>, RouteError<C::Error>> {
        if self.is_closed() {
            return Err(RouteError::Closed);
        }
        self.members.get().ok_or(RouteError::NotReady)
    }

    /// The master if the breaker reports it available, the fallback otherwise
    pub fn master(&self) -> Result<Node<C>, RouteError<C::Error>> {
        let members = self.members()?;
        Ok(self.master_of(members))
    }

    fn master_of(&self, members: &Members<C>) -> Node<C> {
        match &self.breaker {
            Some(breaker) if !breaker.is_available(NodeId::MASTER, Instant::now()) => {
                debug!(master = %self.master_address, "master unavailable, using fallback");
                self.fallback.clone()
            }
            _ => members.master.clone(),
        }
    }

    /// Select a replica.
    ///
    /// Without a breaker this is plain round robin (or random). With one, up to
    /// `max_barber_attempts` replicas are probed and the first available one is
    /// returned; if none is, the last probed replica is returned regardless.
    /// A node set without replicas serves reads from the master.
    pub fn pick(&self) -> Result<Node<C>, RouteError<C::Error>> {
        let members = self.members()?;
        let replicas = &members.replicas;
        if replicas.is_empty() {
            return Ok(self.master_of(members));
        }

        let mut idx = self.next_index(replicas.len());
        let Some(breaker) = &self.breaker else {
            return Ok(replicas[idx].clone());
        };

        let now = Instant::now();
        for probe in 1..=self.max_barber_attempts {
            let node = &replicas[idx];
            if breaker.is_available(node.id(), now) {
                return Ok(node.clone());
            }
            members.probe_misses[idx].fetch_add(1, Ordering::Relaxed);
            if probe < self.max_barber_attempts {
                idx = self.next_index(replicas.len());
            }
        }

        let node = &replicas[idx];
        debug!(
            node = %node.id(),
            address = node.address(),
            attempts = self.max_barber_attempts,
            "no replica reported available, using last probed"
        );
        Ok(node.clone())
    }

    fn next_index(&self, len: usize) -> usize {
        match self.selection {
            // fetch_add hands out the ticket before the increment
            Selection::RoundRobin => self.cursor.fetch_add(1, Ordering::Relaxed) as usize % len,
            Selection::Random => rand::rng().random_range(0..len),
        }
    }

    /// Report a failed call against `node`; fallback failures are ignored
    pub fn record_error(&self, node: &Node<C>) {
        if node.is_fallback() {
            return;
        }
        if let Some(breaker) = &self.breaker {
            breaker.add_error(node.id(), Instant::now());
        }
    }

    /// Master followed by replicas in configuration order
    pub fn nodes(&self) -> Result<Vec<Node<C>>, RouteError<C::Error>> {
        Ok(self.members()?.all().cloned().collect())
    }

    /// Breaker and selection counters keyed by node
    pub fn stats(&self) -> Vec<NodeStats> {
        let Some(members) = self.members.get() else {
            return Vec::new();
        };
        let breaker_stats = self.breaker.as_ref().map(|b| b.stats()).unwrap_or_default();

        let misses = iter::once(0).chain(
            members
                .probe_misses
                .iter()
                .map(|m| m.load(Ordering::Relaxed)),
        );
        members
            .all()
            .zip(misses)
            .map(|(node, probe_misses)| NodeStats {
                id: node.id(),
                address: node.address().to_string(),
                role: node.role(),
                fails_count: breaker_stats.fails_for(node.id()),
                probe_misses,
            })
            .collect()
    }

    /// Close master then replicas.
    ///
    /// Every connection is closed even when an earlier one fails; the first
    /// error is returned. Only the first call does any work, so concurrent or
    /// repeated calls never close a connection twice.
    pub async fn close(&self) -> Result<(), RouteError<C::Error>> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let Some(members) = self.members.get() else {
            return Ok(());
        };

        let mut first_error = None;
        for node in members.all() {
            if let Err(err) = node.conn().close().await {
                warn!(node = %node.id(), address = node.address(), error = %err, "failed to close node");
                first_error.get_or_insert(err);
            }
        }
        info!(master = %self.master_address, "node set closed");

        match first_error {
            Some(err) => Err(RouteError::Driver(err)),
            None => Ok(()),
        }
    }
}

async fn open_node<C, K>(connector: &K, address: &str) -> Result<Arc<C>, C::Error>
where
    C: ?Sized + Connection,
    K: Connector<C> + ?Sized,
{
    let conn = connector.connect(address).await?;
    if let Err(err) = conn.ping().await {
        if let Err(close_err) = conn.close().await {
            debug!(address, error = %close_err, "close after failed ping also failed");
        }
        return Err(err);
    }
    debug!(address, "node connected");
    Ok(conn)
}

async fn close_quietly<C: ?Sized + Connection>(node: &Node<C>) {
    if let Err(err) = node.conn().close().await {
        warn!(address = node.address(), error = %err, "rollback close failed");
    }
}

fn setup_error<E>(address: &str, source: E) -> RouteError<E>
where
    E: std::fmt::Display,
{
    warn!(address, error = %source, "node setup failed");
    RouteError::Setup {
        address: address.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockConn, MockConnector, StaticBreaker};
    use std::collections::HashMap;

    fn replicas(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("replica-{i}")).collect()
    }

    async fn ready(n: usize, breaker: Option<Arc<dyn CircuitBreaker>>) -> NodeSet<MockConn> {
        let set = NodeSet::new("master", replicas(n), Arc::new(MockConn::null()))
            .with_max_barber_attempts(n)
            .with_breaker(breaker);
        set.setup(&MockConnector::new()).await.unwrap();
        set
    }

    #[tokio::test]
    async fn test_round_robin_fairness() {
        let set = ready(3, Some(Arc::new(StaticBreaker::default()))).await;

        let mut visits: HashMap<String, usize> = HashMap::new();
        for _ in 0..30 {
            let node = set.pick().unwrap();
            *visits.entry(node.address().to_string()).or_default() += 1;
        }

        assert_eq!(visits.len(), 3);
        assert!(visits.values().all(|&count| count == 10));
    }

    #[tokio::test]
    async fn test_round_robin_without_breaker_is_sequential() {
        let set = ready(3, None).await;
        let order: Vec<i32> = (0..6).map(|_| set.pick().unwrap().id().0).collect();
        assert_eq!(order, vec![1, 2, 3, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_breaker_gating_skips_down_replica() {
        let breaker = Arc::new(StaticBreaker::with_down([NodeId::replica(1)]));
        let set = ready(3, Some(breaker)).await;

        for _ in 0..50 {
            assert_ne!(set.pick().unwrap().id(), NodeId::replica(1));
        }
        let skipped = set
            .stats()
            .into_iter()
            .find(|s| s.id == NodeId::replica(1))
            .unwrap();
        assert!(skipped.probe_misses > 0);
        // Skips are diagnostic only, never reported as failures
        assert_eq!(skipped.fails_count, 0);
    }

    #[tokio::test]
    async fn test_random_selection_respects_breaker() {
        let breaker = Arc::new(StaticBreaker::with_down([NodeId::replica(0)]));
        let set = NodeSet::new("master", replicas(2), Arc::new(MockConn::null()))
            .with_selection(Selection::Random)
            .with_max_barber_attempts(64)
            .with_breaker(Some(breaker));
        set.setup(&MockConnector::new()).await.unwrap();

        for _ in 0..50 {
            assert_eq!(set.pick().unwrap().id(), NodeId::replica(1));
        }
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_probed() {
        let breaker = Arc::new(StaticBreaker::with_down([
            NodeId::replica(0),
            NodeId::replica(1),
            NodeId::replica(2),
        ]));
        let set = ready(3, Some(breaker.clone())).await;

        // Probes replicas 1, 2, 3; the last one probed is handed out
        let node = set.pick().unwrap();
        assert_eq!(node.id(), NodeId::replica(2));
        assert_eq!(node.role(), Role::Replica);
        assert_eq!(breaker.probes(), 3);
    }

    #[tokio::test]
    async fn test_master_falls_back_when_down() {
        let breaker = Arc::new(StaticBreaker::with_down([NodeId::MASTER]));
        let set = ready(1, Some(breaker)).await;

        let node = set.master().unwrap();
        assert!(node.is_fallback());
        assert_eq!(node.conn().get().await, Err(crate::testing::MockError::Unavailable));
    }

    #[tokio::test]
    async fn test_no_replicas_reads_from_master() {
        let set = ready(0, None).await;
        assert_eq!(set.pick().unwrap().id(), NodeId::MASTER);
    }

    #[tokio::test]
    async fn test_not_ready_and_closed() {
        let set: NodeSet<MockConn> = NodeSet::new("master", replicas(1), Arc::new(MockConn::null()));
        assert!(matches!(set.pick(), Err(RouteError::NotReady)));

        set.setup(&MockConnector::new()).await.unwrap();
        assert!(set.is_ready());
        set.close().await.unwrap();

        assert!(matches!(set.master(), Err(RouteError::Closed)));
        assert!(matches!(
            set.setup(&MockConnector::new()).await,
            Err(RouteError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_setup_failure_rolls_back() {
        let connector = MockConnector::new().fail_ping("replica-2");
        let set: NodeSet<MockConn> = NodeSet::new("master", replicas(3), Arc::new(MockConn::null()));

        let err = set.setup(&connector).await.unwrap_err();
        match err {
            RouteError::Setup { address, .. } => assert_eq!(address, "replica-2"),
            other => panic!("expected setup error, got {other:?}"),
        }

        // master, replica-1 and the failing replica-2 were all closed; replica-3 never opened
        let opened = connector.opened();
        assert_eq!(opened.len(), 3);
        assert!(opened.iter().all(|c| c.closes() == 1));
        assert!(matches!(set.pick(), Err(RouteError::NotReady)));
    }

    #[tokio::test]
    async fn test_refused_master_aborts_setup() {
        let connector = MockConnector::new().refuse("master");
        let set: NodeSet<MockConn> = NodeSet::new("master", replicas(2), Arc::new(MockConn::null()));

        assert!(matches!(
            set.setup(&connector).await,
            Err(RouteError::Setup { .. })
        ));
        assert!(connector.opened().is_empty());
    }

    #[tokio::test]
    async fn test_record_error_skips_fallback() {
        let breaker = Arc::new(StaticBreaker::default());
        let set = ready(1, Some(breaker.clone())).await;

        set.record_error(&set.fallback);
        assert!(breaker.stats().hosts.is_empty());

        set.record_error(&set.master().unwrap());
        assert_eq!(breaker.stats().fails_for(NodeId::MASTER), 1);
        assert_eq!(set.stats()[0].fails_count, 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_under_concurrency() {
        let connector = MockConnector::new();
        let set = Arc::new(NodeSet::new("master", replicas(2), Arc::new(MockConn::null())));
        set.setup(&connector).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let set = set.clone();
                tokio::spawn(async move { set.close().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(connector.opened().iter().all(|c| c.closes() == 1));
    }
}
