//! Per-node circuit breaking
//!
//! The router consumes breakers only through the [`CircuitBreaker`] trait:
//! ask whether a node is available, report an error against a node, and read
//! failure counters for observability. [`Barber`] is the in-memory
//! implementation shipped with the crate:
//! - Closed: fewer than `threshold` failures inside the sliding `window`
//! - Open: `threshold` reached; the node is skipped until `cooldown` has
//!   passed since its most recent failure
//! - Half-open: after the cooldown the node is offered again; the next
//!   failure re-opens it immediately because the window is still full

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Debug;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::node::NodeId;

/// Availability oracle consulted before a node is chosen.
///
/// Implementations must be safe to call concurrently from many tasks and must
/// not fail: a breaker that cannot decide should report the node available.
pub trait CircuitBreaker: Send + Sync + Debug {
    /// Whether `node` should receive traffic at `now`
    fn is_available(&self, node: NodeId, now: Instant) -> bool;

    /// Record a failed call against `node` at `now`
    fn add_error(&self, node: NodeId, now: Instant);

    /// Current failure counters
    fn stats(&self) -> BreakerStats;
}

/// Failure counters for one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HostStats {
    pub server_id: NodeId,
    pub fails_count: u64,
}

/// Failure counters for every node a breaker has seen
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BreakerStats {
    pub hosts: Vec<HostStats>,
}

impl BreakerStats {
    /// Failures recorded against `node`, zero if never seen
    pub fn fails_for(&self, node: NodeId) -> u64 {
        self.hosts
            .iter()
            .find(|h| h.server_id == node)
            .map(|h| h.fails_count)
            .unwrap_or(0)
    }
}

/// Configuration for [`Barber`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarberConfig {
    /// Failures inside the window that open the breaker for a node
    #[serde(default = "default_threshold")]
    pub threshold: u32,

    /// Sliding window for counting failures, in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Time after the last failure before an open node is offered again
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

fn default_threshold() -> u32 {
    5
}

fn default_window_ms() -> u64 {
    10_000
}

fn default_cooldown_ms() -> u64 {
    1_000
}

impl Default for BarberConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            window_ms: default_window_ms(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

impl BarberConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Failure history of a single node
#[derive(Debug, Default)]
struct NodeHistory {
    /// Failure timestamps inside the window, oldest first
    failures: VecDeque<Instant>,
}

impl NodeHistory {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.failures.front() {
            if now.saturating_duration_since(oldest) > window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn last_failure(&self) -> Option<Instant> {
        self.failures.back().copied()
    }
}

/// Sliding-window circuit breaker keyed by node id
///
/// # Example
/// ```
/// use std::time::Instant;
/// use switchyard_core_resilience::{Barber, BarberConfig, CircuitBreaker, NodeId};
///
/// let barber = Barber::new(BarberConfig { threshold: 2, ..Default::default() });
/// let now = Instant::now();
/// let node = NodeId::replica(0);
///
/// barber.add_error(node, now);
/// assert!(barber.is_available(node, now));
/// barber.add_error(node, now);
/// assert!(!barber.is_available(node, now));
/// ```
#[derive(Debug)]
pub struct Barber {
    config: BarberConfig,
    nodes: Mutex<BTreeMap<NodeId, NodeHistory>>,
}

impl Barber {
    /// Create a breaker with the given configuration
    pub fn new(config: BarberConfig) -> Self {
        Self {
            config,
            nodes: Mutex::new(BTreeMap::new()),
        }
    }

    /// Create a breaker with default configuration
    pub fn new_default() -> Self {
        Self::new(BarberConfig::default())
    }

    /// Forget every recorded failure
    pub fn reset(&self) {
        if let Ok(mut nodes) = self.nodes.lock() {
            nodes.clear();
        }
    }

    pub fn config(&self) -> &BarberConfig {
        &self.config
    }
}

impl CircuitBreaker for Barber {
    fn is_available(&self, node: NodeId, now: Instant) -> bool {
        let Ok(mut nodes) = self.nodes.lock() else {
            return true;
        };
        let Some(history) = nodes.get_mut(&node) else {
            return true;
        };

        history.prune(now, self.config.window());
        if (history.failures.len() as u64) < u64::from(self.config.threshold) {
            return true;
        }

        match history.last_failure() {
            Some(last) => now.saturating_duration_since(last) >= self.config.cooldown(),
            None => true,
        }
    }

    fn add_error(&self, node: NodeId, now: Instant) {
        if node.is_fallback() {
            return;
        }
        let Ok(mut nodes) = self.nodes.lock() else {
            return;
        };

        let history = nodes.entry(node).or_default();
        history.prune(now, self.config.window());
        history.failures.push_back(now);

        if history.failures.len() as u64 == u64::from(self.config.threshold) {
            warn!(node = %node, threshold = self.config.threshold, "circuit opened for node");
        }
    }

    fn stats(&self) -> BreakerStats {
        let Ok(nodes) = self.nodes.lock() else {
            return BreakerStats::default();
        };
        BreakerStats {
            hosts: nodes
                .iter()
                .map(|(id, history)| HostStats {
                    server_id: *id,
                    fails_count: history.failures.len() as u64,
                })
                .collect(),
        }
    }
}
