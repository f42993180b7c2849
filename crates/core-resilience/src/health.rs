//! Health-check callbacks for nodes
//!
//! A check pings one node and grades the outcome:
//! - `Pass` when the ping succeeds within [`CRITICAL_LATENCY`]
//! - `Warn` when it is slow, or when a replica fails
//! - `Fail` when the master fails
//!
//! Checks are plain boxed closures so an external health subsystem can hold
//! and invoke them without knowing the backend type.

use std::fmt;
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::node::{Connection, Node, NodeId, Role};

/// Ping latency at or above which a healthy node is reported as `Warn`
pub const CRITICAL_LATENCY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Pass,
    Warn,
    Fail,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Pass => "pass",
            HealthStatus::Warn => "warn",
            HealthStatus::Fail => "fail",
        };
        f.write_str(s)
    }
}

/// Outcome of one health check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub node: NodeId,
    pub address: String,
    pub role: Role,
    pub status: HealthStatus,
    pub latency: Duration,
    pub error: Option<String>,
}

/// A reusable health-check callback
pub type HealthCheck = Box<dyn Fn() -> BoxFuture<'static, HealthReport> + Send + Sync>;

/// Grade a ping outcome
pub fn evaluate(role: Role, latency: Duration, ok: bool) -> HealthStatus {
    match (ok, role) {
        (false, Role::Master) => HealthStatus::Fail,
        (false, _) => HealthStatus::Warn,
        (true, _) if latency >= CRITICAL_LATENCY => HealthStatus::Warn,
        (true, _) => HealthStatus::Pass,
    }
}

/// Build a health check that pings `node` each time it is invoked
pub fn node_check<C>(node: Node<C>) -> HealthCheck
where
    C: ?Sized + Connection + 'static,
{
    Box::new(move || {
        let node = node.clone();
        Box::pin(async move {
            let started = Instant::now();
            let result = node.conn().ping().await;
            let latency = started.elapsed();

            let status = evaluate(node.role(), latency, result.is_ok());
            debug!(
                node = %node.id(),
                address = node.address(),
                %status,
                latency_ms = latency.as_millis() as u64,
                "health check"
            );

            HealthReport {
                node: node.id(),
                address: node.address().to_string(),
                role: node.role(),
                status,
                latency,
                error: result.err().map(|e| e.to_string()),
            }
        })
    })
}

/// Run checks concurrently, returning reports in input order
pub async fn run_checks(checks: &[HealthCheck]) -> Vec<HealthReport> {
    join_all(checks.iter().map(|check| check())).await
}
