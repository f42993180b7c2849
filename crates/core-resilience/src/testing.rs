//! In-memory connections and breakers for unit tests

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;

use crate::circuit_breaker::{BreakerStats, CircuitBreaker, HostStats};
use crate::error::DriverError;
use crate::node::{Connection, Connector, NodeId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MockError {
    #[error("node unavailable")]
    Unavailable,
    #[error("transient failure")]
    Transient,
    #[error("fatal failure")]
    Fatal,
    #[error("connection refused: {0}")]
    Refused(String),
}

impl DriverError for MockError {
    fn unavailable() -> Self {
        MockError::Unavailable
    }

    fn is_unavailable(&self) -> bool {
        matches!(self, MockError::Unavailable)
    }
}

pub fn classify(err: &MockError) -> bool {
    matches!(err, MockError::Transient)
}

#[derive(Debug, Default)]
pub struct MockConn {
    address: String,
    null: bool,
    ping_error: Option<MockError>,
    ping_delay: Option<Duration>,
    script: Mutex<VecDeque<MockError>>,
    calls: AtomicU32,
    closes: AtomicU32,
}

impl MockConn {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            ..Default::default()
        }
    }

    pub fn null() -> Self {
        Self {
            address: "null".to_string(),
            null: true,
            ..Default::default()
        }
    }

    pub fn with_ping_error(mut self, err: MockError) -> Self {
        self.ping_error = Some(err);
        self
    }

    pub fn with_ping_delay(mut self, delay: Duration) -> Self {
        self.ping_delay = Some(delay);
        self
    }

    /// Queue errors returned by the next calls to `get`
    pub fn fail_with(&self, errors: impl IntoIterator<Item = MockError>) {
        self.script.lock().unwrap().extend(errors);
    }

    pub async fn get(&self) -> Result<String, MockError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.null {
            return Err(MockError::Unavailable);
        }
        match self.script.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(self.address.clone()),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for MockConn {
    type Error = MockError;

    async fn ping(&self) -> Result<(), MockError> {
        if self.null {
            return Err(MockError::Unavailable);
        }
        if let Some(delay) = self.ping_delay {
            tokio::time::sleep(delay).await;
        }
        match &self.ping_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn close(&self) -> Result<(), MockError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector that records every connection it opens
#[derive(Debug, Default)]
pub struct MockConnector {
    refused: HashSet<String>,
    failing_ping: HashSet<String>,
    opened: Mutex<HashMap<String, Arc<MockConn>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse(mut self, address: &str) -> Self {
        self.refused.insert(address.to_string());
        self
    }

    pub fn fail_ping(mut self, address: &str) -> Self {
        self.failing_ping.insert(address.to_string());
        self
    }

    pub fn conn(&self, address: &str) -> Arc<MockConn> {
        self.opened.lock().unwrap()[address].clone()
    }

    pub fn opened(&self) -> Vec<Arc<MockConn>> {
        self.opened.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl Connector<MockConn> for MockConnector {
    async fn connect(&self, address: &str) -> Result<Arc<MockConn>, MockError> {
        if self.refused.contains(address) {
            return Err(MockError::Refused(address.to_string()));
        }
        let mut conn = MockConn::new(address);
        if self.failing_ping.contains(address) {
            conn = conn.with_ping_error(MockError::Transient);
        }
        let conn = Arc::new(conn);
        self.opened
            .lock()
            .unwrap()
            .insert(address.to_string(), conn.clone());
        Ok(conn)
    }
}

/// Breaker with a fixed set of unavailable nodes that counts reported errors
#[derive(Debug, Default)]
pub struct StaticBreaker {
    down: Mutex<HashSet<NodeId>>,
    errors: Mutex<BTreeMap<NodeId, u64>>,
    probes: AtomicU32,
}

impl StaticBreaker {
    pub fn with_down(ids: impl IntoIterator<Item = NodeId>) -> Self {
        let breaker = Self::default();
        breaker.down.lock().unwrap().extend(ids);
        breaker
    }

    pub fn probes(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }
}

impl CircuitBreaker for StaticBreaker {
    fn is_available(&self, node: NodeId, _now: Instant) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        !self.down.lock().unwrap().contains(&node)
    }

    fn add_error(&self, node: NodeId, _now: Instant) {
        *self.errors.lock().unwrap().entry(node).or_default() += 1;
    }

    fn stats(&self) -> BreakerStats {
        BreakerStats {
            hosts: self
                .errors
                .lock()
                .unwrap()
                .iter()
                .map(|(id, fails)| HostStats {
                    server_id: *id,
                    fails_count: *fails,
                })
                .collect(),
        }
    }
}
