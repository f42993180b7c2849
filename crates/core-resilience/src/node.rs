//! Nodes and the connection capability they wrap
//!
//! A [`Node`] pairs one backend [`Connection`] with a stable [`NodeId`] and a
//! [`Role`]. Connections are opened by a [`Connector`] during shard setup and
//! shared by reference afterwards; the node set owns them until close.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DriverError;

/// Identifier of a node, stable for the lifetime of one node set
///
/// The master is `0`, replicas are `1..=N` in configuration order and the
/// fallback is `-1`. The fallback id is never reported to a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub i32);

impl NodeId {
    pub const MASTER: NodeId = NodeId(0);
    pub const FALLBACK: NodeId = NodeId(-1);

    /// Id of the replica at `index` in configuration order
    pub fn replica(index: usize) -> NodeId {
        NodeId(i32::try_from(index).map_or(i32::MAX, |i| i.saturating_add(1)))
    }

    pub fn is_fallback(self) -> bool {
        self == NodeId::FALLBACK
    }

    pub fn is_master(self) -> bool {
        self == NodeId::MASTER
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a node is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Master,
    Replica,
    Fallback,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Master => "master",
            Role::Replica => "replica",
            Role::Fallback => "fallback",
        };
        f.write_str(s)
    }
}

/// Capability every backend connection exposes to the router
///
/// Backends extend this with their own operation traits, e.g.
/// `trait SqlConnection: Connection<Error = SqlError>`.
#[async_trait]
pub trait Connection: Send + Sync {
    type Error: DriverError;

    /// Round-trip to the backend
    async fn ping(&self) -> Result<(), Self::Error>;

    /// Release the connection; called once per connection by the node set
    async fn close(&self) -> Result<(), Self::Error>;
}

/// Opens connections for a node set during setup
#[async_trait]
pub trait Connector<C: ?Sized + Connection>: Send + Sync {
    /// Open a connection to `address`
    async fn connect(&self, address: &str) -> Result<Arc<C>, C::Error>;
}

/// One addressable backend endpoint
pub struct Node<C: ?Sized> {
    conn: Arc<C>,
    id: NodeId,
    role: Role,
    address: Arc<str>,
}

impl<C: ?Sized> Node<C> {
    pub fn new(conn: Arc<C>, id: NodeId, role: Role, address: impl Into<Arc<str>>) -> Self {
        Self {
            conn,
            id,
            role,
            address: address.into(),
        }
    }

    /// Node wrapping a null connection
    pub fn fallback(conn: Arc<C>) -> Self {
        Self::new(conn, NodeId::FALLBACK, Role::Fallback, "fallback")
    }

    pub fn conn(&self) -> &Arc<C> {
        &self.conn
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_fallback(&self) -> bool {
        self.id.is_fallback()
    }
}

impl<C: ?Sized> Clone for Node<C> {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            id: self.id,
            role: self.role,
            address: Arc::clone(&self.address),
        }
    }
}

impl<C: ?Sized> fmt::Debug for Node<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("address", &self.address)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_ids() {
        assert_eq!(NodeId::replica(0), NodeId(1));
        assert_eq!(NodeId::replica(4), NodeId(5));
        assert!(NodeId::MASTER.is_master());
        assert!(NodeId::FALLBACK.is_fallback());
        assert!(!NodeId::replica(0).is_fallback());
        assert_eq!(NodeId::FALLBACK.to_string(), "-1");
    }

    #[test]
    fn test_node_clone_shares_connection() {
        let node = Node::new(Arc::new(7u8), NodeId::replica(2), Role::Replica, "db-3:3306");
        let copy = node.clone();

        assert!(Arc::ptr_eq(node.conn(), copy.conn()));
        assert_eq!(copy.address(), "db-3:3306");
        assert_eq!(copy.role().to_string(), "replica");

        let fallback = Node::fallback(Arc::new(0u8));
        assert!(fallback.is_fallback());
        assert_eq!(fallback.role(), Role::Fallback);
    }
}
