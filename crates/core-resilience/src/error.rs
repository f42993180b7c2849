//! Error types for routing operations

use thiserror::Error;

use crate::retry::RetryError;

/// Behaviour every backend driver error provides to the router.
///
/// The router never inspects driver errors beyond this: it needs to build the
/// error a null connection hands out, and to recognise that error again so it
/// can be surfaced as [`RouteError::Unavailable`] instead of a backend failure.
pub trait DriverError: std::error::Error + Send + Sync + 'static {
    /// The error returned by every operation of a null connection
    fn unavailable() -> Self;

    /// Whether this error was produced by a null connection
    fn is_unavailable(&self) -> bool;
}

/// Shard index rejected by a [`Choose`](crate::cluster::Choose) strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("shard index {index} out of range for {len} shards")]
pub struct InvalidShard {
    /// Requested index
    pub index: usize,
    /// Number of shards in the cluster
    pub len: usize,
}

/// Errors returned by shard and cluster operations
#[derive(Debug, Error)]
pub enum RouteError<E> {
    /// No healthy node could serve the request; a null connection answered
    #[error("no available node to serve the request")]
    Unavailable,

    /// The caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// Routing was attempted before `setup()` completed
    #[error("shard is not set up")]
    NotReady,

    /// Routing was attempted after `close()`
    #[error("shard is closed")]
    Closed,

    /// A cluster lookup resolved to a shard that does not exist
    #[error(transparent)]
    InvalidShard(#[from] InvalidShard),

    /// Opening or pinging a node failed during setup
    #[error("setup of node {address} failed: {source}")]
    Setup {
        address: String,
        #[source]
        source: E,
    },

    /// A retryable failure persisted through every allowed attempt
    #[error("gave up after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },

    /// Backend failure that was not retried
    #[error(transparent)]
    Driver(E),
}

impl<E: DriverError> RouteError<E> {
    /// Lift a driver error, recognising the null-connection sentinel
    pub fn from_driver(err: E) -> Self {
        if err.is_unavailable() {
            RouteError::Unavailable
        } else {
            RouteError::Driver(err)
        }
    }

    /// True when the failure came from the fallback node
    pub fn is_unavailable(&self) -> bool {
        matches!(self, RouteError::Unavailable)
    }

    /// True when the failure was returned without exhausting retries
    pub fn is_terminal(&self) -> bool {
        matches!(self, RouteError::Driver(_) | RouteError::Cancelled)
    }

    /// True when a retryable failure outlived the retry budget
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RouteError::Exhausted { .. })
    }

    /// The underlying backend error, if any
    pub fn driver_error(&self) -> Option<&E> {
        match self {
            RouteError::Setup { source, .. } | RouteError::Exhausted { source, .. } => Some(source),
            RouteError::Driver(err) => Some(err),
            _ => None,
        }
    }
}

impl<E: DriverError> From<RetryError<E>> for RouteError<E> {
    fn from(err: RetryError<E>) -> Self {
        match err {
            RetryError::Exhausted { attempts, source } => RouteError::Exhausted { attempts, source },
            RetryError::Terminal(source) => RouteError::from_driver(source),
            RetryError::Cancelled { .. } => RouteError::Cancelled,
        }
    }
}
