/*!
 * Error types for Switchyard
 */

use std::fmt;
use std::io;

use switchyard_core_resilience::{DriverError, RouteError};

pub type Result<T> = std::result::Result<T, SwitchyardError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_DEGRADED: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug)]
pub enum SwitchyardError {
    /// I/O error
    Io(io::Error),

    /// Configuration error
    Config(String),

    /// A node could not be opened or pinged during setup
    Setup { address: String, message: String },

    /// No healthy node could serve the request
    Unavailable,

    /// Retryable failures persisted through every attempt
    RetriesExhausted { attempts: u32, message: String },

    /// Backend returned an error that was not retried
    Backend(String),

    /// Operation was cancelled
    Cancelled,

    /// Generic error with message
    Other(String),
}

impl SwitchyardError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            SwitchyardError::Config(_) | SwitchyardError::Setup { .. } => EXIT_FATAL,
            _ => EXIT_DEGRADED,
        }
    }

    /// Check if this error is fatal (should not retry)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SwitchyardError::Config(_)
                | SwitchyardError::Setup { .. }
                | SwitchyardError::RetriesExhausted { .. }
                | SwitchyardError::Cancelled
        )
    }

    /// Check if this error came from the fallback node
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SwitchyardError::Unavailable)
    }
}

impl fmt::Display for SwitchyardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchyardError::Io(err) => write!(f, "I/O error: {}", err),
            SwitchyardError::Config(msg) => write!(f, "Configuration error: {}", msg),
            SwitchyardError::Setup { address, message } => {
                write!(f, "Setup of {} failed: {}", address, message)
            }
            SwitchyardError::Unavailable => write!(f, "No available node"),
            SwitchyardError::RetriesExhausted { attempts, message } => {
                write!(f, "All {} attempts exhausted: {}", attempts, message)
            }
            SwitchyardError::Backend(msg) => write!(f, "Backend error: {}", msg),
            SwitchyardError::Cancelled => write!(f, "Operation cancelled"),
            SwitchyardError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for SwitchyardError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SwitchyardError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for SwitchyardError {
    fn from(err: io::Error) -> Self {
        SwitchyardError::Io(err)
    }
}

impl From<toml::de::Error> for SwitchyardError {
    fn from(err: toml::de::Error) -> Self {
        SwitchyardError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for SwitchyardError {
    fn from(err: toml::ser::Error) -> Self {
        SwitchyardError::Config(format!("TOML write error: {}", err))
    }
}

impl<E: DriverError> From<RouteError<E>> for SwitchyardError {
    fn from(err: RouteError<E>) -> Self {
        match err {
            RouteError::Unavailable => SwitchyardError::Unavailable,
            RouteError::Cancelled => SwitchyardError::Cancelled,
            RouteError::Setup { address, source } => SwitchyardError::Setup {
                address,
                message: source.to_string(),
            },
            RouteError::Exhausted { attempts, source } => SwitchyardError::RetriesExhausted {
                attempts,
                message: source.to_string(),
            },
            RouteError::Driver(source) => SwitchyardError::Backend(source.to_string()),
            other @ (RouteError::NotReady | RouteError::Closed | RouteError::InvalidShard(_)) => {
                SwitchyardError::Other(other.to_string())
            }
        }
    }
}
