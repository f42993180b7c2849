/*!
 * Switchyard - master/replica routing with retries and circuit breaking
 *
 * Backend bindings and tooling around `switchyard-core-resilience`:
 * - MySQL, Redis and Tarantool shards with per-backend error classification
 * - A tolerant HTTP client that retries timeouts
 * - A TCP probe used to health-check configured clusters
 * - TOML configuration and tracing-based logging
 * - Subcommands behind the `switchyard` binary
 */

pub mod backend;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use config::{Config, LogConfig, LogLevel, ProbeConfig};
pub use error::{Result, SwitchyardError};
pub use switchyard_core_resilience as resilience;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
