/*!
 * Configuration types for Switchyard
 */

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use switchyard_core_resilience::{BarberConfig, ClusterConfig, ShardConfig};

use crate::error::{Result, SwitchyardError};

/// Main configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Diagnostic output
    #[serde(default)]
    pub log: LogConfig,

    /// Circuit breaker settings, one breaker per shard.
    /// Omit to route without a breaker (plain round robin).
    #[serde(default)]
    pub barber: Option<BarberConfig>,

    /// Shards in routing order. Reordering reassigns CRC32-routed keys.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// TCP probe settings used by `switchyard probe`
    #[serde(default)]
    pub probe: ProbeConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub level: LogLevel,

    /// Write JSON logs to this file instead of stdout
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Force debug output
    #[serde(default)]
    pub verbose: bool,
}

/// TCP probe configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    1_000
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Log level for diagnostic output
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject configurations that cannot be routed
    pub fn validate(&self) -> Result<()> {
        if self.cluster.shards.is_empty() {
            return Err(SwitchyardError::Config(
                "cluster must contain at least one shard".to_string(),
            ));
        }

        for (index, shard) in self.cluster.shards.iter().enumerate() {
            validate_shard(index, shard)?;
        }

        if let Some(barber) = &self.barber {
            if barber.threshold == 0 {
                return Err(SwitchyardError::Config(
                    "barber.threshold must be at least 1".to_string(),
                ));
            }
            if barber.window_ms == 0 {
                return Err(SwitchyardError::Config(
                    "barber.window_ms must be positive".to_string(),
                ));
            }
        }

        if self.probe.connect_timeout_ms == 0 {
            return Err(SwitchyardError::Config(
                "probe.connect_timeout_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// A single-shard configuration with a breaker, suitable as a starting point
    pub fn example() -> Self {
        Self {
            barber: Some(BarberConfig::default()),
            cluster: ClusterConfig {
                shards: vec![ShardConfig::new("127.0.0.1:3306")
                    .with_replicas(["127.0.0.1:3307", "127.0.0.1:3308"])],
            },
            ..Default::default()
        }
    }
}

fn validate_shard(index: usize, shard: &ShardConfig) -> Result<()> {
    if shard.master.trim().is_empty() {
        return Err(SwitchyardError::Config(format!(
            "shard {} has an empty master address",
            index
        )));
    }

    let mut seen = HashSet::new();
    seen.insert(shard.master.as_str());
    for replica in &shard.replicas {
        if replica.trim().is_empty() {
            return Err(SwitchyardError::Config(format!(
                "shard {} has an empty replica address",
                index
            )));
        }
        if !seen.insert(replica.as_str()) {
            return Err(SwitchyardError::Config(format!(
                "shard {} lists {} more than once",
                index, replica
            )));
        }
    }
    Ok(())
}
