/*!
 * `switchyard check`: validate a configuration file and summarise it
 */

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, Table};
use switchyard_core_resilience::Selection;

use super::create_table;
use crate::config::Config;

/// Load and validate the configuration at `path`
pub fn load(path: &Path) -> Result<Config> {
    let config =
        Config::from_file(path).with_context(|| format!("failed to load {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("{} is not a valid configuration", path.display()))?;
    Ok(config)
}

/// One row per shard
pub fn summary_table(config: &Config) -> Table {
    let mut table = create_table();
    table.set_header(vec![
        "Shard",
        "Master",
        "Replicas",
        "Selection",
        "Retries",
        "Wait (ms)",
    ]);

    for (index, shard) in config.cluster.shards.iter().enumerate() {
        let replicas = if shard.replicas.is_empty() {
            Cell::new("(master serves reads)").fg(Color::DarkGrey)
        } else {
            Cell::new(shard.replicas.join("\n"))
        };
        let selection = match shard.selection {
            Selection::RoundRobin => "round robin",
            Selection::Random => "random",
        };
        table.add_row(vec![
            Cell::new(index),
            Cell::new(&shard.master),
            replicas,
            Cell::new(selection),
            Cell::new(shard.retry.max_attempts),
            Cell::new(shard.retry.per_attempt_wait_ms),
        ]);
    }

    table
}

/// Human-readable breaker line
pub fn breaker_summary(config: &Config) -> String {
    match &config.barber {
        Some(barber) => format!(
            "circuit breaker: {} failures in {} ms opens a node for {} ms",
            barber.threshold, barber.window_ms, barber.cooldown_ms
        ),
        None => "circuit breaker: disabled".to_string(),
    }
}
