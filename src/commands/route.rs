/*!
 * `switchyard route`: resolve the shard a key is routed to
 */

use std::path::Path;

use anyhow::{bail, Context, Result};
use switchyard_core_resilience::shard_for_key;

use crate::config::Config;

/// Where the shard count comes from
#[derive(Debug, Clone, Copy)]
pub enum ShardSource<'a> {
    Config(&'a Path),
    Count(usize),
}

/// Resolved route for one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub index: usize,
    pub shards: usize,
    /// Master address, known only when routing against a config file
    pub master: Option<String>,
}

pub fn resolve(source: ShardSource<'_>, key: &str) -> Result<Route> {
    let (shards, masters) = match source {
        ShardSource::Config(path) => {
            let config = Config::from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            config.validate()?;
            let masters: Vec<String> = config
                .cluster
                .shards
                .into_iter()
                .map(|shard| shard.master)
                .collect();
            (masters.len(), masters)
        }
        ShardSource::Count(count) => (count, Vec::new()),
    };

    let Some(index) = shard_for_key(key.as_bytes(), shards) else {
        bail!("cannot route over zero shards");
    };

    Ok(Route {
        index,
        shards,
        master: masters.get(index).cloned(),
    })
}
