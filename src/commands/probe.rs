/*!
 * `switchyard probe`: set up every configured shard over TCP and health-check its nodes
 */

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use comfy_table::{Cell, Color, Table};
use serde::Serialize;
use switchyard_core_resilience::{
    run_checks, Barber, CircuitBreaker, HealthReport, HealthStatus, Role, Shard,
};
use tracing::{info, warn};

use super::create_table;
use crate::backend::tcp::{probe_shard, TcpConnection, TcpConnector};
use crate::config::Config;
use crate::error::SwitchyardError;

/// Probe outcome for one shard
#[derive(Debug, Clone, Serialize)]
pub struct ShardProbe {
    pub shard: usize,
    pub master: String,
    /// Set when setup failed; no node was health-checked
    pub setup_error: Option<String>,
    pub reports: Vec<HealthReport>,
}

impl ShardProbe {
    /// A shard is degraded when it could not be set up or its master fails
    pub fn is_degraded(&self) -> bool {
        self.setup_error.is_some()
            || self
                .reports
                .iter()
                .any(|r| r.role == Role::Master && r.status == HealthStatus::Fail)
    }
}

/// Probe every shard in `config`, in order
pub async fn probe_cluster(config: &Config) -> Result<Vec<ShardProbe>> {
    let connector = TcpConnector::new(Duration::from_millis(config.probe.connect_timeout_ms));
    let mut results = Vec::with_capacity(config.cluster.shards.len());

    for (index, shard_config) in config.cluster.shards.iter().enumerate() {
        let breaker = config
            .barber
            .clone()
            .map(|barber| Arc::new(Barber::new(barber)) as Arc<dyn CircuitBreaker>);
        let shard = probe_shard(shard_config, breaker);

        let mut probe = ShardProbe {
            shard: index,
            master: shard_config.master.clone(),
            setup_error: None,
            reports: Vec::new(),
        };

        match shard.setup(&connector).await {
            Ok(()) => {
                probe.reports = check_and_close(&shard).await?;
                info!(shard = index, nodes = probe.reports.len(), "shard probed");
            }
            Err(err) => {
                warn!(shard = index, error = %err, "shard setup failed");
                probe.setup_error = Some(err.to_string());
            }
        }

        results.push(probe);
    }

    Ok(results)
}

/// Health-check every node, then close the shard whether or not the checks ran
async fn check_and_close(shard: &Shard<TcpConnection>) -> Result<Vec<HealthReport>> {
    let reports = match shard.health_checks() {
        Ok(checks) => Ok(run_checks(&checks).await),
        Err(err) => Err(SwitchyardError::from(err)),
    };
    let closed = shard.close().await.map_err(SwitchyardError::from);
    let reports = reports?;
    closed?;
    Ok(reports)
}

/// One row per node, or one row per shard that failed setup
pub fn report_table(probes: &[ShardProbe]) -> Table {
    let mut table = create_table();
    table.set_header(vec!["Shard", "Node", "Address", "Role", "Status", "Latency", "Error"]);

    for probe in probes {
        if let Some(error) = &probe.setup_error {
            table.add_row(vec![
                Cell::new(probe.shard),
                Cell::new("-"),
                Cell::new(&probe.master),
                Cell::new("-"),
                Cell::new("setup failed").fg(Color::Red),
                Cell::new("-"),
                Cell::new(error),
            ]);
            continue;
        }

        for report in &probe.reports {
            table.add_row(vec![
                Cell::new(probe.shard),
                Cell::new(report.node),
                Cell::new(&report.address),
                Cell::new(report.role),
                status_cell(report.status),
                Cell::new(format!("{:.1} ms", report.latency.as_secs_f64() * 1_000.0)),
                Cell::new(report.error.as_deref().unwrap_or("")),
            ]);
        }
    }

    table
}

fn status_cell(status: HealthStatus) -> Cell {
    let color = match status {
        HealthStatus::Pass => Color::Green,
        HealthStatus::Warn => Color::Yellow,
        HealthStatus::Fail => Color::Red,
    };
    Cell::new(status).fg(color)
}
