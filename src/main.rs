/*!
 * Switchyard CLI - inspect, route against, and probe shard configurations
 */

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use switchyard::{
    commands::{
        check,
        probe::{self, ShardProbe},
        route::{self, ShardSource},
    },
    config::{LogConfig, LogLevel},
    error::{SwitchyardError, EXIT_DEGRADED, EXIT_FATAL, EXIT_SUCCESS},
    logging,
};

#[derive(Parser)]
#[command(name = "switchyard")]
#[command(version, about = "Master/replica routing with retries and circuit breaking", long_about = None)]
struct Cli {
    /// Log level
    #[arg(long, value_enum, default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Write JSON logs to this file instead of stdout
    #[arg(long, value_name = "PATH", global = true)]
    log_file: Option<PathBuf>,

    /// Verbose output (forces debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the shard a key is routed to (CRC32 of the key)
    Route {
        /// Configuration file providing the shard list
        #[arg(short, long, value_name = "FILE", conflicts_with = "shards")]
        config: Option<PathBuf>,

        /// Number of shards, when no configuration file is given
        #[arg(short, long, required_unless_present = "config")]
        shards: Option<usize>,

        /// Routing key
        key: String,
    },

    /// Validate a configuration file and print its shards
    Check {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },

    /// Connect to every configured node and report its health
    Probe {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,

        /// Print the reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print an example configuration
    Example,
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<SwitchyardError>()
                .map_or(EXIT_FATAL, SwitchyardError::exit_code)
        }
    };
    std::process::exit(code);
}

fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();

    let log_config = LogConfig {
        level: cli.log_level,
        file: cli.log_file,
        verbose: cli.verbose,
    };
    if let Err(e) = logging::init_logging(&log_config) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    match cli.command {
        Commands::Route {
            config,
            shards,
            key,
        } => {
            let source = match (&config, shards) {
                (Some(path), _) => ShardSource::Config(path),
                (None, Some(count)) => ShardSource::Count(count),
                (None, None) => {
                    return Err(SwitchyardError::Config(
                        "either --config or --shards is required".to_string(),
                    )
                    .into())
                }
            };
            let resolved = route::resolve(source, &key)?;
            match resolved.master {
                Some(master) => println!("{} -> shard {} ({})", key, resolved.index, master),
                None => println!("{} -> shard {}", key, resolved.index),
            }
            Ok(EXIT_SUCCESS)
        }

        Commands::Check { config } => {
            let loaded = check::load(&config)?;
            println!("{}", check::summary_table(&loaded));
            println!("{}", check::breaker_summary(&loaded));
            Ok(EXIT_SUCCESS)
        }

        Commands::Probe { config, json } => {
            let loaded = check::load(&config)?;
            let runtime = tokio::runtime::Runtime::new().map_err(|e| {
                SwitchyardError::Other(format!("Failed to start async runtime: {}", e))
            })?;
            let probes = runtime.block_on(probe::probe_cluster(&loaded))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&probes)?);
            } else {
                println!("{}", probe::report_table(&probes));
            }

            Ok(if probes.iter().any(ShardProbe::is_degraded) {
                EXIT_DEGRADED
            } else {
                EXIT_SUCCESS
            })
        }

        Commands::Example => {
            let example = switchyard::Config::example();
            print!("{}", toml::to_string_pretty(&example)?);
            Ok(EXIT_SUCCESS)
        }
    }
}
