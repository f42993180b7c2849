/*!
 * Logging and tracing initialization
 */

use std::fs::File;
use std::path::Path;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LogConfig;
use crate::error::{Result, SwitchyardError};

/// Initialize structured logging based on configuration.
///
/// Output goes to stdout in compact form, or to `config.file` as JSON lines
/// when a file is set. `RUST_LOG` overrides the configured level.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let env_filter = build_filter(config)?;

    let file = config.file.as_deref().map(open_log_file).transpose()?;

    let (stdout_layer, file_layer) = match file {
        Some(file) => (
            None,
            Some(
                fmt::layer()
                    .with_writer(file)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_ansi(false)
                    .json(),
            ),
        ),
        None => (Some(fmt::layer().with_target(true).compact()), None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| SwitchyardError::Config(format!("Logging already initialized: {}", e)))
}

/// Effective level: `verbose` forces debug
pub fn effective_level(config: &LogConfig) -> Level {
    if config.verbose {
        Level::DEBUG
    } else {
        config.level.to_tracing_level()
    }
}

fn build_filter(config: &LogConfig) -> Result<EnvFilter> {
    let log_level = effective_level(config);
    EnvFilter::try_from_default_env()
        .or_else(|_| {
            EnvFilter::try_new(format!(
                "switchyard={level},switchyard_core_resilience={level}",
                level = log_level
            ))
        })
        .map_err(|e| SwitchyardError::Config(format!("Failed to create log filter: {}", e)))
}

fn open_log_file(path: &Path) -> Result<File> {
    File::create(path).map_err(|e| {
        SwitchyardError::Config(format!(
            "Failed to create log file {}: {}",
            path.display(),
            e
        ))
    })
}

/// Initialize logging with custom format for testing
#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("switchyard=debug,switchyard_core_resilience=debug"));

        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_test_writer().compact())
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_verbose_overrides_log_level() {
        let config = LogConfig {
            level: LogLevel::Error,
            file: None,
            verbose: true,
        };
        assert_eq!(effective_level(&config), Level::DEBUG);
    }

    #[test]
    fn test_level_from_config() {
        let config = LogConfig {
            level: LogLevel::Warn,
            ..Default::default()
        };
        assert_eq!(effective_level(&config), Level::WARN);
    }

    #[test]
    fn test_unwritable_log_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_log_file(&dir.path().join("missing").join("switchyard.log")).unwrap_err();
        assert!(matches!(err, SwitchyardError::Config(_)));
    }

    #[test]
    fn test_filter_builds() {
        let config = LogConfig::default();
        assert!(build_filter(&config).is_ok());
    }
}
