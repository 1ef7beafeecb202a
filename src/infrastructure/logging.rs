//! Logging system configuration and initialization
//!
//! Console and daily-rotated file output driven by [`LoggingConfig`], with
//! an optional JSON file format for log shippers. Dependency noise (sqlx,
//! reqwest, hyper) is filtered down unless the configured level asks for
//! trace, and `RUST_LOG` overrides everything when set.

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::info;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    layer::SubscriberExt,
    util::SubscriberInitExt,
    fmt,
    EnvFilter,
    Registry,
};

use crate::infrastructure::config::ConfigManager;

// Re-export LoggingConfig from config module
pub use crate::infrastructure::config::LoggingConfig;

// Global guard keeps the non-blocking file writer alive for the process
// lifetime; dropping it would silently stop file logging.
static LOG_GUARDS: Lazy<Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>>> =
    Lazy::new(|| Mutex::new(Vec::new()));

/// Log directory under the platform data dir, with a local fallback when
/// the platform dir cannot be resolved.
pub fn get_log_directory() -> PathBuf {
    ConfigManager::get_app_data_dir()
        .map(|dir| dir.join("logs"))
        .unwrap_or_else(|_| PathBuf::from("logs"))
}

/// Initialize the logging system with default configuration
pub fn init_logging() -> Result<()> {
    init_logging_with_config(&LoggingConfig::default())
}

/// Initialize logging with custom configuration.
///
/// `RUST_LOG` takes precedence over the configured level and filters:
///
/// ```bash
/// # Show all SQL queries even on info level
/// RUST_LOG="info,sqlx::query=debug" catalog-mirror products
/// ```
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut filter = EnvFilter::new(&config.level);

        if !config.level.to_lowercase().contains("trace") {
            filter = filter
                // SQLx query logs (prepared statements) - only show on TRACE
                .add_directive("sqlx::query=warn".parse().unwrap())
                .add_directive("sqlx::sqlite=warn".parse().unwrap())
                // HTTP client detailed logs - only show on TRACE
                .add_directive("hyper=warn".parse().unwrap())
                .add_directive("h2=warn".parse().unwrap())
                // Keep our application logs at the requested level
                .add_directive(format!("catalog_mirror={}", config.level).parse().unwrap());

            for (module, level) in &config.module_filters {
                if let Ok(directive) = format!("{module}={level}").parse() {
                    filter = filter.add_directive(directive);
                }
            }
        }

        filter
    });

    let registry = Registry::default().with(env_filter);

    match (config.file_output, config.console_output) {
        (true, true) => {
            let (file_writer, guard) = file_writer()?;
            LOG_GUARDS
                .lock()
                .map_err(|_| anyhow!("log guard mutex poisoned"))?
                .push(guard);

            if config.json_format {
                let file_layer = fmt::Layer::new()
                    .json()
                    .with_writer(file_writer)
                    .with_target(true)
                    .with_ansi(false);
                let console_layer = fmt::Layer::new()
                    .with_writer(std::io::stdout)
                    .with_target(false);
                registry.with(file_layer).with(console_layer).init();
            } else {
                let file_layer = fmt::Layer::new()
                    .with_writer(file_writer)
                    .with_target(false)
                    .with_ansi(false);
                let console_layer = fmt::Layer::new()
                    .with_writer(std::io::stdout)
                    .with_target(false);
                registry.with(file_layer).with(console_layer).init();
            }
        }
        (true, false) => {
            let (file_writer, guard) = file_writer()?;
            LOG_GUARDS
                .lock()
                .map_err(|_| anyhow!("log guard mutex poisoned"))?
                .push(guard);

            if config.json_format {
                let file_layer = fmt::Layer::new()
                    .json()
                    .with_writer(file_writer)
                    .with_target(true)
                    .with_ansi(false);
                registry.with(file_layer).init();
            } else {
                let file_layer = fmt::Layer::new()
                    .with_writer(file_writer)
                    .with_target(false)
                    .with_ansi(false);
                registry.with(file_layer).init();
            }
        }
        (false, true) => {
            let console_layer = fmt::Layer::new()
                .with_writer(std::io::stdout)
                .with_target(false);
            registry.with(console_layer).init();
        }
        (false, false) => {
            return Err(anyhow!("No logging output configured"));
        }
    }

    info!("Logging system initialized");
    info!("Log level: {}", config.level);
    if config.file_output {
        info!("Log directory: {:?}", get_log_directory());
    }

    Ok(())
}

fn file_writer() -> Result<(
    tracing_appender::non_blocking::NonBlocking,
    tracing_appender::non_blocking::WorkerGuard,
)> {
    let log_dir = get_log_directory();
    std::fs::create_dir_all(&log_dir)
        .map_err(|e| anyhow!("Failed to create log directory {log_dir:?}: {e}"))?;
    let appender = rolling::daily(&log_dir, "catalog-mirror.log");
    Ok(non_blocking(appender))
}
