//! Configuration infrastructure
//!
//! Loading and management of the engine's settings: remote API access,
//! sync-loop tuning, database location and logging. Stored as a single
//! JSON file in the platform config directory; a first run writes the
//! defaults out so operators have something concrete to edit.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tracing::info;

use crate::sync_engine::orchestrator::SyncSettings;
use crate::sync_engine::retry::RetryPolicy;

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Remote catalog API access
    pub remote: RemoteApiConfig,

    /// Sync loop tuning
    pub sync: SyncConfig,

    /// Local mirror database
    pub database: DatabaseConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Remote catalog API access settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteApiConfig {
    /// Base url; a trailing `/v1` is tolerated and stripped
    pub base_url: String,

    /// Account username for token acquisition
    pub username: String,

    /// API access key paired with the username
    pub access_key: String,

    /// Tenant header sent with every request
    pub partner_id: String,

    /// Request timeout in seconds
    pub timeout_seconds: u64,

    /// Hard cap on outgoing requests per second
    pub max_requests_per_second: u32,

    /// Retry attempts per request, including the first
    pub max_retries: u32,
}

impl Default for RemoteApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            username: String::new(),
            access_key: String::new(),
            partner_id: defaults::PARTNER_ID.to_string(),
            timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            max_requests_per_second: defaults::MAX_REQUESTS_PER_SECOND,
            max_retries: defaults::MAX_RETRIES,
        }
    }
}

impl RemoteApiConfig {
    pub fn is_configured(&self) -> bool {
        !self.base_url.trim().is_empty()
            && !self.username.trim().is_empty()
            && !self.access_key.trim().is_empty()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            ..RetryPolicy::remote_api()
        }
    }
}

/// Sync loop tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Records requested per page
    pub page_size: u32,

    /// Records between progress publications
    pub progress_interval: u32,

    /// Pause at each progress interval in milliseconds
    pub batch_delay_ms: u64,

    /// Attempts per page before a bulk job fails
    pub page_retry_limit: u32,

    /// Base wait between page attempts in milliseconds
    pub page_retry_delay_ms: u64,

    /// Consecutive record failures treated as systemic
    pub max_consecutive_errors: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: defaults::PAGE_SIZE,
            progress_interval: defaults::PROGRESS_INTERVAL,
            batch_delay_ms: defaults::BATCH_DELAY_MS,
            page_retry_limit: defaults::PAGE_RETRY_LIMIT,
            page_retry_delay_ms: defaults::PAGE_RETRY_DELAY_MS,
            max_consecutive_errors: defaults::MAX_CONSECUTIVE_ERRORS,
        }
    }
}

impl SyncConfig {
    pub fn to_settings(&self) -> SyncSettings {
        SyncSettings {
            page_size: self.page_size.max(1),
            progress_interval: self.progress_interval.max(1),
            batch_delay: Duration::from_millis(self.batch_delay_ms),
            page_retry_limit: self.page_retry_limit.max(1),
            page_retry_delay: Duration::from_millis(self.page_retry_delay_ms),
            max_consecutive_errors: self.max_consecutive_errors.max(1),
        }
    }
}

/// Local mirror database location
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseConfig {
    /// Explicit sqlite url; when absent the platform data directory is used
    pub url: Option<String>,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted logs
    pub json_format: bool,

    /// Enable console output
    pub console_output: bool,

    /// Enable file output
    pub file_output: bool,

    /// Module-specific log level filters (e.g., "sqlx": "warn")
    pub module_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: true,
            module_filters: {
                let mut filters = HashMap::new();
                filters.insert("sqlx".to_string(), "warn".to_string());
                filters.insert("reqwest".to_string(), "info".to_string());
                filters.insert("hyper".to_string(), "warn".to_string());
                filters
            },
        }
    }
}

impl AppConfig {
    /// Checks the parts the sync engine cannot run without.
    pub fn validate(&self) -> Result<()> {
        if !self.remote.is_configured() {
            anyhow::bail!(
                "remote API access is not configured; set remote.base_url, \
                 remote.username and remote.access_key in the config file"
            );
        }
        if self.remote.max_requests_per_second == 0 {
            anyhow::bail!("remote.max_requests_per_second must be at least 1");
        }
        Ok(())
    }
}

/// Default values in one place
pub mod defaults {
    pub const PARTNER_ID: &str = "catalog-mirror";
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;
    pub const MAX_REQUESTS_PER_SECOND: u32 = 4;
    pub const MAX_RETRIES: u32 = 4;

    pub const PAGE_SIZE: u32 = 100;
    pub const PROGRESS_INTERVAL: u32 = 50;
    pub const BATCH_DELAY_MS: u64 = 100;
    pub const PAGE_RETRY_LIMIT: u32 = 3;
    pub const PAGE_RETRY_DELAY_MS: u64 = 2_000;
    pub const MAX_CONSECUTIVE_ERRORS: u32 = 20;

    pub const LOG_LEVEL: &str = "info";
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    pub config_path: PathBuf,
}

impl ConfigManager {
    /// Get the application configuration directory
    pub fn get_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get user config directory")?
            .join("catalog-mirror");
        Ok(config_dir)
    }

    /// Get the application data directory (database, logs)
    pub fn get_app_data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to get user data directory")?
            .join("catalog-mirror");
        Ok(data_dir)
    }

    /// Create a new configuration manager with the default path
    pub fn new() -> Result<Self> {
        let config_dir = Self::get_config_dir()?;
        let config_path = config_dir.join("catalog_mirror_config.json");
        Ok(Self { config_path })
    }

    /// Manager bound to an explicit config file path
    pub fn with_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// Initialize configuration system on first run
    pub async fn initialize_on_first_run(&self) -> Result<AppConfig> {
        if let Some(config_dir) = self.config_path.parent() {
            if !config_dir.exists() {
                fs::create_dir_all(config_dir)
                    .await
                    .context("Failed to create config directory")?;
                info!("✅ Created configuration directory: {:?}", config_dir);
            }
        }

        if self.config_path.exists() {
            return self.load_config().await;
        }

        info!("🎉 First run detected - writing default configuration");
        let default_config = AppConfig::default();
        self.save_config(&default_config).await?;

        let data_dir = Self::get_app_data_dir()?;
        for dir in [data_dir.join("database"), data_dir.join("logs")] {
            fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create data directory {dir:?}"))?;
        }

        Ok(default_config)
    }

    /// Load configuration from file
    pub async fn load_config(&self) -> Result<AppConfig> {
        let content = fs::read_to_string(&self.config_path)
            .await
            .with_context(|| format!("Failed to read config file {:?}", self.config_path))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", self.config_path))?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_config(&self, config: &AppConfig) -> Result<()> {
        let content =
            serde_json::to_string_pretty(config).context("Failed to serialize configuration")?;
        fs::write(&self.config_path, content)
            .await
            .with_context(|| format!("Failed to write config file {:?}", self.config_path))?;
        info!("💾 Configuration saved to {:?}", self.config_path);
        Ok(())
    }

    /// The sqlite url to use: the configured one, or the default under the
    /// platform data directory.
    pub fn database_url(config: &AppConfig) -> Result<String> {
        if let Some(url) = &config.database.url {
            return Ok(url.clone());
        }
        let path = Self::get_app_data_dir()?
            .join("database")
            .join("catalog-mirror.db");
        Ok(format!("sqlite:{}", path.to_string_lossy()))
    }
}
