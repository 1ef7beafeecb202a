//! Infrastructure layer for database access, configuration, and the remote API
//!
//! This module provides the SQLite connection and mirror store, the
//! rate-limited remote API client, configuration management, and logging.

pub mod api_client;      // Rate-limited, token-refreshing remote API client
pub mod config;          // Configuration management and defaults
pub mod database;        // SQLite pool and schema migration
pub mod logging;         // Logging infrastructure
pub mod mirror_store;    // Upsert/deactivate persistence for mirrored rows

// Re-export commonly used items
pub use api_client::CatalogApiClient;
pub use config::{AppConfig, ConfigManager};
pub use database::DatabaseConnection;
pub use logging::{get_log_directory, init_logging, init_logging_with_config};
pub use mirror_store::{MirrorStore, StoreError, TableCounts};
