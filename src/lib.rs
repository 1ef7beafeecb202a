//! Catalog Mirror - remote catalog reconciliation engine
//!
//! Mirrors a remote ERP's product, customer and category catalogs into a
//! local SQLite store. Bulk syncs drain the paginated remote collections
//! under a request rate cap; targeted syncs refresh one record, typically
//! on a webhook change notification. Records are normalized, matched to
//! existing rows by remote id and then by business key (re-linking when the
//! remote reissued an id), barcode collisions get deterministic placeholder
//! keys, and rows missing from a completed bulk pass are deactivated.

// Module declarations
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod sync_engine;

// Re-export the surface most callers need
pub use application::{ChangeNotification, WebhookDisposition, WebhookIngestor};
pub use domain::{EntityKind, JobRegistry, SyncEvent, SyncJob};
pub use infrastructure::{AppConfig, CatalogApiClient, ConfigManager, DatabaseConnection, MirrorStore};
pub use sync_engine::{EventBus, SyncOrchestrator, SyncSettings, TargetedOutcome};
