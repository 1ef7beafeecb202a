//! Sync engine - the reconciliation pipeline
//!
//! Stages, in record order: fetch (with retry and rate limiting behind the
//! [`fetcher::CatalogFetcher`] seam), normalize, identity resolution,
//! secondary-key conflict resolution, idempotent write. The orchestrator
//! wires the stages together and owns job state and progress publication.

pub mod conflict;
pub mod fetcher;
pub mod identity;
pub mod normalizer;
pub mod orchestrator;
pub mod progress;
pub mod retry;

pub use conflict::{KeyProvenance, KeyResolution};
pub use fetcher::{CatalogFetcher, FetchError};
pub use identity::RowMatch;
pub use orchestrator::{SyncError, SyncOrchestrator, SyncSettings, TargetedOutcome};
pub use progress::{EventBus, NoopPublisher, ProgressPublisher};
pub use retry::RetryPolicy;
