//! Domain module - core types of the reconciliation engine
//!
//! Entity kinds, raw and normalized record shapes, mirror row projections,
//! job lifecycle state and the progress event vocabulary. No I/O lives here.

pub mod entity;
pub mod events;
pub mod mirror;
pub mod normalized;
pub mod remote;
pub mod sync_job;

// Re-export commonly used items
pub use entity::EntityKind;
pub use events::SyncEvent;
pub use mirror::MirrorRow;
pub use normalized::{EntityFields, NormalizedRecord};
pub use remote::{CatalogPage, PageCursor, RemoteRecord};
pub use sync_job::{JobMode, JobRegistry, JobState, JobTicket, KindBusy, SyncCounts, SyncJob};
