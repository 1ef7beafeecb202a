//! Progress events emitted while a sync job runs.
//!
//! Events are fire-and-forget: the engine publishes them and moves on, and a
//! slow or absent subscriber never stalls a sync.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::EntityKind;
use super::sync_job::{JobMode, SyncCounts};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SyncEvent {
    Started {
        job_id: String,
        kind: EntityKind,
        mode: JobMode,
        timestamp: DateTime<Utc>,
    },
    Progress {
        job_id: String,
        kind: EntityKind,
        counts: SyncCounts,
        page: Option<u32>,
        timestamp: DateTime<Utc>,
    },
    Completed {
        job_id: String,
        kind: EntityKind,
        counts: SyncCounts,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    Failed {
        job_id: String,
        kind: EntityKind,
        counts: SyncCounts,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl SyncEvent {
    pub fn job_id(&self) -> &str {
        match self {
            SyncEvent::Started { job_id, .. }
            | SyncEvent::Progress { job_id, .. }
            | SyncEvent::Completed { job_id, .. }
            | SyncEvent::Failed { job_id, .. } => job_id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            SyncEvent::Started { kind, .. }
            | SyncEvent::Progress { kind, .. }
            | SyncEvent::Completed { kind, .. }
            | SyncEvent::Failed { kind, .. } => *kind,
        }
    }

    /// Event name used for subscriber routing and log correlation.
    pub fn event_name(&self) -> &'static str {
        match self {
            SyncEvent::Started { .. } => "sync-started",
            SyncEvent::Progress { .. } => "sync-progress",
            SyncEvent::Completed { .. } => "sync-completed",
            SyncEvent::Failed { .. } => "sync-failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncEvent::Completed { .. } | SyncEvent::Failed { .. })
    }
}
