//! Sync job lifecycle and the in-memory job registry.
//!
//! The registry is the authority on what is allowed to run: one bulk job per
//! entity kind, targeted jobs refused while a bulk job of the same kind is in
//! flight. Job state lives only in memory; a restart forgets finished jobs,
//! which is acceptable because every run is idempotent.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::entity::EntityKind;

/// Finished jobs kept for the status surface before the oldest are dropped.
const MAX_FINISHED_JOBS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    Bulk,
    Targeted,
}

impl std::fmt::Display for JobMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobMode::Bulk => f.write_str("bulk"),
            JobMode::Targeted => f.write_str("targeted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Completed,
    Failed,
}

/// Monotonic counters accumulated over a run. Counts never reset mid-job;
/// a partial failure reports whatever was reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    /// Records seen, including skipped and failed ones.
    pub processed: u32,
    pub created: u32,
    pub updated: u32,
    /// Rows whose remote id was rewritten after a business-key match.
    pub relinked: u32,
    /// Rows deactivated because the remote stopped returning them.
    pub deactivated: u32,
    /// Records intentionally not written (e.g. hidden products).
    pub skipped: u32,
    /// Record-level failures that did not abort the job.
    pub errors: u32,
    /// Secondary keys taken verbatim from the remote.
    pub real_keys: u32,
    /// Placeholder keys generated for records without one.
    pub temp_keys: u32,
    /// Keys displaced because another row already owned the value.
    pub duplicate_keys: u32,
}

impl SyncCounts {
    pub fn written(&self) -> u32 {
        self.created + self.updated + self.relinked
    }
}

/// A single run of a bulk or targeted sync, as exposed on the status surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: String,
    pub kind: EntityKind,
    pub mode: JobMode,
    pub state: JobState,
    pub counts: SyncCounts,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Failure summary, present only in the `Failed` state.
    pub failure: Option<String>,
    pub current_page: Option<u32>,
}

impl SyncJob {
    pub fn duration_ms(&self) -> Option<u64> {
        self.finished_at.map(|end| {
            (end - self.started_at)
                .num_milliseconds()
                .try_into()
                .unwrap_or(0)
        })
    }

    pub fn is_running(&self) -> bool {
        self.state == JobState::Running
    }
}

/// Returned when a new job would overlap a running one of the same kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("a {kind} sync is already running (job {job_id})")]
pub struct KindBusy {
    pub kind: EntityKind,
    pub job_id: String,
}

/// Handle given to the code that drives a job: the id for registry updates
/// plus the token that requests cooperative cancellation.
#[derive(Debug, Clone)]
pub struct JobTicket {
    pub job_id: String,
    pub cancel: CancellationToken,
}

struct JobEntry {
    job: SyncJob,
    cancel: CancellationToken,
}

/// In-memory registry of every known job, keyed by job id.
#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<String, JobEntry>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registers a new job in the `Running` state, enforcing per-kind
    /// exclusion: a bulk job refuses to start while any job of its kind is
    /// running, a targeted job only while a *bulk* job of its kind is.
    pub async fn begin(&self, kind: EntityKind, mode: JobMode) -> Result<JobTicket, KindBusy> {
        let mut jobs = self.jobs.write().await;

        let blocking = jobs.values().find(|entry| {
            entry.job.kind == kind
                && entry.job.is_running()
                && (mode == JobMode::Bulk || entry.job.mode == JobMode::Bulk)
        });
        if let Some(entry) = blocking {
            warn!(
                "🚫 Refusing {mode} {kind} sync: job {} is still running",
                entry.job.id
            );
            return Err(KindBusy {
                kind,
                job_id: entry.job.id.clone(),
            });
        }

        Self::prune_finished(&mut jobs);

        let job_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let job = SyncJob {
            id: job_id.clone(),
            kind,
            mode,
            state: JobState::Running,
            counts: SyncCounts::default(),
            started_at: Utc::now(),
            finished_at: None,
            failure: None,
            current_page: None,
        };
        info!("🆕 Registered {mode} {kind} sync job: {job_id}");
        jobs.insert(
            job_id.clone(),
            JobEntry {
                job,
                cancel: cancel.clone(),
            },
        );

        Ok(JobTicket { job_id, cancel })
    }

    pub async fn update_progress(&self, job_id: &str, counts: SyncCounts, page: Option<u32>) {
        let mut jobs = self.jobs.write().await;
        if let Some(entry) = jobs.get_mut(job_id) {
            entry.job.counts = counts;
            entry.job.current_page = page;
        }
    }

    /// Marks the job `Completed` and returns its final snapshot.
    pub async fn complete(&self, job_id: &str, counts: SyncCounts) -> Option<SyncJob> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(job_id)?;
        entry.job.counts = counts;
        entry.job.state = JobState::Completed;
        entry.job.finished_at = Some(Utc::now());
        Some(entry.job.clone())
    }

    /// Marks the job `Failed` with a summary and returns its final snapshot.
    pub async fn fail(&self, job_id: &str, counts: SyncCounts, summary: &str) -> Option<SyncJob> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(job_id)?;
        entry.job.counts = counts;
        entry.job.state = JobState::Failed;
        entry.job.failure = Some(summary.to_owned());
        entry.job.finished_at = Some(Utc::now());
        Some(entry.job.clone())
    }

    /// Requests cooperative cancellation. Returns false for unknown or
    /// already finished jobs.
    pub async fn cancel(&self, job_id: &str) -> bool {
        let jobs = self.jobs.read().await;
        match jobs.get(job_id) {
            Some(entry) if entry.job.is_running() => {
                info!("🛑 Cancellation requested for job {job_id}");
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Cancels every running job. Used on shutdown.
    pub async fn cancel_all(&self) -> usize {
        let jobs = self.jobs.read().await;
        let mut cancelled = 0;
        for entry in jobs.values() {
            if entry.job.is_running() {
                entry.cancel.cancel();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!("🛑 Cancellation requested for {cancelled} running job(s)");
        }
        cancelled
    }

    pub async fn snapshot(&self, job_id: &str) -> Option<SyncJob> {
        let jobs = self.jobs.read().await;
        jobs.get(job_id).map(|entry| entry.job.clone())
    }

    /// All known jobs, most recently started first.
    pub async fn snapshots(&self) -> Vec<SyncJob> {
        let jobs = self.jobs.read().await;
        let mut all: Vec<SyncJob> = jobs.values().map(|entry| entry.job.clone()).collect();
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all
    }

    /// The running job of a kind, if any.
    pub async fn running(&self, kind: EntityKind) -> Option<SyncJob> {
        let jobs = self.jobs.read().await;
        jobs.values()
            .map(|entry| &entry.job)
            .find(|job| job.kind == kind && job.is_running())
            .cloned()
    }

    fn prune_finished(jobs: &mut HashMap<String, JobEntry>) {
        let finished = jobs.values().filter(|e| !e.job.is_running()).count();
        if finished <= MAX_FINISHED_JOBS {
            return;
        }
        let mut stale: Vec<(String, DateTime<Utc>)> = jobs
            .values()
            .filter(|e| !e.job.is_running())
            .map(|e| (e.job.id.clone(), e.job.started_at))
            .collect();
        stale.sort_by_key(|(_, started)| *started);
        for (id, _) in stale.into_iter().take(finished - MAX_FINISHED_JOBS) {
            jobs.remove(&id);
        }
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}
