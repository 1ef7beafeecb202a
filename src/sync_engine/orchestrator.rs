//! Sync orchestration: drives pages through the record pipeline and owns
//! the job lifecycle.
//!
//! One orchestrator serves the whole process. Bulk runs of different entity
//! kinds may overlap; the job registry enforces the per-kind exclusion
//! rules. Every stage checks the cancellation token between units of work,
//! so a cancel lands within one page or one progress interval.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::{
    CatalogPage, EntityKind, JobMode, JobRegistry, JobState, JobTicket, KindBusy, NormalizedRecord,
    PageCursor, RemoteRecord, SyncCounts, SyncEvent, SyncJob,
};
use crate::infrastructure::mirror_store::{MirrorStore, StoreError};
use crate::sync_engine::conflict::{self, KeyProvenance, KeyResolution};
use crate::sync_engine::fetcher::{CatalogFetcher, FetchError};
use crate::sync_engine::identity::{self, RowMatch};
use crate::sync_engine::normalizer;
use crate::sync_engine::progress::ProgressPublisher;

/// Tuning knobs for the sync loop.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub page_size: u32,
    /// Records between progress publications.
    pub progress_interval: u32,
    /// Pause inserted at every progress interval so a bulk run never
    /// monopolizes the store.
    pub batch_delay: Duration,
    /// Attempts per page before the whole job gives up.
    pub page_retry_limit: u32,
    /// Base wait between page attempts; grows linearly with the attempt.
    pub page_retry_delay: Duration,
    /// Consecutive record failures treated as a systemic problem.
    pub max_consecutive_errors: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: 100,
            progress_interval: 50,
            batch_delay: Duration::from_millis(100),
            page_retry_limit: 3,
            page_retry_delay: Duration::from_secs(2),
            max_consecutive_errors: 20,
        }
    }
}

/// Errors returned to direct callers (targeted sync, job start). Bulk record
/// failures are absorbed into job counts instead.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Busy(#[from] KindBusy),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("record rejected: {0}")]
    Record(String),
}

/// Result of a targeted sync, reported directly to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TargetedOutcome {
    Created { row_id: i64 },
    Updated { row_id: i64 },
    Relinked { row_id: i64 },
    /// The remote authoritatively no longer knows the record; the linked
    /// local row was deactivated.
    Deactivated { row_id: i64 },
    /// Hidden record (product without prices); nothing written.
    Skipped,
    /// Unknown both remotely and locally.
    NotFound,
}

#[derive(Debug)]
enum RecordOutcome {
    Created(i64),
    Updated(i64),
    Relinked(i64),
    Skipped,
}

impl From<RecordOutcome> for TargetedOutcome {
    fn from(outcome: RecordOutcome) -> Self {
        match outcome {
            RecordOutcome::Created(row_id) => TargetedOutcome::Created { row_id },
            RecordOutcome::Updated(row_id) => TargetedOutcome::Updated { row_id },
            RecordOutcome::Relinked(row_id) => TargetedOutcome::Relinked { row_id },
            RecordOutcome::Skipped => TargetedOutcome::Skipped,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum RecordError {
    #[error("record carries neither a remote id nor a business key")]
    Anonymous,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<RecordError> for SyncError {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::Anonymous => SyncError::Record(err.to_string()),
            RecordError::Store(err) => SyncError::Store(err),
        }
    }
}

pub struct SyncOrchestrator {
    fetcher: Arc<dyn CatalogFetcher>,
    store: MirrorStore,
    registry: JobRegistry,
    publisher: Arc<dyn ProgressPublisher>,
    settings: SyncSettings,
}

impl SyncOrchestrator {
    pub fn new(
        fetcher: Arc<dyn CatalogFetcher>,
        store: MirrorStore,
        registry: JobRegistry,
        publisher: Arc<dyn ProgressPublisher>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            fetcher,
            store,
            registry,
            publisher,
            settings,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn store(&self) -> &MirrorStore {
        &self.store
    }

    /// Runs a bulk sync to completion and returns the final job snapshot.
    /// Job-level failures end up in the snapshot, not in the `Err` arm;
    /// only the overlap check refuses outright.
    pub async fn run_bulk(&self, kind: EntityKind) -> Result<SyncJob, KindBusy> {
        let ticket = self.registry.begin(kind, JobMode::Bulk).await?;
        Ok(self.drive_bulk(kind, ticket).await)
    }

    /// Starts a bulk sync in a background task and acknowledges immediately
    /// with the job id. Progress flows through the publisher.
    pub async fn spawn_bulk(self: &Arc<Self>, kind: EntityKind) -> Result<String, KindBusy> {
        let ticket = self.registry.begin(kind, JobMode::Bulk).await?;
        let job_id = ticket.job_id.clone();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.drive_bulk(kind, ticket).await;
        });
        Ok(job_id)
    }

    /// Requests cancellation of a running job.
    pub async fn cancel(&self, job_id: &str) -> bool {
        self.registry.cancel(job_id).await
    }

    /// Reconciles a single record by remote id. A remote miss deactivates
    /// the linked local row (found by remote id, then by the optional
    /// business-key hint) rather than deleting anything.
    pub async fn targeted_sync(
        &self,
        kind: EntityKind,
        remote_id: &str,
        business_key_hint: Option<&str>,
    ) -> Result<TargetedOutcome, SyncError> {
        let ticket = self.registry.begin(kind, JobMode::Targeted).await?;
        info!(
            "🎯 Targeted {kind} sync for remote id {remote_id} (job {})",
            ticket.job_id
        );

        match self.run_targeted(kind, remote_id, business_key_hint).await {
            Ok((outcome, counts)) => {
                self.registry.complete(&ticket.job_id, counts).await;
                info!("✅ Targeted {kind} sync done: {outcome:?}");
                Ok(outcome)
            }
            Err(err) => {
                let counts = SyncCounts {
                    processed: 1,
                    errors: 1,
                    ..SyncCounts::default()
                };
                self.registry
                    .fail(&ticket.job_id, counts, &err.to_string())
                    .await;
                warn!("⚠️ Targeted {kind} sync for {remote_id} failed: {err}");
                Err(err)
            }
        }
    }

    async fn run_targeted(
        &self,
        kind: EntityKind,
        remote_id: &str,
        business_key_hint: Option<&str>,
    ) -> Result<(TargetedOutcome, SyncCounts), SyncError> {
        let mut counts = SyncCounts {
            processed: 1,
            ..SyncCounts::default()
        };

        let Some(record) = self.fetcher.fetch_one(kind, remote_id).await? else {
            let linked = match self.store.find_by_remote_id(kind, remote_id).await? {
                Some(row) => Some(row),
                None => match business_key_hint {
                    Some(key) => self.store.find_by_business_key(kind, key).await?,
                    None => None,
                },
            };
            return match linked {
                Some(row) => {
                    self.store.deactivate_row(kind, row.id).await?;
                    counts.deactivated = 1;
                    info!("📴 {kind} {remote_id} gone remotely; row {} deactivated", row.id);
                    Ok((TargetedOutcome::Deactivated { row_id: row.id }, counts))
                }
                None => Ok((TargetedOutcome::NotFound, counts)),
            };
        };

        let (outcome, resolution) = self.apply_record(&record, kind, 0).await?;
        Self::tally(&mut counts, &outcome, resolution.as_ref());
        Ok((outcome.into(), counts))
    }

    async fn drive_bulk(&self, kind: EntityKind, ticket: JobTicket) -> SyncJob {
        let job_id = ticket.job_id.clone();
        let started_at = Utc::now();
        info!("🚀 Starting bulk {kind} sync (job {job_id})");
        self.publisher.publish(&SyncEvent::Started {
            job_id: job_id.clone(),
            kind,
            mode: JobMode::Bulk,
            timestamp: started_at,
        });

        let mut counts = SyncCounts::default();
        let loop_result = self.page_loop(kind, &ticket, &mut counts).await;

        match loop_result {
            Ok(()) => match self.store.deactivate_stale(kind, started_at).await {
                Ok(deactivated) => {
                    counts.deactivated = deactivated;
                    self.finish_completed(&job_id, kind, counts, started_at).await
                }
                Err(err) => {
                    let summary = format!("deactivation sweep failed: {err}");
                    self.finish_failed(&job_id, kind, counts, started_at, &summary)
                        .await
                }
            },
            Err(summary) => {
                self.finish_failed(&job_id, kind, counts, started_at, &summary)
                    .await
            }
        }
    }

    async fn page_loop(
        &self,
        kind: EntityKind,
        ticket: &JobTicket,
        counts: &mut SyncCounts,
    ) -> Result<(), String> {
        let mut cursor = Some(PageCursor::start(self.settings.page_size));
        let mut row_index: u64 = 0;
        let mut consecutive_errors: u32 = 0;

        while let Some(current) = cursor {
            if ticket.cancel.is_cancelled() {
                info!("🛑 Bulk {kind} sync cancelled before {current}");
                return Err("cancelled by operator".into());
            }

            let page_no = current.page();
            let page = self
                .fetch_page_with_retry(kind, current, &ticket.cancel)
                .await
                .map_err(|err| {
                    error!("❌ Giving up on {kind} page {page_no}: {err}");
                    format!("page {page_no} failed after retries: {err}")
                })?;

            if page.records.is_empty() {
                info!("🏁 {kind} page {page_no} empty; catalog exhausted");
                break;
            }

            for record in &page.records {
                row_index += 1;
                counts.processed += 1;

                match self.apply_record(record, kind, row_index).await {
                    Ok((outcome, resolution)) => {
                        consecutive_errors = 0;
                        Self::tally(counts, &outcome, resolution.as_ref());
                    }
                    Err(err) => {
                        counts.errors += 1;
                        consecutive_errors += 1;
                        warn!("⚠️ {kind} record {row_index} failed: {err}");
                        if consecutive_errors >= self.settings.max_consecutive_errors {
                            error!(
                                "❌ {consecutive_errors} consecutive {kind} record failures; aborting"
                            );
                            return Err(format!(
                                "{consecutive_errors} consecutive record failures"
                            ));
                        }
                    }
                }

                if row_index % u64::from(self.settings.progress_interval.max(1)) == 0 {
                    self.registry
                        .update_progress(&ticket.job_id, *counts, Some(page_no))
                        .await;
                    self.publisher.publish(&SyncEvent::Progress {
                        job_id: ticket.job_id.clone(),
                        kind,
                        counts: *counts,
                        page: Some(page_no),
                        timestamp: Utc::now(),
                    });
                    tokio::select! {
                        () = sleep(self.settings.batch_delay) => {}
                        () = ticket.cancel.cancelled() => {
                            info!("🛑 Bulk {kind} sync cancelled mid-page");
                            return Err("cancelled by operator".into());
                        }
                    }
                }
            }

            self.registry
                .update_progress(&ticket.job_id, *counts, Some(page_no))
                .await;
            cursor = page.next;
        }

        Ok(())
    }

    /// Fetches one page, retrying transient failures with a linearly
    /// growing delay. Cancellation cuts the backoff short.
    async fn fetch_page_with_retry(
        &self,
        kind: EntityKind,
        cursor: PageCursor,
        cancel: &CancellationToken,
    ) -> Result<CatalogPage, FetchError> {
        let mut attempt: u32 = 1;
        loop {
            match self.fetcher.fetch_page(kind, cursor.clone()).await {
                Ok(page) => return Ok(page),
                Err(err) if attempt < self.settings.page_retry_limit && err.is_retryable() => {
                    let wait = self.settings.page_retry_delay * attempt;
                    warn!(
                        "🔄 {kind} {cursor} attempt {attempt} failed ({err}); next try in {wait:?}"
                    );
                    tokio::select! {
                        () = sleep(wait) => {}
                        () = cancel.cancelled() => return Err(err),
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Runs one record through normalize, identity, conflict and write.
    /// Returns the key resolution only for kinds that carry secondary keys.
    async fn apply_record(
        &self,
        record: &RemoteRecord,
        kind: EntityKind,
        row_index: u64,
    ) -> Result<(RecordOutcome, Option<KeyResolution>), RecordError> {
        if kind == EntityKind::Product && normalizer::is_hidden_product(record) {
            return Ok((RecordOutcome::Skipped, None));
        }

        let normalized = normalizer::normalize(record, kind);
        if normalized.is_anonymous() {
            return Err(RecordError::Anonymous);
        }

        let matched = identity::resolve(&self.store, &normalized).await?;
        let resolution = conflict::resolve(
            &self.store,
            kind,
            normalized.secondary_key.as_deref(),
            normalized.business_key.as_deref(),
            row_index,
        )
        .await?;

        let (outcome, final_resolution) = self
            .write_with_key_retry(&normalized, &matched, resolution, row_index)
            .await?;
        Ok((outcome, kind.uses_secondary_key().then_some(final_resolution)))
    }

    /// Writes a record. A uniqueness violation on the secondary key gets one
    /// retry with a regenerated placeholder; a second violation is a record
    /// failure.
    async fn write_with_key_retry(
        &self,
        normalized: &NormalizedRecord,
        matched: &RowMatch,
        resolution: KeyResolution,
        row_index: u64,
    ) -> Result<(RecordOutcome, KeyResolution), RecordError> {
        match self.write_once(normalized, matched, &resolution).await {
            Ok(outcome) => Ok((outcome, resolution)),
            Err(StoreError::UniqueViolation { key }) => {
                let retry = conflict::regenerate(
                    &resolution,
                    normalized.business_key.as_deref(),
                    row_index,
                );
                warn!(
                    "🔁 Secondary key {key} collided on write; retrying as {:?}",
                    retry.key
                );
                let outcome = self.write_once(normalized, matched, &retry).await?;
                Ok((outcome, retry))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn write_once(
        &self,
        normalized: &NormalizedRecord,
        matched: &RowMatch,
        resolution: &KeyResolution,
    ) -> Result<RecordOutcome, StoreError> {
        match matched {
            RowMatch::Create => {
                let row_id = self.store.insert(normalized, resolution).await?;
                Ok(RecordOutcome::Created(row_id))
            }
            RowMatch::Update(row) => {
                self.store.update(row, normalized, resolution).await?;
                Ok(RecordOutcome::Updated(row.id))
            }
            RowMatch::Relink(row) => {
                self.store.update(row, normalized, resolution).await?;
                Ok(RecordOutcome::Relinked(row.id))
            }
        }
    }

    fn tally(counts: &mut SyncCounts, outcome: &RecordOutcome, resolution: Option<&KeyResolution>) {
        match outcome {
            RecordOutcome::Created(_) => counts.created += 1,
            RecordOutcome::Updated(_) => counts.updated += 1,
            RecordOutcome::Relinked(_) => counts.relinked += 1,
            RecordOutcome::Skipped => {
                counts.skipped += 1;
                return;
            }
        }
        if let Some(resolution) = resolution {
            match resolution.provenance {
                KeyProvenance::Real => counts.real_keys += 1,
                KeyProvenance::Generated => counts.temp_keys += 1,
                KeyProvenance::DuplicateDisplaced => counts.duplicate_keys += 1,
            }
        }
    }

    async fn finish_completed(
        &self,
        job_id: &str,
        kind: EntityKind,
        counts: SyncCounts,
        started_at: DateTime<Utc>,
    ) -> SyncJob {
        let finished = Utc::now();
        let duration_ms = (finished - started_at).num_milliseconds().max(0) as u64;
        info!(
            "✅ Bulk {kind} sync complete in {duration_ms}ms: {} written, {} skipped, {} errors, {} deactivated",
            counts.written(),
            counts.skipped,
            counts.errors,
            counts.deactivated
        );
        let job = self.registry.complete(job_id, counts).await;
        self.publisher.publish(&SyncEvent::Completed {
            job_id: job_id.to_owned(),
            kind,
            counts,
            duration_ms,
            timestamp: finished,
        });
        job.unwrap_or_else(|| {
            Self::fallback_snapshot(job_id, kind, JobState::Completed, counts, started_at, None)
        })
    }

    async fn finish_failed(
        &self,
        job_id: &str,
        kind: EntityKind,
        counts: SyncCounts,
        started_at: DateTime<Utc>,
        summary: &str,
    ) -> SyncJob {
        error!("❌ Bulk {kind} sync failed: {summary}");
        let job = self.registry.fail(job_id, counts, summary).await;
        self.publisher.publish(&SyncEvent::Failed {
            job_id: job_id.to_owned(),
            kind,
            counts,
            error: summary.to_owned(),
            timestamp: Utc::now(),
        });
        job.unwrap_or_else(|| {
            Self::fallback_snapshot(
                job_id,
                kind,
                JobState::Failed,
                counts,
                started_at,
                Some(summary.to_owned()),
            )
        })
    }

    // Registry entries are never removed while running, so this is only a
    // type-level fallback.
    fn fallback_snapshot(
        job_id: &str,
        kind: EntityKind,
        state: JobState,
        counts: SyncCounts,
        started_at: DateTime<Utc>,
        failure: Option<String>,
    ) -> SyncJob {
        SyncJob {
            id: job_id.to_owned(),
            kind,
            mode: JobMode::Bulk,
            state,
            counts,
            started_at,
            finished_at: Some(Utc::now()),
            failure,
            current_page: None,
        }
    }
}
