//! Webhook intake for remote change notifications
//!
//! Maps provider topics onto entity kinds and funnels each notification into
//! a targeted sync. Duplicate deliveries are absorbed through a bounded
//! event-id window; unknown topics are acknowledged and dropped. HTTP routing
//! lives outside this crate, so the ingestor takes already-parsed payloads.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::EntityKind;
use crate::sync_engine::{SyncError, SyncOrchestrator, TargetedOutcome};

/// Remembered event ids. Old entries fall off as new ones arrive.
const DEDUP_WINDOW: usize = 1024;

/// One parsed change notification. Accepts the provider's raw field names
/// (`id`, `code`) as aliases so payloads deserialize unmodified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub topic: String,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default, alias = "id")]
    pub remote_id: Option<String>,
    #[serde(default, alias = "code")]
    pub business_key_hint: Option<String>,
}

impl ChangeNotification {
    pub fn new(topic: impl Into<String>, remote_id: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            event_id: None,
            remote_id: Some(remote_id.into()),
            business_key_hint: None,
        }
    }
}

/// What became of a notification. `Ignored` and `Duplicate` are accepted
/// outcomes, not errors; only pipeline failures surface as `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "disposition", content = "detail", rename_all = "snake_case")]
pub enum WebhookDisposition {
    Applied(TargetedOutcome),
    Duplicate,
    Ignored { reason: String },
}

/// Change-notification intake. One instance serves all entity kinds; the
/// per-kind exclusion rules live in the orchestrator's job registry.
pub struct WebhookIngestor {
    orchestrator: Arc<SyncOrchestrator>,
    seen: Mutex<SeenWindow>,
}

#[derive(Default)]
struct SeenWindow {
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl SeenWindow {
    fn contains(&self, event_id: &str) -> bool {
        self.ids.contains(event_id)
    }

    fn remember(&mut self, event_id: String) {
        if !self.ids.insert(event_id.clone()) {
            return;
        }
        self.order.push_back(event_id);
        while self.order.len() > DEDUP_WINDOW {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
    }
}

impl WebhookIngestor {
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self {
            orchestrator,
            seen: Mutex::new(SeenWindow::default()),
        }
    }

    /// Processes one notification. Re-delivery is harmless: the event-id
    /// window short-circuits known replays, and the targeted sync underneath
    /// is idempotent regardless.
    pub async fn ingest(
        &self,
        notification: ChangeNotification,
    ) -> Result<WebhookDisposition, SyncError> {
        let Some(kind) = kind_for_topic(&notification.topic) else {
            debug!("Unhandled webhook topic: {}", notification.topic);
            return Ok(WebhookDisposition::Ignored {
                reason: format!("unhandled topic: {}", notification.topic),
            });
        };

        let Some(remote_id) = notification
            .remote_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
        else {
            warn!("⚠️ Webhook for {} carries no record id", notification.topic);
            return Ok(WebhookDisposition::Ignored {
                reason: "notification carries no record id".into(),
            });
        };

        if let Some(event_id) = notification.event_id.as_deref() {
            if self.seen.lock().await.contains(event_id) {
                debug!("🔁 Webhook event {event_id} already processed; skipping");
                return Ok(WebhookDisposition::Duplicate);
            }
        }

        info!(
            "📥 Webhook {} -> targeted {kind} sync for {remote_id}",
            notification.topic
        );
        let outcome = self
            .orchestrator
            .targeted_sync(kind, remote_id, notification.business_key_hint.as_deref())
            .await?;

        // Remember the event only after a successful pass so the provider's
        // retry of a failed delivery is not mistaken for a replay.
        if let Some(event_id) = notification.event_id {
            self.seen.lock().await.remember(event_id);
        }

        Ok(WebhookDisposition::Applied(outcome))
    }
}

/// Topic segments name the remote collection. Every product and customer
/// event kind (create, update, stock.update) triggers the same full resync
/// of the record, so only the collection segment matters.
fn kind_for_topic(topic: &str) -> Option<EntityKind> {
    for segment in topic.split('.') {
        if segment.eq_ignore_ascii_case("products") {
            return Some(EntityKind::Product);
        }
        if segment.eq_ignore_ascii_case("customers") {
            return Some(EntityKind::Customer);
        }
    }
    None
}
