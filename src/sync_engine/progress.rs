//! Progress publishing: the seam between the engine and its observers.
//!
//! The engine calls [`ProgressPublisher::publish`] and never waits on a
//! subscriber. The default implementation fans events out over a tokio
//! broadcast channel and keeps a short per-job replay buffer so a status
//! query can show recent activity without having subscribed in time.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::SyncEvent;

/// Events kept per job for late-coming status queries.
const REPLAY_CAPACITY: usize = 64;

/// Observer seam. Implementations must be cheap and non-blocking; the sync
/// loop calls this inline.
pub trait ProgressPublisher: Send + Sync {
    fn publish(&self, event: &SyncEvent);
}

/// Broadcast-based publisher with a bounded per-job replay buffer.
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
    replay: RwLock<HashMap<String, VecDeque<SyncEvent>>>,
}

impl EventBus {
    pub fn new(channel_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity);
        Self {
            sender,
            replay: RwLock::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Recent events of one job, oldest first. Empty for unknown jobs.
    pub fn recent_events(&self, job_id: &str) -> Vec<SyncEvent> {
        match self.replay.read() {
            Ok(replay) => replay
                .get(job_id)
                .map(|events| events.iter().cloned().collect())
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    fn remember(&self, event: &SyncEvent) {
        let Ok(mut replay) = self.replay.write() else {
            return;
        };
        let buffer = replay.entry(event.job_id().to_owned()).or_default();
        if buffer.len() == REPLAY_CAPACITY {
            buffer.pop_front();
        }
        buffer.push_back(event.clone());

        // Terminal events close the job; cap how many closed jobs we retain.
        if event.is_terminal() && replay.len() > REPLAY_CAPACITY {
            let closed: Vec<String> = replay
                .iter()
                .filter(|(_, events)| events.back().is_some_and(SyncEvent::is_terminal))
                .map(|(id, _)| id.clone())
                .collect();
            for id in closed.into_iter().take(replay.len() - REPLAY_CAPACITY) {
                replay.remove(&id);
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ProgressPublisher for EventBus {
    fn publish(&self, event: &SyncEvent) {
        self.remember(event);
        // No receivers is fine; progress must never stall the sync.
        if let Err(err) = self.sender.send(event.clone()) {
            debug!("No subscribers for {}: {err}", event.event_name());
        }
    }
}

/// Publisher that drops everything. Used by tests and one-shot CLI runs
/// that read the final job snapshot instead.
pub struct NoopPublisher;

impl ProgressPublisher for NoopPublisher {
    fn publish(&self, _event: &SyncEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntityKind, JobMode, SyncCounts};
    use chrono::Utc;

    fn started(job_id: &str) -> SyncEvent {
        SyncEvent::Started {
            job_id: job_id.into(),
            kind: EntityKind::Product,
            mode: JobMode::Bulk,
            timestamp: Utc::now(),
        }
    }

    fn progress(job_id: &str, processed: u32) -> SyncEvent {
        SyncEvent::Progress {
            job_id: job_id.into(),
            kind: EntityKind::Product,
            counts: SyncCounts {
                processed,
                ..SyncCounts::default()
            },
            page: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(&started("job-1"));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_name(), "sync-started");
        assert_eq!(event.job_id(), "job-1");
    }

    #[test]
    fn publishing_without_subscribers_does_not_panic() {
        let bus = EventBus::new(8);
        bus.publish(&started("job-1"));
        bus.publish(&progress("job-1", 50));
        assert_eq!(bus.recent_events("job-1").len(), 2);
    }

    #[test]
    fn replay_buffer_is_bounded_per_job() {
        let bus = EventBus::new(8);
        for i in 0..(REPLAY_CAPACITY as u32 + 10) {
            bus.publish(&progress("job-1", i));
        }
        let events = bus.recent_events("job-1");
        assert_eq!(events.len(), REPLAY_CAPACITY);
        // The oldest events were dropped, the newest kept.
        match events.last().unwrap() {
            SyncEvent::Progress { counts, .. } => {
                assert_eq!(counts.processed, REPLAY_CAPACITY as u32 + 9)
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(bus.recent_events("job-unknown").is_empty());
    }
}
