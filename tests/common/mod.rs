//! Shared fixtures for the integration tests: an in-memory mirror plus a
//! scripted fetcher that plays back canned pages and single records.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use catalog_mirror::domain::{CatalogPage, EntityKind, JobRegistry, PageCursor, RemoteRecord};
use catalog_mirror::infrastructure::{DatabaseConnection, MirrorStore};
use catalog_mirror::sync_engine::{
    CatalogFetcher, FetchError, NoopPublisher, ProgressPublisher, SyncOrchestrator, SyncSettings,
};

/// Fetcher fake driven by canned data. Failures are queued per page (or per
/// record id) and consumed one at a time, so a test can express "page 3
/// fails twice, then succeeds".
pub struct ScriptedFetcher {
    pages: Mutex<HashMap<EntityKind, Vec<Vec<Value>>>>,
    page_failures: Mutex<HashMap<(EntityKind, u32), VecDeque<FetchError>>>,
    singles: Mutex<HashMap<(EntityKind, String), Value>>,
    single_failures: Mutex<HashMap<(EntityKind, String), VecDeque<FetchError>>>,
    page_calls: AtomicU32,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
            page_failures: Mutex::new(HashMap::new()),
            singles: Mutex::new(HashMap::new()),
            single_failures: Mutex::new(HashMap::new()),
            page_calls: AtomicU32::new(0),
        }
    }

    /// Replaces the scripted pages for one kind. Pages are served in order;
    /// a fetch past the last one returns an empty page.
    pub fn script_pages(&self, kind: EntityKind, pages: Vec<Vec<Value>>) {
        self.pages.lock().unwrap().insert(kind, pages);
    }

    /// Queues one failure for the given page number, consumed on fetch.
    pub fn fail_page(&self, kind: EntityKind, page: u32, err: FetchError) {
        self.page_failures
            .lock()
            .unwrap()
            .entry((kind, page))
            .or_default()
            .push_back(err);
    }

    pub fn set_single(&self, kind: EntityKind, remote_id: &str, payload: Value) {
        self.singles
            .lock()
            .unwrap()
            .insert((kind, remote_id.to_owned()), payload);
    }

    /// Makes the remote forget a record, turning the next targeted fetch
    /// into an authoritative miss.
    pub fn remove_single(&self, kind: EntityKind, remote_id: &str) {
        self.singles
            .lock()
            .unwrap()
            .remove(&(kind, remote_id.to_owned()));
    }

    /// Queues one failure for the next single-record fetch of `remote_id`.
    pub fn fail_single(&self, kind: EntityKind, remote_id: &str, err: FetchError) {
        self.single_failures
            .lock()
            .unwrap()
            .entry((kind, remote_id.to_owned()))
            .or_default()
            .push_back(err);
    }

    /// Page fetches attempted so far, retries included.
    pub fn page_calls(&self) -> u32 {
        self.page_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogFetcher for ScriptedFetcher {
    async fn fetch_page(
        &self,
        kind: EntityKind,
        cursor: PageCursor,
    ) -> Result<CatalogPage, FetchError> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(queue) = self
            .page_failures
            .lock()
            .unwrap()
            .get_mut(&(kind, cursor.page()))
        {
            if let Some(err) = queue.pop_front() {
                return Err(err);
            }
        }

        let pages = self.pages.lock().unwrap();
        let Some(scripted) = pages.get(&kind) else {
            return Ok(CatalogPage::empty());
        };
        let index = (cursor.page() - 1) as usize;
        let Some(payloads) = scripted.get(index) else {
            return Ok(CatalogPage::empty());
        };

        let records = payloads.iter().cloned().map(RemoteRecord::new).collect();
        let next = (index + 1 < scripted.len()).then(|| cursor.advance());
        let total: usize = scripted.iter().map(Vec::len).sum();
        Ok(CatalogPage {
            records,
            next,
            total_results: Some(total as u64),
        })
    }

    async fn fetch_one(
        &self,
        kind: EntityKind,
        remote_id: &str,
    ) -> Result<Option<RemoteRecord>, FetchError> {
        if let Some(queue) = self
            .single_failures
            .lock()
            .unwrap()
            .get_mut(&(kind, remote_id.to_owned()))
        {
            if let Some(err) = queue.pop_front() {
                return Err(err);
            }
        }
        let payload = self
            .singles
            .lock()
            .unwrap()
            .get(&(kind, remote_id.to_owned()))
            .cloned();
        Ok(payload.map(RemoteRecord::new))
    }
}

/// Everything a sync test needs, wired against a fresh in-memory database.
pub struct Harness {
    pub fetcher: Arc<ScriptedFetcher>,
    pub store: MirrorStore,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub registry: JobRegistry,
}

/// Settings tuned so tests finish in milliseconds while still crossing
/// progress intervals and retry paths.
pub fn fast_settings() -> SyncSettings {
    SyncSettings {
        page_size: 50,
        progress_interval: 10,
        batch_delay: Duration::from_millis(1),
        page_retry_limit: 3,
        page_retry_delay: Duration::from_millis(5),
        max_consecutive_errors: 5,
    }
}

pub async fn harness() -> Harness {
    harness_with(fast_settings()).await
}

pub async fn harness_with(settings: SyncSettings) -> Harness {
    let db = DatabaseConnection::in_memory().await.unwrap();
    db.migrate().await.unwrap();
    let store = MirrorStore::new(db.pool_arc());

    let fetcher = Arc::new(ScriptedFetcher::new());
    let registry = JobRegistry::new();
    let publisher: Arc<dyn ProgressPublisher> = Arc::new(NoopPublisher);
    let as_fetcher: Arc<dyn CatalogFetcher> = fetcher.clone();
    let orchestrator = Arc::new(SyncOrchestrator::new(
        as_fetcher,
        store.clone(),
        registry.clone(),
        publisher,
        settings,
    ));

    Harness {
        fetcher,
        store,
        orchestrator,
        registry,
    }
}

/// A visible product payload in the remote's wire shape. `barcode: None`
/// leaves the barcode out entirely.
pub fn product_payload(
    remote_id: &str,
    code: &str,
    name: &str,
    barcode: Option<&str>,
    price: f64,
    stock: f64,
) -> Value {
    let mut payload = json!({
        "id": remote_id,
        "code": code,
        "name": name,
        "active": true,
        "prices": [{"currency_code": "COP", "price_list": [{"position": 1, "value": price}]}],
        "available_quantity": stock,
    });
    if let Some(barcode) = barcode {
        payload["barcode"] = json!(barcode);
    }
    payload
}

/// A product the remote hides from the public catalog: no price list at all.
pub fn hidden_product_payload(remote_id: &str, code: &str, name: &str) -> Value {
    json!({
        "id": remote_id,
        "code": code,
        "name": name,
        "active": true,
    })
}

pub fn customer_payload(remote_id: &str, identification: &str, name: &str) -> Value {
    json!({
        "id": remote_id,
        "identification": identification,
        "name": [name],
        "person_type": "Person",
        "id_type": {"code": "13", "name": "Cédula de ciudadanía"},
        "active": true,
    })
}

pub fn category_payload(remote_id: u64, name: &str) -> Value {
    json!({
        "id": remote_id,
        "name": name,
        "active": true,
    })
}
