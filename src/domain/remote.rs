//! Raw remote payloads and pagination primitives.
//!
//! Records arrive from the remote API as loosely structured JSON. We keep the
//! payload opaque at this layer; the normalizer is the only place that knows
//! which fields matter for which entity kind.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single record exactly as the remote API returned it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteRecord(Value);

impl RemoteRecord {
    pub fn new(payload: Value) -> Self {
        Self(payload)
    }

    pub fn payload(&self) -> &Value {
        &self.0
    }

    /// Remote identifier, stringified. Some collections use UUID strings,
    /// others numeric ids; both map to a non-empty string here.
    pub fn remote_id(&self) -> Option<String> {
        match self.0.get("id") {
            Some(Value::String(s)) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_owned())
            }
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    /// String field at a nested object path, trimmed, `None` when absent,
    /// non-string, or blank.
    pub fn str_at(&self, path: &[&str]) -> Option<String> {
        let mut node = &self.0;
        for key in path {
            node = node.get(key)?;
        }
        match node {
            Value::String(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_owned())
            }
            _ => None,
        }
    }

    pub fn bool_at(&self, path: &[&str]) -> Option<bool> {
        let mut node = &self.0;
        for key in path {
            node = node.get(key)?;
        }
        node.as_bool()
    }

    pub fn f64_at(&self, path: &[&str]) -> Option<f64> {
        let mut node = &self.0;
        for key in path {
            node = node.get(key)?;
        }
        node.as_f64()
    }
}

impl From<Value> for RemoteRecord {
    fn from(payload: Value) -> Self {
        Self::new(payload)
    }
}

/// Opaque position within a paginated collection. Produced by the fetcher,
/// threaded back unchanged by the sync loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    page: u32,
    page_size: u32,
}

impl PageCursor {
    pub fn start(page_size: u32) -> Self {
        Self { page: 1, page_size }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn advance(&self) -> Self {
        Self {
            page: self.page + 1,
            page_size: self.page_size,
        }
    }
}

impl std::fmt::Display for PageCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "page {}", self.page)
    }
}

/// One fetched page plus the cursor for the next one, if any.
#[derive(Debug, Clone)]
pub struct CatalogPage {
    pub records: Vec<RemoteRecord>,
    pub next: Option<PageCursor>,
    pub total_results: Option<u64>,
}

impl CatalogPage {
    pub fn empty() -> Self {
        Self {
            records: Vec::new(),
            next: None,
            total_results: Some(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
