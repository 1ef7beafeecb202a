//! Fetcher abstraction between the sync loop and the remote API.
//!
//! The orchestrator only ever talks to this trait. The production
//! implementation (`CatalogApiClient`) adds authentication, rate limiting
//! and retries behind it; tests substitute scripted fakes.

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::{CatalogPage, EntityKind, PageCursor, RemoteRecord};

/// Errors surfaced by a fetcher. Retryable failures are retried internally;
/// what escapes here is either terminal or already past its retry budget.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The remote throttled us (HTTP 429). Carries the server-proposed
    /// wait when a `Retry-After` header was present.
    #[error("remote API throttled the request")]
    RateLimited { retry_after: Option<Duration> },

    /// Authentication was rejected or the token could not be obtained.
    #[error("remote API authentication failed: {reason}")]
    Auth { reason: String },

    /// Non-success HTTP status outside the throttling/auth cases.
    #[error("remote API returned HTTP {status}")]
    Status { status: u16 },

    /// Connection, DNS or timeout failure before any HTTP status arrived.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The response arrived but its body was not the expected shape.
    #[error("malformed response payload: {0}")]
    Decode(String),

    /// The retry budget ran out; `last` is the final underlying error.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<FetchError> },
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::RateLimited { .. } | FetchError::Transport(_) => true,
            FetchError::Status { status } => *status >= 500,
            FetchError::Auth { .. }
            | FetchError::Decode(_)
            | FetchError::RetriesExhausted { .. } => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::Status { status: 404 })
    }

    /// Server-proposed minimum wait, if this failure carried one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Read access to one remote catalog, one page or one record at a time.
#[async_trait]
pub trait CatalogFetcher: Send + Sync {
    /// Fetches the page addressed by `cursor`. The returned page carries the
    /// cursor for the next page, or `None` on the last one.
    async fn fetch_page(
        &self,
        kind: EntityKind,
        cursor: PageCursor,
    ) -> Result<CatalogPage, FetchError>;

    /// Fetches a single record by remote id. `Ok(None)` means the remote
    /// answered authoritatively that no such record exists.
    async fn fetch_one(
        &self,
        kind: EntityKind,
        remote_id: &str,
    ) -> Result<Option<RemoteRecord>, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_the_error_class() {
        assert!(FetchError::RateLimited { retry_after: None }.is_retryable());
        assert!(FetchError::Transport("connection reset".into()).is_retryable());
        assert!(FetchError::Status { status: 503 }.is_retryable());
        assert!(!FetchError::Status { status: 404 }.is_retryable());
        assert!(!FetchError::Auth { reason: "bad key".into() }.is_retryable());
        assert!(!FetchError::Decode("missing results".into()).is_retryable());
    }

    #[test]
    fn exhausted_retries_keep_the_last_cause_visible() {
        let err = FetchError::RetriesExhausted {
            attempts: 4,
            last: Box::new(FetchError::Status { status: 502 }),
        };
        assert!(!err.is_retryable());
        let text = err.to_string();
        assert!(text.contains("4 attempts"));
        assert!(text.contains("502"));
    }
}
