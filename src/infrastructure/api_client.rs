//! Authenticated, rate-limited client for the remote catalog API.
//!
//! Wraps reqwest with the three concerns every remote call needs: a cached
//! bearer token (refreshed on expiry and once on a 401), a process-wide
//! request-rate cap, and retry with backoff for transient failures. The
//! sync engine sees none of this; it talks to [`CatalogFetcher`].

use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter, state::{direct::NotKeyed, InMemoryState}, clock::DefaultClock};
use reqwest::{Client, StatusCode, header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, RETRY_AFTER}};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{CatalogPage, EntityKind, PageCursor, RemoteRecord};
use crate::infrastructure::config::RemoteApiConfig;
use crate::sync_engine::fetcher::{CatalogFetcher, FetchError};
use crate::sync_engine::retry::RetryPolicy;

/// Fallback token lifetime when the auth response omits `expires_in`.
const DEFAULT_TOKEN_TTL_SECS: u64 = 86_400;

/// Tokens are refreshed this long before their nominal expiry.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct Pagination {
    #[serde(default)]
    total_results: Option<u64>,
    #[serde(default)]
    total_pages: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PageEnvelope {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

pub struct CatalogApiClient {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    retry: RetryPolicy,
    base_url: String,
    config: RemoteApiConfig,
    token: Mutex<Option<CachedToken>>,
}

impl CatalogApiClient {
    pub fn new(config: RemoteApiConfig, retry: RetryPolicy) -> Result<Self> {
        let base_url = normalize_base_url(&config.base_url);
        url::Url::parse(&base_url)
            .with_context(|| format!("Invalid remote API base url: {base_url}"))?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static("partner-id"),
            HeaderValue::from_str(&config.partner_id).context("Invalid partner id")?,
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second)
                .context("Rate limit must be greater than 0")?,
        );
        let rate_limiter = RateLimiter::direct(quota);

        Ok(Self {
            client,
            rate_limiter,
            retry,
            base_url,
            config,
            token: Mutex::new(None),
        })
    }

    /// Returns a valid bearer token, authenticating when the cache is empty,
    /// expired, or a refresh was forced by a 401.
    async fn bearer_token(&self, force_refresh: bool) -> Result<String, FetchError> {
        let mut cached = self.token.lock().await;
        if !force_refresh {
            if let Some(token) = cached.as_ref() {
                if token.expires_at > Utc::now() {
                    return Ok(token.value.clone());
                }
            }
        }

        self.rate_limiter.until_ready().await;
        info!("🔐 Authenticating against {}", self.base_url);
        let response = self
            .client
            .post(format!("{}/auth", self.base_url))
            .json(&serde_json::json!({
                "username": self.config.username,
                "access_key": self.config.access_key,
            }))
            .send()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::Auth {
                reason: format!("credentials rejected with HTTP {}", status.as_u16()),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let auth: AuthResponse = response
            .json()
            .await
            .map_err(|err| FetchError::Decode(format!("auth response: {err}")))?;
        let ttl = auth.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS);
        let expires_at = Utc::now()
            + chrono::Duration::seconds((ttl as i64 - TOKEN_EXPIRY_MARGIN_SECS).max(0));
        *cached = Some(CachedToken {
            value: auth.access_token.clone(),
            expires_at,
        });
        debug!("🔑 Token cached until {expires_at}");
        Ok(auth.access_token)
    }

    /// One authenticated GET with the full retry budget applied.
    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, FetchError> {
        let mut attempt: u32 = 1;
        let mut force_refresh = false;

        loop {
            self.rate_limiter.until_ready().await;
            let token = self.bearer_token(force_refresh).await?;
            force_refresh = false;

            debug!("GET {url} (attempt {attempt})");
            let err = match self
                .client
                .get(url)
                .query(query)
                .bearer_auth(&token)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        match response.json::<Value>().await {
                            Ok(value) => return Ok(value),
                            Err(err) => FetchError::Decode(err.to_string()),
                        }
                    } else if status == StatusCode::TOO_MANY_REQUESTS {
                        FetchError::RateLimited {
                            retry_after: retry_after_hint(response.headers()),
                        }
                    } else if status == StatusCode::UNAUTHORIZED {
                        // Token went stale server-side; re-authenticate and
                        // spend one attempt on it.
                        force_refresh = true;
                        FetchError::Auth {
                            reason: "bearer token rejected".into(),
                        }
                    } else {
                        FetchError::Status {
                            status: status.as_u16(),
                        }
                    }
                }
                Err(err) => FetchError::Transport(err.to_string()),
            };

            let may_retry = err.is_retryable() || force_refresh;
            if may_retry && self.retry.has_attempts_left(attempt) {
                let delay = self.retry.delay_for(attempt, err.retry_after());
                warn!("🔄 {url} attempt {attempt} failed ({err}); next try in {delay:?}");
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
                continue;
            }
            if may_retry {
                return Err(FetchError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }
            return Err(err);
        }
    }
}

#[async_trait]
impl CatalogFetcher for CatalogApiClient {
    async fn fetch_page(
        &self,
        kind: EntityKind,
        cursor: PageCursor,
    ) -> Result<CatalogPage, FetchError> {
        let url = format!("{}/v1/{}", self.base_url, kind.collection());
        let query = [
            ("page", cursor.page().to_string()),
            ("page_size", cursor.page_size().to_string()),
        ];

        let body = self.get_json(&url, &query).await?;
        let envelope: PageEnvelope = serde_json::from_value(body)
            .map_err(|err| FetchError::Decode(format!("{} page envelope: {err}", kind)))?;

        let records: Vec<RemoteRecord> =
            envelope.results.into_iter().map(RemoteRecord::new).collect();
        let total_results = envelope
            .pagination
            .as_ref()
            .and_then(|p| p.total_results);
        let next = next_cursor(&cursor, records.len(), envelope.pagination.as_ref());

        debug!(
            "📄 {kind} {cursor}: {} records, next={:?}",
            records.len(),
            next.as_ref().map(PageCursor::page)
        );
        Ok(CatalogPage {
            records,
            next,
            total_results,
        })
    }

    async fn fetch_one(
        &self,
        kind: EntityKind,
        remote_id: &str,
    ) -> Result<Option<RemoteRecord>, FetchError> {
        let url = format!("{}/v1/{}/{}", self.base_url, kind.collection(), remote_id);
        match self.get_json(&url, &[]).await {
            Ok(value) => Ok(Some(RemoteRecord::new(value))),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Trailing slashes and a trailing `/v1` are stripped so configured urls
/// like `https://api.example.com/v1/` and `https://api.example.com` behave
/// the same.
fn normalize_base_url(raw: &str) -> String {
    let mut base = raw.trim().trim_end_matches('/').to_owned();
    if base.to_ascii_lowercase().ends_with("/v1") {
        base.truncate(base.len() - 3);
    }
    base.trim_end_matches('/').to_owned()
}

/// Next-page decision: trust the remote's page count when present, fall
/// back to total-results arithmetic, and as a last resort treat a full page
/// as "probably more".
fn next_cursor(
    cursor: &PageCursor,
    record_count: usize,
    pagination: Option<&Pagination>,
) -> Option<PageCursor> {
    if record_count == 0 {
        return None;
    }
    let total_pages = pagination.and_then(|p| {
        p.total_pages.or_else(|| {
            p.total_results
                .map(|total| total.div_ceil(u64::from(cursor.page_size()).max(1)))
        })
    });
    match total_pages {
        Some(pages) => (u64::from(cursor.page()) < pages).then(|| cursor.advance()),
        None => (record_count as u64 >= u64::from(cursor.page_size())).then(|| cursor.advance()),
    }
}

fn retry_after_hint(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
