//! Rate-limited, retrying, caching client for the public map-data service.
//!
//! A fetch walks a small state machine:
//!
//! ```text
//! cache fresh? ── yes ─▶ CacheHit
//!      │ no
//!      ▼
//! Attempt(1) ─ok─▶ Fresh (raw cache rewritten)
//!      │ err
//!      ▼
//! Backoff(1200ms) ─▶ Attempt(2) ─ ... ─▶ GiveUp ─▶ Stale | Empty
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::clock::Clock;
use crate::error::{SyncError, SyncResult};
use crate::fetch::{self, HttpClient};
use crate::overpass::OverpassPayload;

/// Retry and pacing knobs for one upstream family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Wait after failed attempt `n` is `n × backoff_step`.
    pub backoff_step: StdDuration,
    /// Minimum spacing between two outbound requests.
    pub min_interval: StdDuration,
    pub cache_ttl: Duration,
}

impl RetryPolicy {
    /// Centre-wide pack builds.
    pub fn centre_build() -> Self {
        Self {
            max_attempts: 3,
            backoff_step: StdDuration::from_millis(1200),
            min_interval: StdDuration::from_millis(1000),
            cache_ttl: Duration::hours(24),
        }
    }

    /// Route-scoped lookups made while a session is running.
    pub fn route_query() -> Self {
        Self {
            max_attempts: 3,
            backoff_step: StdDuration::from_millis(1200),
            min_interval: StdDuration::from_millis(600),
            cache_ttl: Duration::minutes(10),
        }
    }

    /// Where to go after attempt `attempt` failed.
    pub fn after_failure(&self, attempt: u32) -> RetryStep {
        if attempt >= self.max_attempts {
            RetryStep::GiveUp
        } else {
            RetryStep::Backoff {
                next_attempt: attempt + 1,
                wait: self.backoff_step * attempt,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    Attempt(u32),
    Backoff { next_attempt: u32, wait: StdDuration },
    GiveUp,
}

/// How a fetch was satisfied.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Fresh(OverpassPayload),
    CacheHit(OverpassPayload),
    /// Every attempt failed; the expired raw cache was served instead.
    Stale(OverpassPayload),
    /// Every attempt failed and nothing was cached.
    Empty,
}

impl FetchOutcome {
    /// Terminal state once attempts are exhausted.
    pub fn settle(stale: Option<OverpassPayload>) -> Self {
        match stale {
            Some(payload) => FetchOutcome::Stale(payload),
            None => FetchOutcome::Empty,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FetchOutcome::Fresh(_) => "fresh",
            FetchOutcome::CacheHit(_) => "cache_hit",
            FetchOutcome::Stale(_) => "stale",
            FetchOutcome::Empty => "empty",
        }
    }

    pub fn into_payload(self) -> OverpassPayload {
        match self {
            FetchOutcome::Fresh(p) | FetchOutcome::CacheHit(p) | FetchOutcome::Stale(p) => p,
            FetchOutcome::Empty => OverpassPayload::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCacheEntry {
    fetched_at_ms: i64,
    payload: OverpassPayload,
}

pub struct UpstreamFetcher<C> {
    client: C,
    endpoint: String,
    cache_dir: PathBuf,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    last_request: Mutex<Option<Instant>>,
}

impl<C: HttpClient> UpstreamFetcher<C> {
    pub fn new(
        client: C,
        endpoint: impl Into<String>,
        cache_dir: impl Into<PathBuf>,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            cache_dir: cache_dir.into(),
            policy,
            clock,
            last_request: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn cache_path(&self, cache_key: &str) -> PathBuf {
        let digest = Sha256::digest(cache_key.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        self.cache_dir.join(format!("{hex}.json"))
    }

    fn read_cache(path: &Path) -> Option<RawCacheEntry> {
        let text = fs::read_to_string(path).ok()?;
        serde_json::from_str(&text).ok()
    }

    fn write_cache(&self, path: &Path, payload: &OverpassPayload) -> SyncResult<()> {
        fs::create_dir_all(&self.cache_dir)?;
        let entry = RawCacheEntry {
            fetched_at_ms: self.clock.now_ms(),
            payload: payload.clone(),
        };
        fs::write(path, serde_json::to_vec(&entry)?)?;
        Ok(())
    }

    /// Serializes outbound calls so consecutive requests are at least
    /// `min_interval` apart.
    async fn wait_for_slot(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.policy.min_interval {
                tokio::time::sleep(self.policy.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn request(&self, query: &str) -> SyncResult<OverpassPayload> {
        let req = fetch::post_form(&self.endpoint, &[("data", query)])?;
        let body = fetch::fetch_text(&self.client, req).await?;
        OverpassPayload::parse(&body).map_err(|e| SyncError::MalformedPayload(e.to_string()))
    }

    /// Resolves `query`, never failing: exhausted retries degrade to the
    /// last cached payload or to an empty one.
    #[instrument(skip(self, query), fields(cache_key = %cache_key))]
    pub async fn fetch(&self, cache_key: &str, query: &str) -> FetchOutcome {
        let path = self.cache_path(cache_key);
        let cached = Self::read_cache(&path);
        if let Some(entry) = &cached {
            let age_ms = self.clock.now_ms() - entry.fetched_at_ms;
            if age_ms < self.policy.cache_ttl.num_milliseconds() {
                debug!(age_ms, "Upstream cache hit");
                return FetchOutcome::CacheHit(entry.payload.clone());
            }
        }

        let mut step = RetryStep::Attempt(1);
        let mut last_error: Option<SyncError> = None;
        loop {
            match step {
                RetryStep::Attempt(attempt) => {
                    self.wait_for_slot().await;
                    match self.request(query).await {
                        Ok(payload) => {
                            if let Err(e) = self.write_cache(&path, &payload) {
                                warn!(error = %e, "Failed to write upstream cache");
                            }
                            debug!(attempt, elements = payload.elements.len(), "Upstream fetched");
                            return FetchOutcome::Fresh(payload);
                        }
                        Err(e) => {
                            debug!(attempt, error = %e, "Upstream attempt failed");
                            last_error = Some(e);
                            step = self.policy.after_failure(attempt);
                        }
                    }
                }
                RetryStep::Backoff { next_attempt, wait } => {
                    tokio::time::sleep(wait).await;
                    step = RetryStep::Attempt(next_attempt);
                }
                RetryStep::GiveUp => break,
            }
        }

        let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
        let outcome = FetchOutcome::settle(cached.map(|entry| entry.payload));
        match &outcome {
            FetchOutcome::Stale(_) => {
                warn!(error = %reason, "Using stale upstream cache")
            }
            _ => warn!(error = %reason, "Upstream unavailable; continuing with empty payload"),
        }
        outcome
    }
}
