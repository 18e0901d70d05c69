//! Sliding-window rate limiting keyed by caller identity and endpoint class.
//!
//! Two backends share one decision shape: an in-process sliding log for
//! single-instance deploys and tests, and a REST counter-store pipeline for
//! limits shared across replicas. A backend failure is reported as `None`
//! and callers admit the request, so a counter-store outage cannot take
//! checkout down with it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use url::Url;

use crate::config::CounterStoreConfig;

/// Length of the sliding window shared by every endpoint class, in
/// milliseconds. Signed because it divides unix-epoch timestamps.
const WINDOW_MS: i64 = 60_000;

/// The same window as a `Duration` for the in-process backend.
const WINDOW: Duration = Duration::from_millis(WINDOW_MS.unsigned_abs());

/// Endpoint classes with independent quotas.
///
/// A caller exhausting one class keeps full headroom in the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    /// Payment-intent creation (most abuse-sensitive)
    Payment,
    /// Sales chat, counted per message
    Chat,
    /// Everything else (form submissions, application intake)
    General,
}

impl EndpointClass {
    /// Requests admitted per identity per window.
    #[must_use]
    pub const fn quota(self) -> u32 {
        match self {
            Self::Payment => 5,
            Self::Chat => 100,
            Self::General => 60,
        }
    }

    /// Key segment for counter storage and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Payment => "payment",
            Self::Chat => "chat",
            Self::General => "general",
        }
    }
}

/// Outcome of a rate-limit probe, echoed to clients via response headers.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Quota for this endpoint class
    pub limit: u32,
    /// Requests left in the current window
    pub remaining: u32,
    /// When the window reopens
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Seconds until the window reopens, never less than one.
    #[must_use]
    pub fn retry_after_secs(&self) -> i64 {
        (self.reset_at - Utc::now()).num_seconds().max(1)
    }
}

/// Admission-rate limiter with a pluggable counting backend.
#[derive(Clone)]
pub struct RateLimiter {
    backend: Backend,
}

#[derive(Clone)]
enum Backend {
    Memory(Arc<MemoryCounters>),
    Rest(RestCounterStore),
}

impl RateLimiter {
    /// Create a limiter backed by the in-process sliding log.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Arc::new(MemoryCounters::default())),
        }
    }

    /// Create a limiter backed by a shared REST counter store.
    #[must_use]
    pub fn with_store(store: RestCounterStore) -> Self {
        Self {
            backend: Backend::Rest(store),
        }
    }

    /// Probe the limiter for one request.
    ///
    /// Returns `None` when the backend could not be reached; callers must
    /// treat that as an admission. The failure is logged here, where the
    /// error detail lives.
    pub async fn check(&self, identity: &str, class: EndpointClass) -> Option<RateLimitDecision> {
        match &self.backend {
            Backend::Memory(counters) => Some(counters.check(identity, class)),
            Backend::Rest(store) => match store.check(identity, class).await {
                Ok(decision) => Some(decision),
                Err(e) => {
                    tracing::warn!(
                        class = class.as_str(),
                        "Rate limit backend unavailable, admitting request: {e}"
                    );
                    None
                }
            },
        }
    }

    /// Drop identities whose every recorded hit has aged out.
    ///
    /// Only meaningful for the in-process backend; the REST store expires
    /// its own keys.
    pub fn prune_idle(&self) {
        if let Backend::Memory(counters) = &self.backend {
            counters.prune_idle();
        }
    }
}

// =============================================================================
// In-process backend
// =============================================================================

/// Sliding log of hit timestamps per (identity, class) pair.
#[derive(Default)]
struct MemoryCounters {
    hits: DashMap<(String, EndpointClass), Vec<Instant>>,
}

impl MemoryCounters {
    fn check(&self, identity: &str, class: EndpointClass) -> RateLimitDecision {
        let now = Instant::now();
        let limit = class.quota();

        let mut hits = self.hits.entry((identity.to_owned(), class)).or_default();
        hits.retain(|hit| now.duration_since(*hit) < WINDOW);

        // The window reopens when the oldest surviving hit ages out.
        let oldest = hits.first().copied().unwrap_or(now);
        let reopens_in = WINDOW.saturating_sub(now.duration_since(oldest));
        let reset_at = reset_from_now(reopens_in);

        let count = u32::try_from(hits.len()).unwrap_or(u32::MAX);
        if count >= limit {
            return RateLimitDecision {
                allowed: false,
                limit,
                remaining: 0,
                reset_at,
            };
        }

        hits.push(now);
        RateLimitDecision {
            allowed: true,
            limit,
            remaining: limit.saturating_sub(count.saturating_add(1)),
            reset_at,
        }
    }

    fn prune_idle(&self) {
        let now = Instant::now();
        self.hits.retain(|_, hits| {
            hits.retain(|hit| now.duration_since(*hit) < WINDOW);
            !hits.is_empty()
        });
    }
}

fn reset_from_now(reopens_in: Duration) -> DateTime<Utc> {
    let delta =
        chrono::Duration::from_std(reopens_in).unwrap_or_else(|_| chrono::Duration::seconds(60));
    Utc::now() + delta
}

// =============================================================================
// REST backend
// =============================================================================

/// Errors from the shared counter store.
#[derive(Debug, Error)]
pub enum CounterStoreError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Counter store API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse counter store response: {0}")]
    Parse(String),
}

/// Client for an Upstash-style Redis REST counter store.
#[derive(Clone)]
pub struct RestCounterStore {
    client: reqwest::Client,
    url: Url,
}

/// One entry of a pipeline response.
#[derive(Debug, Deserialize)]
struct PipelineResult {
    #[serde(default)]
    result: serde_json::Value,
}

impl RestCounterStore {
    /// Create a new counter store client.
    ///
    /// # Errors
    ///
    /// Returns an error if the bearer token cannot form a valid header or
    /// the HTTP client cannot be constructed.
    pub fn new(config: &CounterStoreConfig) -> Result<Self, CounterStoreError> {
        let mut headers = HeaderMap::new();
        let auth_value = format!("Bearer {}", config.token.expose_secret());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value)
                .map_err(|e| CounterStoreError::Parse(format!("Invalid token: {e}")))?,
        );

        // A slow store must not stall admission; time out fast and let the
        // caller fail open.
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }

    /// Run one sliding-window probe against the shared store.
    ///
    /// A single pipelined round trip reads the previous window's counter,
    /// increments the current one, and arms its expiry. The previous window
    /// is weighted by how much of it still overlaps the sliding window, so
    /// a burst straddling a boundary cannot double its quota.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable, answers non-2xx, or
    /// the pipeline response cannot be parsed.
    pub async fn check(
        &self,
        identity: &str,
        class: EndpointClass,
    ) -> Result<RateLimitDecision, CounterStoreError> {
        let limit = class.quota();
        let now_ms = Utc::now().timestamp_millis();
        let current_window = now_ms.div_euclid(WINDOW_MS);
        let elapsed_ms = now_ms.rem_euclid(WINDOW_MS);

        let current_key = counter_key(class, identity, current_window);
        let previous_key = counter_key(class, identity, current_window - 1);

        // GET before INCR keeps the response order fixed; PEXPIRE NX arms
        // the ttl only on the first hit of a window.
        let commands = json!([
            ["GET", previous_key.as_str()],
            ["INCR", current_key.as_str()],
            ["PEXPIRE", current_key.as_str(), WINDOW_MS * 2, "NX"],
        ]);

        let url = self
            .url
            .join("pipeline")
            .map_err(|e| CounterStoreError::Parse(e.to_string()))?;
        let response = self.client.post(url).json(&commands).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CounterStoreError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let results: Vec<PipelineResult> = response
            .json()
            .await
            .map_err(|e| CounterStoreError::Parse(e.to_string()))?;

        let previous = results.first().map_or(0, |r| as_count(&r.result));
        let current = results.get(1).map(|r| as_count(&r.result)).ok_or_else(|| {
            CounterStoreError::Parse("pipeline response missing INCR result".to_string())
        })?;

        let remaining_ms = WINDOW_MS - elapsed_ms;
        let carried = u64::from(previous) * u64::try_from(remaining_ms).unwrap_or(0)
            / WINDOW_MS.unsigned_abs();
        let used = u64::from(current).saturating_add(carried);

        let reset_at = DateTime::from_timestamp_millis((current_window + 1) * WINDOW_MS)
            .unwrap_or_else(Utc::now);

        Ok(RateLimitDecision {
            allowed: used <= u64::from(limit),
            limit,
            remaining: u32::try_from(u64::from(limit).saturating_sub(used)).unwrap_or(0),
            reset_at,
        })
    }
}

fn counter_key(class: EndpointClass, identity: &str, window_id: i64) -> String {
    format!("ratelimit:{}:{identity}:{window_id}", class.as_str())
}

/// Interpret a pipeline result as a counter value.
///
/// GET answers a string (or null for a missing key), INCR answers an
/// integer. Anything unreadable counts as zero rather than failing the
/// probe.
fn as_count(value: &serde_json::Value) -> u32 {
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(u32::MAX),
        serde_json::Value::String(s) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    #[test]
    fn test_quota_per_class() {
        assert_eq!(EndpointClass::Payment.quota(), 5);
        assert_eq!(EndpointClass::Chat.quota(), 100);
        assert_eq!(EndpointClass::General.quota(), 60);
    }

    #[test]
    fn test_memory_allows_within_limit() {
        let counters = MemoryCounters::default();
        for i in 0..5 {
            let decision = counters.check("10.0.0.1", EndpointClass::Payment);
            assert!(decision.allowed, "request {i} should be admitted");
            assert_eq!(decision.limit, 5);
        }
    }

    #[test]
    fn test_memory_blocks_over_limit() {
        let counters = MemoryCounters::default();
        for _ in 0..5 {
            assert!(counters.check("10.0.0.1", EndpointClass::Payment).allowed);
        }

        let decision = counters.check("10.0.0.1", EndpointClass::Payment);
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert!(decision.reset_at > Utc::now());
    }

    #[test]
    fn test_memory_remaining_counts_down() {
        let counters = MemoryCounters::default();
        assert_eq!(counters.check("10.0.0.1", EndpointClass::Payment).remaining, 4);
        assert_eq!(counters.check("10.0.0.1", EndpointClass::Payment).remaining, 3);
    }

    #[test]
    fn test_memory_identities_are_independent() {
        let counters = MemoryCounters::default();
        for _ in 0..5 {
            assert!(counters.check("10.0.0.1", EndpointClass::Payment).allowed);
        }

        assert!(!counters.check("10.0.0.1", EndpointClass::Payment).allowed);
        assert!(counters.check("10.0.0.2", EndpointClass::Payment).allowed);
    }

    #[test]
    fn test_memory_classes_are_independent() {
        let counters = MemoryCounters::default();
        for _ in 0..5 {
            assert!(counters.check("10.0.0.1", EndpointClass::Payment).allowed);
        }

        assert!(!counters.check("10.0.0.1", EndpointClass::Payment).allowed);
        assert!(counters.check("10.0.0.1", EndpointClass::Chat).allowed);
    }

    #[test]
    fn test_memory_rejection_is_not_recorded() {
        // A rejected request must not extend the window
        let counters = MemoryCounters::default();
        for _ in 0..7 {
            counters.check("10.0.0.1", EndpointClass::Payment);
        }

        let stored = counters
            .hits
            .get(&("10.0.0.1".to_string(), EndpointClass::Payment))
            .map(|hits| hits.len());
        assert_eq!(stored, Some(5));
    }

    #[test]
    fn test_memory_window_slides() {
        let counters = MemoryCounters::default();
        let stale = Instant::now()
            .checked_sub(WINDOW + Duration::from_secs(1))
            .expect("clock older than one window");
        counters.hits.insert(
            ("10.0.0.1".to_string(), EndpointClass::Payment),
            vec![stale; 5],
        );

        let decision = counters.check("10.0.0.1", EndpointClass::Payment);
        assert!(decision.allowed, "hits older than the window must age out");
        assert_eq!(decision.remaining, 4);
    }

    #[test]
    fn test_prune_idle() {
        let counters = MemoryCounters::default();
        let stale = Instant::now()
            .checked_sub(WINDOW + Duration::from_secs(1))
            .expect("clock older than one window");
        counters
            .hits
            .insert(("10.0.0.1".to_string(), EndpointClass::Payment), vec![stale]);
        counters.check("10.0.0.2", EndpointClass::Chat);

        counters.prune_idle();

        assert_eq!(counters.hits.len(), 1);
        assert!(
            counters
                .hits
                .contains_key(&("10.0.0.2".to_string(), EndpointClass::Chat))
        );
    }

    #[test]
    fn test_retry_after_is_at_least_one_second() {
        let decision = RateLimitDecision {
            allowed: false,
            limit: 5,
            remaining: 0,
            reset_at: Utc::now(),
        };
        assert_eq!(decision.retry_after_secs(), 1);
    }

    #[test]
    fn test_pipeline_count_parsing() {
        assert_eq!(as_count(&serde_json::Value::Null), 0);
        assert_eq!(as_count(&json!("17")), 17);
        assert_eq!(as_count(&json!(4)), 4);
        assert_eq!(as_count(&json!("not-a-number")), 0);
    }

    #[test]
    fn test_counter_key_shape() {
        let key = counter_key(EndpointClass::Payment, "203.0.113.9", 28_993_001);
        assert_eq!(key, "ratelimit:payment:203.0.113.9:28993001");
    }

    #[test]
    fn test_rest_store_new() {
        let config = CounterStoreConfig {
            url: Url::parse("https://usw1-upright-firefly-12345.upstash.io").unwrap(),
            token: SecretString::from("AXq3ACQgY2FlNzg5ZmQtOTk3Yi00"),
        };
        assert!(RestCounterStore::new(&config).is_ok());
    }

    #[tokio::test]
    async fn test_limiter_fails_open_when_store_unreachable() {
        // Nothing listens on port 1, so every check errors out
        let config = CounterStoreConfig {
            url: Url::parse("http://127.0.0.1:1").unwrap(),
            token: SecretString::from("AXq3ACQgY2FlNzg5ZmQtOTk3Yi00"),
        };
        let limiter = RateLimiter::with_store(RestCounterStore::new(&config).unwrap());

        let decision = limiter.check("9.9.9.9", EndpointClass::Payment).await;

        assert!(decision.is_none(), "a store outage must not reject traffic");
    }

    #[tokio::test]
    async fn test_limiter_facade_memory_backend() {
        let limiter = RateLimiter::in_memory();

        let decision = limiter.check("10.0.0.1", EndpointClass::Chat).await;
        let decision = decision.expect("in-process backend always decides");
        assert!(decision.allowed);
        assert_eq!(decision.limit, 100);
        assert_eq!(decision.remaining, 99);
    }
}
