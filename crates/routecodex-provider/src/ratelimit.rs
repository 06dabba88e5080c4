//! Per `(providerKey, model)` 429 cooldown buckets.
//!
//! Buckets are process-local. Each bucket sits behind its own async mutex
//! so `should_throttle` + `record_429` are linearizable per key without a
//! global lock across suspension points.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::headers::{Headers, header_get};

/// Escalation schedule for consecutive 429s; clamped at the last step.
pub const DEFAULT_SCHEDULE: [Duration; 3] = [
    Duration::from_secs(10),
    Duration::from_secs(30),
    Duration::from_secs(60),
];

#[derive(Debug, Default)]
struct Bucket {
    consecutive_429: u32,
    last_429_at: Option<Instant>,
    cooldown_until: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleDecision {
    pub blocked: bool,
    pub wait: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownApplied {
    pub cooldown: Duration,
    pub consecutive: u32,
}

/// Synthetic pre-flight 429 raised when a bucket is cooling down.
#[derive(Debug, Clone)]
pub struct RateLimitCooldownError {
    pub status: u16,
    pub retryable: bool,
    pub retry_after_ms: u64,
    pub bucket: String,
}

impl std::fmt::Display for RateLimitCooldownError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rate limit cooldown active for {} ({} ms remaining)",
            self.bucket, self.retry_after_ms
        )
    }
}

impl std::error::Error for RateLimitCooldownError {}

pub struct RateLimitManager {
    buckets: Mutex<HashMap<String, Arc<Mutex<Bucket>>>>,
    schedule: Vec<Duration>,
}

impl Default for RateLimitManager {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEDULE.to_vec())
    }
}

impl RateLimitManager {
    pub fn new(schedule: Vec<Duration>) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            schedule,
        }
    }

    pub fn bucket_key(provider_key: Option<&str>, model: Option<&str>) -> String {
        let provider = provider_key.filter(|key| !key.is_empty()).unwrap_or("default");
        let model = model.filter(|model| !model.is_empty()).unwrap_or("default");
        format!("{provider}::{}", model.to_ascii_lowercase())
    }

    async fn bucket(&self, key: &str) -> Arc<Mutex<Bucket>> {
        let mut buckets = self.buckets.lock().await;
        buckets
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Bucket::default())))
            .clone()
    }

    /// Check the bucket; expired cooldowns are cleared on the way.
    pub async fn should_throttle(
        &self,
        provider_key: Option<&str>,
        model: Option<&str>,
    ) -> ThrottleDecision {
        let key = Self::bucket_key(provider_key, model);
        let bucket = self.bucket(&key).await;
        let mut guard = bucket.lock().await;
        let Some(until) = guard.cooldown_until else {
            return ThrottleDecision {
                blocked: false,
                wait: None,
            };
        };
        let now = Instant::now();
        if until <= now {
            guard.cooldown_until = None;
            guard.consecutive_429 = 0;
            return ThrottleDecision {
                blocked: false,
                wait: None,
            };
        }
        ThrottleDecision {
            blocked: true,
            wait: Some(until - now),
        }
    }

    /// Record one upstream 429. An upstream `Retry-After` hint overrides
    /// the schedule step for this epoch.
    pub async fn record_429(
        &self,
        provider_key: Option<&str>,
        model: Option<&str>,
        retry_after: Option<Duration>,
    ) -> CooldownApplied {
        let key = Self::bucket_key(provider_key, model);
        let bucket = self.bucket(&key).await;
        let mut guard = bucket.lock().await;
        guard.consecutive_429 = guard.consecutive_429.saturating_add(1);
        let step = (guard.consecutive_429 as usize - 1).min(self.schedule.len() - 1);
        let cooldown = retry_after.unwrap_or(self.schedule[step]);
        let now = Instant::now();
        guard.last_429_at = Some(now);
        guard.cooldown_until = Some(now + cooldown);
        debug!(
            event = "ratelimit.429",
            bucket = %key,
            consecutive = guard.consecutive_429,
            cooldown_ms = cooldown.as_millis() as u64
        );
        CooldownApplied {
            cooldown,
            consecutive: guard.consecutive_429,
        }
    }

    /// Any successful non-429 response clears the bucket.
    pub async fn reset(&self, provider_key: Option<&str>, model: Option<&str>) {
        let key = Self::bucket_key(provider_key, model);
        let bucket = self.bucket(&key).await;
        let mut guard = bucket.lock().await;
        guard.consecutive_429 = 0;
        guard.last_429_at = None;
        guard.cooldown_until = None;
    }

    pub fn build_throttle_error(
        provider_key: Option<&str>,
        model: Option<&str>,
        decision: &ThrottleDecision,
    ) -> RateLimitCooldownError {
        RateLimitCooldownError {
            status: 429,
            retryable: true,
            retry_after_ms: decision.wait.map(|wait| wait.as_millis() as u64).unwrap_or(0),
            bucket: Self::bucket_key(provider_key, model),
        }
    }
}

impl RateLimitCooldownError {
    pub fn details(&self) -> Value {
        serde_json::json!({"retryAfterMs": self.retry_after_ms, "bucket": self.bucket})
    }
}

/// `Retry-After` accepts integer seconds or an HTTP-date.
pub fn parse_retry_after(headers: &Headers) -> Option<Duration> {
    let value = header_get(headers, "retry-after")?.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = httpdate::parse_http_date(value).ok()?;
    when.duration_since(std::time::SystemTime::now()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_key_lowercases_and_defaults() {
        assert_eq!(
            RateLimitManager::bucket_key(Some("qwen.a"), Some("Qwen-Max")),
            "qwen.a::qwen-max"
        );
        assert_eq!(RateLimitManager::bucket_key(None, None), "default::default");
        assert_eq!(
            RateLimitManager::bucket_key(Some("p"), Some("")),
            "p::default"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_escalates_and_clamps() {
        let manager = RateLimitManager::default();
        let key = Some("p");
        let model = Some("m");

        let first = manager.record_429(key, model, None).await;
        assert_eq!(first.cooldown, Duration::from_secs(10));
        assert_eq!(first.consecutive, 1);

        let second = manager.record_429(key, model, None).await;
        assert_eq!(second.cooldown, Duration::from_secs(30));

        let third = manager.record_429(key, model, None).await;
        assert_eq!(third.cooldown, Duration::from_secs(60));

        let fourth = manager.record_429(key, model, None).await;
        assert_eq!(fourth.cooldown, Duration::from_secs(60), "clamped at cap");
        assert_eq!(fourth.consecutive, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_blocks_then_expires() {
        let manager = RateLimitManager::default();
        manager.record_429(Some("p"), Some("m"), None).await;

        let decision = manager.should_throttle(Some("p"), Some("m")).await;
        assert!(decision.blocked);
        assert!(decision.wait.unwrap() <= Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(11)).await;
        let decision = manager.should_throttle(Some("p"), Some("m")).await;
        assert!(!decision.blocked);

        // Expiry cleared the epoch: the next 429 starts at the first step.
        let applied = manager.record_429(Some("p"), Some("m"), None).await;
        assert_eq!(applied.consecutive, 1);
        assert_eq!(applied.cooldown, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_overrides_schedule() {
        let manager = RateLimitManager::default();
        let applied = manager
            .record_429(Some("p"), Some("m"), Some(Duration::from_secs(42)))
            .await;
        assert_eq!(applied.cooldown, Duration::from_secs(42));
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_the_bucket() {
        let manager = RateLimitManager::default();
        manager.record_429(Some("p"), Some("m"), None).await;
        manager.reset(Some("p"), Some("m")).await;
        let decision = manager.should_throttle(Some("p"), Some("m")).await;
        assert!(!decision.blocked);

        // Sibling buckets are untouched by a reset.
        manager.record_429(Some("p"), Some("other"), None).await;
        manager.reset(Some("p"), Some("m")).await;
        assert!(manager.should_throttle(Some("p"), Some("other")).await.blocked);
    }

    #[test]
    fn retry_after_parses_seconds() {
        let headers: Headers = vec![("Retry-After".to_string(), "10".to_string())];
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(10)));
        let empty: Headers = Vec::new();
        assert_eq!(parse_retry_after(&empty), None);
    }

    #[test]
    fn throttle_error_carries_retry_after_ms() {
        let decision = ThrottleDecision {
            blocked: true,
            wait: Some(Duration::from_millis(1500)),
        };
        let err = RateLimitManager::build_throttle_error(Some("p"), Some("m"), &decision);
        assert_eq!(err.status, 429);
        assert!(err.retryable);
        assert_eq!(err.retry_after_ms, 1500);
        assert_eq!(err.details()["retryAfterMs"], 1500);
    }
}
