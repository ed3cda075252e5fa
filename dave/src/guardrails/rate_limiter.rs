//! Tiered sliding-window rate limiting.
//!
//! Each caller is identified by user id, else IP address, else a shared anonymous key. Requests
//! are kept as `(timestamp, tokens)` pairs and counted over a 60 second and a 24 hour window.
//! State is process-local, so limits are not shared between replicas.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;
use utoipa::ToSchema;

use super::{GuardrailResult, Severity};
use crate::config::RateLimitConfig;

const MINUTE_WINDOW: Duration = Duration::from_secs(60);
const DAY_WINDOW: Duration = Duration::from_secs(86_400);

const MINUTE_LIMIT_MESSAGE: &str =
    "You've sent several messages quickly. Please wait a moment before your next message. I'm still here to help!";
const DAY_LIMIT_MESSAGE: &str = "You've reached your daily message limit. Please come back tomorrow, or consider upgrading for more conversations. I look forward to helping you more!";
const TOKEN_LIMIT_MESSAGE: &str = "I've been doing a lot of thinking for you! Let's take a brief pause. Try again in a minute.";

/// Caller tier, which selects the rate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Basic,
    Premium,
    Admin,
}

impl Tier {
    /// Parse a tier name; anything unrecognised is treated as `free`.
    pub fn parse_or_free(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "basic" => Tier::Basic,
            "premium" => Tier::Premium,
            "admin" => Tier::Admin,
            _ => Tier::Free,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Basic => "basic",
            Tier::Premium => "premium",
            Tier::Admin => "admin",
        }
    }

    pub fn limits(&self) -> TierLimits {
        match self {
            Tier::Free => TierLimits {
                requests_per_minute: 5,
                requests_per_day: 100,
                tokens_per_minute: 1_000,
                tokens_per_day: 10_000,
            },
            Tier::Basic => TierLimits {
                requests_per_minute: 15,
                requests_per_day: 500,
                tokens_per_minute: 5_000,
                tokens_per_day: 50_000,
            },
            Tier::Premium => TierLimits {
                requests_per_minute: 30,
                requests_per_day: 2_000,
                tokens_per_minute: 15_000,
                tokens_per_day: 150_000,
            },
            Tier::Admin => TierLimits {
                requests_per_minute: 100,
                requests_per_day: 10_000,
                tokens_per_minute: 50_000,
                tokens_per_day: 500_000,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    pub requests_per_minute: u64,
    pub requests_per_day: u64,
    pub tokens_per_minute: u64,
    pub tokens_per_day: u64,
}

/// Current usage for a caller, as reported by [`RateLimiter::get_usage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Usage {
    pub requests_minute: u64,
    pub requests_minute_limit: u64,
    pub requests_day: u64,
    pub requests_day_limit: u64,
    pub tokens_minute: u64,
    pub tokens_minute_limit: u64,
    /// Whether limits are shared across replicas. Always false for the in-memory store.
    pub distributed: bool,
}

struct WindowState {
    requests: HashMap<String, Vec<(Instant, u64)>>,
    last_cleanup: Instant,
}

pub struct RateLimiter {
    enabled: bool,
    cleanup_interval: Duration,
    state: Mutex<WindowState>,
}

/// Rate limit key for a caller.
pub fn rate_limit_key(user_id: Option<&str>, ip_address: Option<&str>) -> String {
    match (user_id, ip_address) {
        (Some(user_id), _) if !user_id.is_empty() => format!("ratelimit:user:{user_id}"),
        (_, Some(ip)) if !ip.is_empty() => format!("ratelimit:ip:{ip}"),
        _ => "ratelimit:anonymous".to_string(),
    }
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            cleanup_interval: config.cleanup_interval,
            state: Mutex::new(WindowState {
                requests: HashMap::new(),
                last_cleanup: Instant::now(),
            }),
        }
    }

    pub fn is_distributed(&self) -> bool {
        false
    }

    /// Drop entries older than a day and forget keys with nothing left, at most once per
    /// cleanup interval.
    fn cleanup_stale_entries(&self, now: Instant) {
        let mut state = self.state.lock();
        if now.duration_since(state.last_cleanup) < self.cleanup_interval {
            return;
        }

        let before = state.requests.len();
        state.requests.retain(|_, entries| {
            entries.retain(|(ts, _)| now.duration_since(*ts) < DAY_WINDOW);
            !entries.is_empty()
        });
        state.last_cleanup = now;

        let removed = before - state.requests.len();
        if removed > 0 {
            debug!("Cleaned up {} stale rate limit entries", removed);
        }
    }

    /// Returns `(requests, tokens)` within `window` for `key`, pruning older entries.
    fn window_totals(&self, key: &str, window: Duration, now: Instant) -> (u64, u64) {
        let mut state = self.state.lock();
        let Some(entries) = state.requests.get_mut(key) else {
            return (0, 0);
        };
        // Entries older than the day window are never needed again
        entries.retain(|(ts, _)| now.duration_since(*ts) < DAY_WINDOW);

        entries
            .iter()
            .filter(|(ts, _)| now.duration_since(*ts) < window)
            .fold((0, 0), |(count, tokens), (_, t)| (count + 1, tokens + t))
    }

    /// Check whether a caller may make another request.
    pub fn check(&self, user_id: Option<&str>, ip_address: Option<&str>, tier: Tier) -> GuardrailResult {
        if !self.enabled {
            return GuardrailResult::allow();
        }

        let now = Instant::now();
        self.cleanup_stale_entries(now);

        let key = rate_limit_key(user_id, ip_address);
        let limits = tier.limits();

        let (requests_minute, tokens_minute) = self.window_totals(&key, MINUTE_WINDOW, now);
        if requests_minute >= limits.requests_per_minute {
            return GuardrailResult::block("rate_limit_minute", MINUTE_LIMIT_MESSAGE, Severity::Low);
        }

        let (requests_day, _) = self.window_totals(&key, DAY_WINDOW, now);
        if requests_day >= limits.requests_per_day {
            return GuardrailResult::block("rate_limit_day", DAY_LIMIT_MESSAGE, Severity::Medium);
        }

        if tokens_minute >= limits.tokens_per_minute {
            return GuardrailResult::block("token_limit_minute", TOKEN_LIMIT_MESSAGE, Severity::Low);
        }

        GuardrailResult::allow()
    }

    /// Record a request and the tokens it consumed.
    pub fn record_request(&self, user_id: Option<&str>, ip_address: Option<&str>, tokens_used: u64) {
        let key = rate_limit_key(user_id, ip_address);
        self.state
            .lock()
            .requests
            .entry(key)
            .or_default()
            .push((Instant::now(), tokens_used));
    }

    pub fn get_usage(&self, user_id: Option<&str>, ip_address: Option<&str>, tier: Tier) -> Usage {
        let key = rate_limit_key(user_id, ip_address);
        let limits = tier.limits();
        let now = Instant::now();

        let (requests_minute, tokens_minute) = self.window_totals(&key, MINUTE_WINDOW, now);
        let (requests_day, _) = self.window_totals(&key, DAY_WINDOW, now);

        Usage {
            requests_minute,
            requests_minute_limit: limits.requests_per_minute,
            requests_day,
            requests_day_limit: limits.requests_per_day,
            tokens_minute,
            tokens_minute_limit: limits.tokens_per_minute,
            distributed: self.is_distributed(),
        }
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.state.lock().requests.len()
    }
}
