//! Message guardrails.
//!
//! Every chat message passes through three checks, cheapest and most critical first:
//!
//! 1. [`rate_limiter`] - per-user / per-IP sliding windows, tiered by [`Tier`]
//! 2. [`prompt_injection`] - pattern matching for instruction override and jailbreak attempts
//! 3. [`topic_classifier`] - keyword classification that redirects off-topic requests
//!
//! The first check that blocks decides the outcome.

pub mod prompt_injection;
pub mod rate_limiter;
pub mod topic_classifier;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;

pub use prompt_injection::PromptInjectionDetector;
pub use rate_limiter::{RateLimiter, Tier, TierLimits, Usage};
pub use topic_classifier::TopicClassifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
}

/// Outcome of a guardrail check.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GuardrailResult {
    pub blocked: bool,
    /// Machine-readable reason, e.g. `rate_limit_minute` or `off_topic`
    pub reason: Option<String>,
    /// Message shown to the user in place of a generated answer
    pub message: Option<String>,
    pub severity: Severity,
    pub detected_topic: Option<String>,
}

impl GuardrailResult {
    pub fn allow() -> Self {
        Self::default()
    }

    pub fn allow_with_topic(topic: &str) -> Self {
        Self {
            detected_topic: Some(topic.to_string()),
            ..Self::default()
        }
    }

    pub fn block(reason: &str, message: &str, severity: Severity) -> Self {
        Self {
            blocked: true,
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            severity,
            detected_topic: None,
        }
    }
}

/// Runs the guardrail checks in order.
pub struct Guardrails {
    rate_limiter: RateLimiter,
    injection_detector: PromptInjectionDetector,
    topic_classifier: TopicClassifier,
}

impl Guardrails {
    pub fn new(rate_limiter: RateLimiter) -> Self {
        Self {
            rate_limiter,
            injection_detector: PromptInjectionDetector,
            topic_classifier: TopicClassifier,
        }
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Run all checks on a message.
    pub fn check(&self, message: &str, user_id: Option<&str>, ip_address: Option<&str>, tier: Tier) -> GuardrailResult {
        let rate = self.rate_limiter.check(user_id, ip_address, tier);
        if rate.blocked {
            warn!(user_id = ?user_id, ip = ?ip_address, reason = ?rate.reason, "Rate limit exceeded");
            return rate;
        }

        let injection = self.injection_detector.check(message);
        if injection.blocked {
            warn!(reason = ?injection.reason, "Prompt injection detected");
            return injection;
        }

        let topic = self.topic_classifier.check(message);
        if topic.blocked {
            info!(topic = ?topic.detected_topic, "Off-topic message redirected");
            return topic;
        }

        GuardrailResult {
            blocked: false,
            detected_topic: topic.detected_topic,
            ..GuardrailResult::default()
        }
    }

    /// Record a completed request against the caller's rate limit windows.
    pub fn record_request(&self, user_id: Option<&str>, ip_address: Option<&str>, tokens_used: u64) {
        self.rate_limiter.record_request(user_id, ip_address, tokens_used);
    }
}
