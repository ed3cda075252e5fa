//! Consecutive-failure circuit breaker for the language model.
//!
//! Closed: every call goes through. After `failure_threshold` consecutive failures the circuit
//! opens and calls are refused until `reset_timeout` has elapsed since the last failure. Then a
//! single trial call is let through (half-open); its success closes the circuit, its failure
//! re-opens it for another `reset_timeout`.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use super::CircuitStatus;
use crate::config::CircuitBreakerConfig;

#[derive(Debug, Default)]
struct BreakerState {
    failures: u32,
    open: bool,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            reset_timeout: config.reset_timeout,
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// Whether a call may proceed. Claims the half-open trial slot when the timeout has passed.
    pub fn allow_request(&self) -> bool {
        let mut state = self.state.lock();
        if !state.open {
            return true;
        }

        let elapsed = state.last_failure.map(|t| t.elapsed()).unwrap_or(Duration::MAX);
        if elapsed >= self.reset_timeout && !state.trial_in_flight {
            info!("Gemini circuit breaker: entering half-open state");
            state.trial_in_flight = true;
            return true;
        }

        false
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        if state.failures > 0 {
            info!("Gemini circuit breaker: reset after successful request");
        }
        *state = BreakerState::default();
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.failures += 1;
        state.last_failure = Some(Instant::now());
        state.trial_in_flight = false;

        if state.failures >= self.failure_threshold {
            if !state.open {
                warn!(
                    "Gemini circuit breaker: OPEN after {} failures. Will retry in {:?}",
                    state.failures, self.reset_timeout
                );
            }
            state.open = true;
        }
    }

    /// Give back the half-open trial slot without a verdict (e.g. a stream that produced
    /// nothing and did not fail).
    pub fn release_trial(&self) {
        self.state.lock().trial_in_flight = false;
    }

    pub fn status(&self) -> CircuitStatus {
        let state = self.state.lock();
        let time_until_retry = match (state.open, state.last_failure) {
            (true, Some(last)) => self.reset_timeout.saturating_sub(last.elapsed()).as_secs_f64(),
            _ => 0.0,
        };

        CircuitStatus {
            open: state.open,
            failures: state.failures,
            time_until_retry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(&CircuitBreakerConfig {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(60),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let breaker = breaker();
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.allow_request());
        assert!(!breaker.status().open);

        breaker.record_failure();
        assert!(!breaker.allow_request());

        let status = breaker.status();
        assert!(status.open);
        assert_eq!(status.failures, 3);
        assert!(status.time_until_retry > 59.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failures() {
        let breaker = breaker();
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.allow_request());
        assert_eq!(breaker.status().failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_lets_one_trial_through() {
        let breaker = breaker();
        for _ in 0..3 {
            breaker.record_failure();
        }

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(breaker.status().time_until_retry, 0.0);
        assert!(breaker.allow_request());
        // Trial slot is taken
        assert!(!breaker.allow_request());

        breaker.record_success();
        assert!(breaker.allow_request());
        assert!(!breaker.status().open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens() {
        let breaker = breaker();
        for _ in 0..3 {
            breaker.record_failure();
        }

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(breaker.allow_request());
        breaker.record_failure();

        assert!(!breaker.allow_request());
        assert_eq!(breaker.status().failures, 4);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(breaker.allow_request());
        breaker.release_trial();
        assert!(breaker.allow_request());
    }
}
