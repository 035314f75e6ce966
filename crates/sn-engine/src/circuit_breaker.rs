//! Circuit breaker for outbound channel adapters.
//!
//! A Closed/Open/HalfOpen state machine, one breaker per adapter instance
//! rather than a registry keyed by arbitrary endpoint URL — each adapter
//! (email/push/socket) owns exactly one breaker for its downstream gateway.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitBreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitBreakerState,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub failure_rate: f64,
}

pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub reset_timeout: Duration,
    pub buffer_size: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(30),
            buffer_size: 20,
        }
    }
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: RwLock<CircuitBreakerState>,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    rejected_calls: AtomicU64,
    last_failure_time: RwLock<Option<Instant>>,
    recent_results: RwLock<Vec<bool>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: RwLock::new(CircuitBreakerState::Closed),
            successful_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
            last_failure_time: RwLock::new(None),
            recent_results: RwLock::new(Vec::new()),
        }
    }

    /// Whether a call may currently be attempted. Transitions Open -> HalfOpen
    /// when the reset timeout has elapsed.
    pub fn allow_request(&self) -> bool {
        let state = *self.state.read();
        match state {
            CircuitBreakerState::Closed | CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Open => {
                let elapsed = self
                    .last_failure_time
                    .read()
                    .map(|t| t.elapsed() >= self.config.reset_timeout)
                    .unwrap_or(true);
                if elapsed {
                    *self.state.write() = CircuitBreakerState::HalfOpen;
                    true
                } else {
                    self.rejected_calls.fetch_add(1, Ordering::Relaxed);
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        self.successful_calls.fetch_add(1, Ordering::Relaxed);
        self.push_result(true);

        if *self.state.read() == CircuitBreakerState::HalfOpen {
            let recent = self.recent_results.read();
            let recent_successes = recent
                .iter()
                .rev()
                .take(self.config.success_threshold as usize)
                .filter(|s| **s)
                .count() as u32;
            if recent_successes >= self.config.success_threshold {
                *self.state.write() = CircuitBreakerState::Closed;
            }
        }
    }

    pub fn record_failure(&self) {
        self.failed_calls.fetch_add(1, Ordering::Relaxed);
        *self.last_failure_time.write() = Some(Instant::now());
        self.push_result(false);

        let mut state = self.state.write();
        match *state {
            CircuitBreakerState::Closed => {
                let recent = self.recent_results.read();
                let recent_failures = recent.iter().filter(|s| !**s).count() as u32;
                if recent_failures >= self.config.failure_threshold {
                    *state = CircuitBreakerState::Open;
                }
            }
            CircuitBreakerState::HalfOpen => *state = CircuitBreakerState::Open,
            CircuitBreakerState::Open => {}
        }
    }

    fn push_result(&self, success: bool) {
        let mut results = self.recent_results.write();
        if results.len() >= self.config.buffer_size {
            results.remove(0);
        }
        results.push(success);
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let successful = self.successful_calls.load(Ordering::Relaxed);
        let failed = self.failed_calls.load(Ordering::Relaxed);
        let total = successful + failed;
        CircuitBreakerStats {
            name: self.name.clone(),
            state: *self.state.read(),
            successful_calls: successful,
            failed_calls: failed,
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
            failure_rate: if total > 0 { failed as f64 / total as f64 } else { 0.0 },
        }
    }
}
