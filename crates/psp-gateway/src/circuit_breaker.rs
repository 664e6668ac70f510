//! Simple consecutive-failure circuit breaker for model endpoints.
//!
//! Opens after `failure_threshold` consecutive failures, half-opens after
//! `recovery_timeout` has elapsed, and resets to closed on any success. This
//! deliberately mirrors the reference gateway's simple state machine rather
//! than a windowed failure-rate model.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<Inner>,
}

struct Inner {
    failure_count: u32,
    last_failure: Option<Instant>,
    state: CircuitState,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout_secs: u64) -> Self {
        Self {
            failure_threshold,
            recovery_timeout: Duration::from_secs(recovery_timeout_secs),
            inner: Mutex::new(Inner {
                failure_count: 0,
                last_failure: None,
                state: CircuitState::Closed,
            }),
        }
    }

    /// Current state, lazily transitioning Open -> HalfOpen once the
    /// recovery timeout has elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == CircuitState::Open {
            if let Some(last) = inner.last_failure {
                if last.elapsed() > self.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                }
            }
        }
        inner.state
    }

    pub fn is_available(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failure_count = 0;
        inner.state = CircuitState::Closed;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        if inner.failure_count >= self.failure_threshold {
            inner.state = CircuitState::Open;
            tracing::warn!(
                failures = inner.failure_count,
                "circuit breaker opened after consecutive failures"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let cb = CircuitBreaker::new(3, 30);
        cb.record_failure();
        cb.record_failure();
        assert!(cb.is_available());
        cb.record_failure();
        assert!(!cb.is_available());
    }

    #[test]
    fn success_resets_failure_count() {
        let cb = CircuitBreaker::new(3, 30);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert!(cb.is_available());
    }
}
