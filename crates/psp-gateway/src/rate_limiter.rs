//! Sliding 60-second window token-bucket rate limiting, per model.

use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Tracks request and token counts in a rolling 60-second window.
pub struct RateLimiter {
    rpm: u32,
    tpm: u64,
    state: Mutex<RateLimiterState>,
}

struct RateLimiterState {
    request_timestamps: Vec<Instant>,
    token_counts: Vec<(Instant, u64)>,
}

const WINDOW: Duration = Duration::from_secs(60);

impl RateLimiter {
    pub fn new(requests_per_minute: u32, tokens_per_minute: u64) -> Self {
        Self {
            rpm: requests_per_minute,
            tpm: tokens_per_minute,
            state: Mutex::new(RateLimiterState {
                request_timestamps: Vec::new(),
                token_counts: Vec::new(),
            }),
        }
    }

    /// Attempt to acquire a slot for `estimated_tokens`. Returns `false` if
    /// either the request-rate or token-rate limit would be exceeded.
    pub async fn acquire(&self, estimated_tokens: u64) -> bool {
        let now = Instant::now();
        let cutoff = now.checked_sub(WINDOW).unwrap_or(now);
        let mut state = self.state.lock().await;

        state.request_timestamps.retain(|t| *t > cutoff);
        state.token_counts.retain(|(t, _)| *t > cutoff);

        if state.request_timestamps.len() as u32 >= self.rpm {
            return false;
        }

        let total_tokens: u64 = state.token_counts.iter().map(|(_, c)| c).sum();
        if total_tokens + estimated_tokens > self.tpm {
            return false;
        }

        state.request_timestamps.push(now);
        state.token_counts.push((now, estimated_tokens));
        true
    }

    pub async fn current_rpm(&self) -> u32 {
        let cutoff = Instant::now().checked_sub(WINDOW).unwrap_or_else(Instant::now);
        let state = self.state.lock().await;
        state.request_timestamps.iter().filter(|t| **t > cutoff).count() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_respects_request_rate_limit() {
        let limiter = RateLimiter::new(2, 100_000);
        assert!(limiter.acquire(10).await);
        assert!(limiter.acquire(10).await);
        assert!(!limiter.acquire(10).await);
    }

    #[tokio::test]
    async fn acquire_respects_token_rate_limit() {
        let limiter = RateLimiter::new(100, 1000);
        assert!(limiter.acquire(600).await);
        assert!(!limiter.acquire(600).await);
        assert!(limiter.acquire(300).await);
    }
}
