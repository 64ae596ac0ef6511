//! Request rate limiting for metadata APIs
//!
//! Counts requests inside a time window. Once the budget of a window is used
//! up, callers wait until the window resets instead of failing.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct Window {
    /// Requests issued in the current window
    count: u32,
    /// When the current window ends; `None` before the first request
    resets_at: Option<Instant>,
}

/// Limits requests to `limit` per `window`
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    state: Mutex<Window>,
}

impl RateLimiter {
    /// Creates a limiter admitting `limit` requests per `window`
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            state: Mutex::new(Window {
                count: 0,
                resets_at: None,
            }),
        }
    }

    /// Creates a limiter admitting `limit` requests per minute
    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    /// Reserves one request, waiting for the next window if necessary
    ///
    /// Waiters are served one at a time; the lock is held while sleeping so
    /// requests queued behind a full window do not overshoot the next one.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        match state.resets_at {
            Some(resets_at) if now < resets_at => {}
            _ => {
                state.count = 0;
                state.resets_at = Some(now + self.window);
            }
        }

        if state.count >= self.limit {
            if let Some(resets_at) = state.resets_at {
                tracing::info!(
                    wait_ms = resets_at.saturating_duration_since(now).as_millis() as u64,
                    "Rate limit reached, waiting for the window to reset"
                );
                tokio::time::sleep_until(resets_at).await;
            }
            state.count = 0;
            state.resets_at = Some(Instant::now() + self.window);
        }

        state.count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_requests_within_budget_do_not_wait() {
        let limiter = RateLimiter::per_minute(3);
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire().await;
        }

        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_window_waits_for_reset() {
        let limiter = RateLimiter::per_minute(2);
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_after_idle_period() {
        let limiter = RateLimiter::per_minute(1);
        limiter.acquire().await;

        tokio::time::advance(Duration::from_secs(61)).await;
        let start = Instant::now();
        limiter.acquire().await;

        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
