//! Sliding-window request rate limiter.
//!
//! One limiter instance is shared process-wide (behind an `Arc`) so every
//! admin session draws from the same requests-per-minute budget. The clock
//! is injected so tests can drive the window without sleeping.

use crate::error::LlmError;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// What to do when the ceiling is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitPolicy {
    /// Interactive contexts: fail immediately with `RateLimited`.
    FailFast,
    /// Batch contexts: sleep until a slot frees up.
    Block,
}

type ClockFn = Box<dyn Fn() -> Instant + Send + Sync>;

pub struct RateLimiter {
    ceiling: u32,
    window: Duration,
    clock: ClockFn,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// A limiter allowing `ceiling` requests per minute, on the system clock.
    pub fn per_minute(ceiling: u32) -> Self {
        Self::with_clock(ceiling, Duration::from_secs(60), Box::new(Instant::now))
    }

    /// Full constructor with an injectable clock (used by tests).
    pub fn with_clock(ceiling: u32, window: Duration, clock: ClockFn) -> Self {
        Self {
            ceiling,
            window,
            clock,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Try to take a slot. On success the request is counted immediately.
    /// On failure returns how long until the oldest in-window request ages
    /// out.
    fn try_acquire(&self) -> Result<(), Duration> {
        let now = (self.clock)();
        let mut timestamps = self.timestamps.lock().unwrap();

        while let Some(front) = timestamps.front() {
            if now.duration_since(*front) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if (timestamps.len() as u32) < self.ceiling {
            timestamps.push_back(now);
            Ok(())
        } else {
            let oldest = *timestamps.front().expect("non-empty at ceiling");
            let wait = self.window.saturating_sub(now.duration_since(oldest));
            Err(wait.max(Duration::from_millis(1)))
        }
    }

    /// Acquire a slot under the given policy.
    pub async fn acquire(&self, policy: RateLimitPolicy) -> Result<(), LlmError> {
        loop {
            match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(wait) => match policy {
                    RateLimitPolicy::FailFast => {
                        return Err(LlmError::RateLimited(format!(
                            "{} requests per {:?} ceiling reached; retry in {:?}",
                            self.ceiling, self.window, wait
                        )));
                    }
                    RateLimitPolicy::Block => {
                        debug!("rate limiter: blocking {:?} for a free slot", wait);
                        tokio::time::sleep(wait).await;
                    }
                },
            }
        }
    }

    /// Requests currently counted inside the window.
    pub fn in_flight(&self) -> usize {
        let now = (self.clock)();
        let timestamps = self.timestamps.lock().unwrap();
        timestamps
            .iter()
            .filter(|t| now.duration_since(**t) < self.window)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// A clock the test advances by hand.
    fn manual_clock() -> (Arc<Mutex<Instant>>, ClockFn) {
        let now = Arc::new(Mutex::new(Instant::now()));
        let handle = Arc::clone(&now);
        (now, Box::new(move || *handle.lock().unwrap()))
    }

    #[tokio::test]
    async fn test_fail_fast_under_ceiling() {
        let limiter = RateLimiter::per_minute(2);
        assert!(limiter.acquire(RateLimitPolicy::FailFast).await.is_ok());
        assert!(limiter.acquire(RateLimitPolicy::FailFast).await.is_ok());
    }

    #[tokio::test]
    async fn test_fail_fast_over_ceiling() {
        let limiter = RateLimiter::per_minute(1);
        limiter.acquire(RateLimitPolicy::FailFast).await.unwrap();

        let err = limiter.acquire(RateLimitPolicy::FailFast).await.unwrap_err();
        assert!(matches!(err, LlmError::RateLimited(_)));
    }

    #[tokio::test]
    async fn test_window_slides_with_clock() {
        let (now, clock) = manual_clock();
        let limiter = RateLimiter::with_clock(1, Duration::from_secs(60), clock);

        limiter.acquire(RateLimitPolicy::FailFast).await.unwrap();
        assert!(limiter.acquire(RateLimitPolicy::FailFast).await.is_err());

        // Advance past the window: the old request ages out
        *now.lock().unwrap() += Duration::from_secs(61);
        assert!(limiter.acquire(RateLimitPolicy::FailFast).await.is_ok());
    }

    #[tokio::test]
    async fn test_block_waits_for_slot() {
        // Tiny real-time window so Block resolves quickly
        let limiter =
            RateLimiter::with_clock(1, Duration::from_millis(30), Box::new(Instant::now));

        limiter.acquire(RateLimitPolicy::Block).await.unwrap();
        let start = Instant::now();
        limiter.acquire(RateLimitPolicy::Block).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_in_flight_counts_window_entries() {
        let (now, clock) = manual_clock();
        let limiter = RateLimiter::with_clock(10, Duration::from_secs(60), clock);

        limiter.acquire(RateLimitPolicy::FailFast).await.unwrap();
        limiter.acquire(RateLimitPolicy::FailFast).await.unwrap();
        assert_eq!(limiter.in_flight(), 2);

        *now.lock().unwrap() += Duration::from_secs(61);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_zero_ceiling_always_limited() {
        let limiter = RateLimiter::per_minute(0);
        // Degenerate configuration: nothing ever gets through fail-fast
        assert!(limiter.acquire(RateLimitPolicy::FailFast).await.is_err());
    }
}
