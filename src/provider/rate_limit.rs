//! Shared call pacing and retry policy.
//!
//! [`RateLimiter`] holds the only contended state in a scan: the time of the
//! last provider call and the provider's last reported quota. Every caller
//! goes through [`RateLimiter::acquire`], which holds the mutex while it
//! sleeps, so the spacing between calls is at least `min_interval` no matter
//! how many tasks are in flight.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use super::QuotaHint;
use crate::config::ProviderConfig;

/// Pacing state guarded by the limiter's mutex.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitState {
    pub last_call: Option<Instant>,
    pub remaining_quota: Option<u32>,
    pub reset_at: Option<Instant>,
}

pub struct RateLimiter {
    min_interval: Duration,
    low_quota_threshold: u32,
    quota_pause: Duration,
    state: Mutex<RateLimitState>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration, low_quota_threshold: u32, quota_pause: Duration) -> Self {
        Self {
            min_interval,
            low_quota_threshold,
            quota_pause,
            state: Mutex::new(RateLimitState::default()),
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(
            Duration::from_millis(config.min_call_interval_ms),
            config.low_quota_threshold,
            Duration::from_secs(config.quota_pause_secs),
        )
    }

    /// Wait for this caller's turn to hit the provider.
    ///
    /// Pauses first if the last reported quota is at or below the low-water
    /// mark, until the reported reset or for `quota_pause`, whichever is
    /// sooner. Then waits out the remainder of `min_interval` since the last
    /// call and stamps the new call time.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;

        if let Some(remaining) = state.remaining_quota {
            if remaining <= self.low_quota_threshold {
                let pause = match state.reset_at {
                    Some(at) => at.saturating_duration_since(Instant::now()).min(self.quota_pause),
                    None => self.quota_pause,
                };
                warn!(
                    remaining,
                    pause_ms = pause.as_millis() as u64,
                    "provider quota low, pausing"
                );
                sleep(pause).await;
                state.remaining_quota = None;
                state.reset_at = None;
            }
        }

        if let Some(last) = state.last_call {
            let elapsed = Instant::now().saturating_duration_since(last);
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }

        state.last_call = Some(Instant::now());
    }

    /// Record the quota reported by a response.
    pub async fn observe(&self, hint: &QuotaHint) {
        let mut state = self.state.lock().await;
        if let Some(remaining) = hint.remaining {
            state.remaining_quota = Some(remaining);
        }
        if let Some(reset_after) = hint.reset_after {
            state.reset_at = Some(Instant::now() + reset_after);
        }
        debug!(remaining = ?state.remaining_quota, "quota updated");
    }

    pub async fn snapshot(&self) -> RateLimitState {
        *self.state.lock().await
    }
}

/// Exponential backoff: `base * 2^attempt` for at most `max_retries` retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base: Duration) -> Self {
        Self { max_retries, base }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.backoff_base_ms),
        )
    }

    /// Delay before retry number `attempt` (0-based), or `None` once exhausted.
    pub fn backoff(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        Some(self.base.saturating_mul(factor))
    }

    pub fn start(&self) -> RetryState {
        RetryState {
            policy: *self,
            attempt: 0,
        }
    }
}

/// Progress through a [`RetryPolicy`] for a single call.
#[derive(Debug, Clone, Copy)]
pub struct RetryState {
    policy: RetryPolicy,
    attempt: u32,
}

impl RetryState {
    /// Consume one retry, returning its delay, or `None` when none remain.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = self.policy.backoff(self.attempt)?;
        self.attempt += 1;
        Some(delay)
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        assert_eq!(policy.backoff(0), Some(Duration::from_secs(1)));
        assert_eq!(policy.backoff(1), Some(Duration::from_secs(2)));
        assert_eq!(policy.backoff(2), Some(Duration::from_secs(4)));
        assert_eq!(policy.backoff(3), None);
    }

    #[test]
    fn test_retry_state_exhausts() {
        let mut state = RetryPolicy::new(2, Duration::from_millis(100)).start();
        assert_eq!(state.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(state.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(state.next_delay(), None);
        assert_eq!(state.attempts(), 2);
    }

    #[test]
    fn test_zero_retries() {
        let mut state = RetryPolicy::new(0, Duration::from_secs(1)).start();
        assert_eq!(state.next_delay(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spacing_across_concurrent_callers() {
        let limiter = Arc::new(RateLimiter::new(
            Duration::from_millis(500),
            0,
            Duration::from_secs(60),
        ));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }
        let mut stamps = Vec::new();
        for h in handles {
            stamps.push(h.await.unwrap());
        }
        stamps.sort();

        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(500));
        }
        assert!(stamps[3] - start >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_wait_after_interval_elapsed() {
        let limiter = RateLimiter::new(Duration::from_millis(500), 0, Duration::from_secs(60));
        limiter.acquire().await;
        sleep(Duration::from_secs(2)).await;
        let before = Instant::now();
        limiter.acquire().await;
        assert_eq!(Instant::now(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_quota_pauses_and_resets() {
        let limiter = RateLimiter::new(Duration::ZERO, 5, Duration::from_secs(60));
        limiter
            .observe(&QuotaHint {
                remaining: Some(3),
                reset_after: None,
            })
            .await;
        assert_eq!(limiter.snapshot().await.remaining_quota, Some(3));

        let before = Instant::now();
        limiter.acquire().await;
        let waited = Instant::now() - before;
        assert!(waited >= Duration::from_secs(60) && waited < Duration::from_secs(61));

        let state = limiter.snapshot().await;
        assert_eq!(state.remaining_quota, None);
        assert_eq!(state.reset_at, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_quota_pause_ends_at_reset() {
        let limiter = RateLimiter::new(Duration::ZERO, 5, Duration::from_secs(60));
        limiter
            .observe(&QuotaHint {
                remaining: Some(1),
                reset_after: Some(Duration::from_secs(20)),
            })
            .await;

        let before = Instant::now();
        limiter.acquire().await;
        let waited = Instant::now() - before;
        assert!(waited >= Duration::from_secs(20) && waited < Duration::from_secs(21));
        assert_eq!(limiter.snapshot().await.reset_at, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distant_reset_capped_by_quota_pause() {
        let limiter = RateLimiter::new(Duration::ZERO, 5, Duration::from_secs(60));
        limiter
            .observe(&QuotaHint {
                remaining: Some(0),
                reset_after: Some(Duration::from_secs(600)),
            })
            .await;

        let before = Instant::now();
        limiter.acquire().await;
        let waited = Instant::now() - before;
        assert!(waited >= Duration::from_secs(60) && waited < Duration::from_secs(61));
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_quota_does_not_pause() {
        let limiter = RateLimiter::new(Duration::ZERO, 5, Duration::from_secs(60));
        limiter
            .observe(&QuotaHint {
                remaining: Some(100),
                reset_after: None,
            })
            .await;
        let before = Instant::now();
        limiter.acquire().await;
        assert_eq!(Instant::now(), before);
    }
}
