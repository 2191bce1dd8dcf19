//! Rolling-window admission control for outbound remote calls.

use std::{
    collections::VecDeque,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use rand::Rng;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, trace};

const WINDOW: Duration = Duration::from_secs(60);

/// Randomised pause taken before every call is admitted.
///
/// The delay is drawn uniformly from `min..=max`. A zero range disables it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterConfig {
    pub min: Duration,
    pub max: Duration,
}

impl JitterConfig {
    #[must_use]
    pub const fn none() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.max.is_zero()
    }

    fn sample(&self) -> Duration {
        if self.is_disabled() {
            return Duration::ZERO;
        }
        let (lo, hi) = if self.min <= self.max {
            (self.min, self.max)
        } else {
            (self.max, self.min)
        };
        rand::thread_rng().gen_range(lo..=hi)
    }
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(500),
            max: Duration::from_millis(1_500),
        }
    }
}

/// Bounds calls to `limit` per trailing 60 seconds, shared by every cell of a search.
///
/// Call times are kept in a queue; a caller proceeds once fewer than `limit`
/// calls fall inside the window ending now. The lock is never held
/// across a suspension point.
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    jitter: JitterConfig,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// `per_minute` of zero is treated as one.
    #[must_use]
    pub fn new(per_minute: u32, jitter: JitterConfig) -> Self {
        let limit = per_minute.max(1) as usize;
        Self {
            limit,
            jitter,
            admitted: Mutex::new(VecDeque::with_capacity(limit)),
        }
    }

    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Wait out the jitter, then wait until a call may proceed.
    ///
    /// The slot is stamped at the instant this returns, so the window bounds
    /// the calls themselves rather than their admissions.
    pub async fn acquire(&self) {
        let delay = self.jitter.sample();
        if !delay.is_zero() {
            trace!(jitter_ms = delay.as_millis(), "Applying request jitter");
            sleep(delay).await;
        }

        loop {
            match self.try_admit(Instant::now()) {
                Ok(()) => return,
                Err(retry_at) => {
                    debug!(
                        wait_ms = retry_at.saturating_duration_since(Instant::now()).as_millis(),
                        "Rate limit window full, waiting"
                    );
                    sleep_until(retry_at).await;
                }
            }
        }
    }

    /// Admit at `now`, or return the instant the oldest admission leaves the window.
    fn try_admit(&self, now: Instant) -> Result<(), Instant> {
        let mut admitted = self.admitted.lock().unwrap_or_else(PoisonError::into_inner);
        while admitted
            .front()
            .is_some_and(|&t| now.saturating_duration_since(t) >= WINDOW)
        {
            admitted.pop_front();
        }

        if admitted.len() < self.limit {
            admitted.push_back(now);
            return Ok(());
        }
        // Non-empty: len >= limit >= 1
        Err(admitted.front().map_or(now, |&oldest| oldest + WINDOW))
    }

    /// Admissions currently inside the window.
    #[must_use]
    pub fn in_window(&self) -> usize {
        let now = Instant::now();
        self.admitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|&&t| now.saturating_duration_since(t) < WINDOW)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_admits_up_to_limit_without_waiting() {
        let limiter = RateLimiter::new(5, JitterConfig::none());
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.in_window(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocks_until_oldest_leaves_window() {
        let limiter = RateLimiter::new(2, JitterConfig::none());
        let start = Instant::now();

        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(10)).await;
        limiter.acquire().await;

        // Third call waits for the first admission to age out at t=60s
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_secs(60));

        // Fourth waits for the second admission (t=10s) to age out
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_secs(70));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rolling_window_never_exceeds_limit() {
        let limiter = Arc::new(RateLimiter::new(3, JitterConfig::none()));
        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..9 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }
        let mut times = Vec::new();
        for handle in handles {
            times.push(handle.await.unwrap());
        }
        times.sort();

        for (i, t) in times.iter().enumerate() {
            let in_window = times[..=i]
                .iter()
                .filter(|&&earlier| t.duration_since(earlier) < WINDOW)
                .count();
            assert!(in_window <= 3, "window ending at {i} admitted {in_window}");
        }
        assert_eq!(times[8].duration_since(start), Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_stays_in_bounds() {
        let jitter = JitterConfig {
            min: Duration::from_millis(500),
            max: Duration::from_millis(1_500),
        };
        let limiter = RateLimiter::new(100, jitter);
        for _ in 0..20 {
            let start = Instant::now();
            limiter.acquire().await;
            let waited = start.elapsed();
            assert!(waited >= jitter.min && waited <= jitter.max, "{waited:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_never_squeezes_calls_inside_the_window() {
        let jitter = JitterConfig {
            min: Duration::ZERO,
            max: Duration::from_millis(1_500),
        };
        let limiter = RateLimiter::new(1, jitter);

        let mut fired = Vec::new();
        for _ in 0..40 {
            limiter.acquire().await;
            fired.push(Instant::now());
        }

        let too_close = fired
            .windows(2)
            .filter(|pair| pair[1].duration_since(pair[0]) < WINDOW)
            .count();
        assert_eq!(too_close, 0, "calls closer than the window: {too_close}");
    }

    #[test]
    fn test_zero_rate_is_clamped() {
        assert_eq!(RateLimiter::new(0, JitterConfig::none()).limit(), 1);
        assert!(JitterConfig::none().is_disabled());
        assert!(!JitterConfig::default().is_disabled());
    }
}
