//! Job start rate limiting using a token bucket
//!
//! The worker pool acquires one token per job start. The bucket holds `max_per_window`
//! tokens and refills continuously at `max_per_window` per window, so a large backlog
//! cannot open more than `concurrency` new transfers per second.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Token bucket shared by all dispatchers of one worker pool
///
/// Lock-free: `tokens` and `last_refill` are atomics updated with compare-exchange, the
/// same way a byte-rate limiter would track bytes.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    /// Bucket capacity and refill amount per window (0 = unlimited)
    max_per_window: u64,
    /// Refill window
    window: Duration,
    /// Starts available right now
    tokens: Arc<AtomicU64>,
    /// Last refill timestamp (nanoseconds since arbitrary epoch)
    last_refill: Arc<AtomicU64>,
}

impl RateLimiter {
    /// Allow `max_per_window` acquisitions per `window`
    ///
    /// ```
    /// use std::time::Duration;
    /// use trackfetch::rate_limiter::RateLimiter;
    ///
    /// // at most 8 job starts per second
    /// let limiter = RateLimiter::new(8, Duration::from_secs(1));
    /// assert!(limiter.try_acquire());
    /// ```
    #[must_use]
    pub fn new(max_per_window: u64, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            tokens: Arc::new(AtomicU64::new(max_per_window)),
            last_refill: Arc::new(AtomicU64::new(Self::now_nanos())),
        }
    }

    /// `concurrency` starts per second
    #[must_use]
    pub fn per_second(concurrency: usize) -> Self {
        Self::new(concurrency as u64, Duration::from_secs(1))
    }

    /// Configured limit per window, `None` if unlimited
    pub fn limit(&self) -> Option<u64> {
        (self.max_per_window > 0).then_some(self.max_per_window)
    }

    /// Take one token without waiting
    pub fn try_acquire(&self) -> bool {
        if self.max_per_window == 0 {
            return true;
        }

        self.refill_tokens();
        loop {
            let current = self.tokens.load(Ordering::SeqCst);
            if current == 0 {
                return false;
            }
            if self
                .tokens
                .compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Wait until a token is available and take it
    pub async fn acquire(&self) {
        loop {
            if self.try_acquire() {
                return;
            }

            // One token refills every window / max; poll at that pace, within bounds
            let per_token = self.window.as_nanos() as u64 / self.max_per_window.max(1);
            let wait = Duration::from_nanos(per_token)
                .clamp(Duration::from_millis(5), Duration::from_millis(100));
            tokio::time::sleep(wait).await;
        }
    }

    fn refill_tokens(&self) {
        let now = Self::now_nanos();
        let last = self.last_refill.load(Ordering::SeqCst);

        let elapsed = now.saturating_sub(last) as f64;
        let window = self.window.as_nanos().max(1) as f64;
        let tokens_to_add = (self.max_per_window as f64 * elapsed / window) as u64;

        if tokens_to_add > 0
            && self
                .last_refill
                .compare_exchange(last, now, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            let current = self.tokens.load(Ordering::SeqCst);
            let refilled = current.saturating_add(tokens_to_add).min(self.max_per_window);
            self.tokens.store(refilled, Ordering::SeqCst);
        }
    }

    /// Monotonic nanoseconds since first use in this process
    fn now_nanos() -> u64 {
        static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
        let start = START.get_or_init(Instant::now);
        start.elapsed().as_nanos() as u64
    }
}
