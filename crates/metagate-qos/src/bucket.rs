//! Token bucket rate limiter

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Sub-token precision factor.
const SCALE: u64 = 1_000;

/// Token bucket with burst capacity. Tokens refill continuously at
/// `rate` per second and accumulate up to `burst`; acquisition is a
/// compare-and-swap, so callers on the hot path never take a lock
/// unless a refill is due.
#[derive(Debug)]
pub struct TokenBucket {
    /// Current tokens, scaled
    tokens: AtomicU64,
    /// Burst capacity, scaled
    max_tokens: AtomicU64,
    /// Tokens per second, scaled
    refill_rate: AtomicU64,
    last_refill: Mutex<Instant>,
}

impl TokenBucket {
    #[must_use]
    pub fn new(rate: u64, burst: u64) -> Self {
        Self {
            tokens: AtomicU64::new(burst * SCALE),
            max_tokens: AtomicU64::new(burst * SCALE),
            refill_rate: AtomicU64::new(rate * SCALE),
            last_refill: Mutex::new(Instant::now()),
        }
    }

    /// Burst capacity in whole tokens.
    pub fn capacity(&self) -> u64 {
        self.max_tokens.load(Ordering::Relaxed) / SCALE
    }

    /// Acquires `count` tokens, or reports how long to wait before
    /// retrying. The wait is the time the refill needs to cover the
    /// shortfall, so a retry usually succeeds.
    pub fn try_acquire(&self, count: u64) -> Result<(), Duration> {
        self.refill();
        let needed = count * SCALE;
        loop {
            let current = self.tokens.load(Ordering::Relaxed);
            if current < needed {
                let rate = self.refill_rate.load(Ordering::Relaxed);
                if rate == 0 {
                    return Err(Duration::from_secs(1));
                }
                let shortfall = needed - current;
                let wait_us = shortfall.saturating_mul(1_000_000) / rate;
                return Err(Duration::from_micros(wait_us.max(1_000)));
            }
            match self.tokens.compare_exchange_weak(
                current,
                current - needed,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(_) => continue,
            }
        }
    }

    /// Returns tokens that were acquired but not consumed.
    pub fn give_back(&self, count: u64) {
        if count == 0 {
            return;
        }
        let max = self.max_tokens.load(Ordering::Relaxed);
        let mut add = count * SCALE;
        loop {
            let current = self.tokens.load(Ordering::Relaxed);
            add = add.min(max.saturating_sub(current));
            if add == 0 {
                return;
            }
            if self
                .tokens
                .compare_exchange_weak(
                    current,
                    current + add,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return;
            }
        }
    }

    pub fn available(&self) -> u64 {
        self.refill();
        self.tokens.load(Ordering::Relaxed) / SCALE
    }

    /// Adjusts the limit in place, capping stored tokens to the new
    /// burst.
    pub fn set_rate(&self, rate: u64, burst: u64) {
        self.refill_rate.store(rate * SCALE, Ordering::Relaxed);
        self.max_tokens.store(burst * SCALE, Ordering::Relaxed);
        let max = burst * SCALE;
        let current = self.tokens.load(Ordering::Relaxed);
        if current > max {
            self.tokens.store(max, Ordering::Relaxed);
        }
    }

    fn refill(&self) {
        let mut last = self.last_refill.lock();
        let now = Instant::now();
        let elapsed_us = u64::try_from(now.duration_since(*last).as_micros()).unwrap_or(u64::MAX);
        let rate = self.refill_rate.load(Ordering::Relaxed);
        let new_tokens = elapsed_us.saturating_mul(rate) / 1_000_000;
        if new_tokens > 0 {
            let max = self.max_tokens.load(Ordering::Relaxed);
            let current = self.tokens.load(Ordering::Relaxed);
            self.tokens
                .store((current + new_tokens).min(max), Ordering::Relaxed);
            *last = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_empty() {
        let bucket = TokenBucket::new(100, 100);
        assert!(bucket.try_acquire(50).is_ok());
        assert!(bucket.try_acquire(50).is_ok());
        assert!(bucket.try_acquire(1).is_err());
    }

    #[test]
    fn test_retry_hint_covers_shortfall() {
        let bucket = TokenBucket::new(1_000, 10);
        assert!(bucket.try_acquire(10).is_ok());
        let wait = bucket.try_acquire(10).unwrap_err();
        // 10 tokens at 1000/s is 10ms.
        assert!(wait >= Duration::from_millis(1));
        assert!(wait <= Duration::from_millis(20));
    }

    #[test]
    fn test_give_back_caps_at_burst() {
        let bucket = TokenBucket::new(100, 100);
        bucket.give_back(1_000);
        assert_eq!(bucket.available(), 100);
        assert!(bucket.try_acquire(100).is_ok());
        bucket.give_back(30);
        assert!(bucket.try_acquire(30).is_ok());
    }

    #[test]
    fn test_set_rate_caps_tokens() {
        let bucket = TokenBucket::new(100, 100);
        bucket.set_rate(10, 10);
        assert_eq!(bucket.capacity(), 10);
        assert!(bucket.try_acquire(10).is_ok());
        assert!(bucket.try_acquire(1).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_over_time() {
        let bucket = TokenBucket::new(1_000, 100);
        assert!(bucket.try_acquire(100).is_ok());
        assert!(bucket.try_acquire(1).is_err());

        tokio::time::advance(Duration::from_millis(100)).await;
        // ~100 tokens refilled at 1000/s.
        assert!(bucket.try_acquire(50).is_ok());
    }
}
