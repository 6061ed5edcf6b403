//! Token Bucket
//!
//! Pacing primitive for replay playback: sending a frame charges the bucket
//! the recorded inter-arrival delay (in milliseconds' worth of tokens) and
//! tokens refill at `1000 × rate_multiplier` per second, so over any window
//! the replayed rate converges to the recorded rate times the multiplier.
//! The bucket is owned by a single playback thread; no synchronization.

use std::time::Instant;

pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_per_sec: f64, initial: f64) -> Self {
        Self {
            tokens: initial.min(capacity),
            capacity,
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    /// Refill for elapsed time, then consume `amount` tokens if available.
    /// Charges above the capacity are clamped to it, so a pathological gap in
    /// the recording degrades to a bounded wait instead of stalling forever.
    pub fn try_consume(&mut self, amount: f64) -> bool {
        self.refill();
        let amount = amount.min(self.capacity);
        if self.tokens >= amount {
            self.tokens -= amount;
            true
        } else {
            false
        }
    }

    /// Forget elapsed time (used while paused so resuming does not burst).
    pub fn reset_clock(&mut self) {
        self.last_refill = Instant::now();
    }

    pub fn available(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            self.last_refill = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_initial_tokens_are_spendable() {
        let mut bucket = TokenBucket::new(10_000.0, 1000.0, 1000.0);
        assert!(bucket.try_consume(500.0));
        assert!(bucket.try_consume(500.0));
        assert!(!bucket.try_consume(500.0));
    }

    #[test]
    fn test_initial_clamped_to_capacity() {
        let bucket = TokenBucket::new(100.0, 1000.0, 5000.0);
        assert!(bucket.available() <= 100.0);
    }

    #[test]
    fn test_refill_over_time() {
        let mut bucket = TokenBucket::new(10_000.0, 10_000.0, 0.0);
        assert!(!bucket.try_consume(10.0));
        // 10k tokens/sec: 50ms is ~500 tokens.
        std::thread::sleep(Duration::from_millis(50));
        assert!(bucket.try_consume(100.0));
    }

    #[test]
    fn test_refill_capped_at_capacity() {
        let mut bucket = TokenBucket::new(50.0, 1_000_000.0, 0.0);
        std::thread::sleep(Duration::from_millis(20));
        assert!(bucket.try_consume(50.0));
        assert!(bucket.available() < 1.0);
    }

    #[test]
    fn test_oversized_charge_clamps_to_capacity() {
        let mut bucket = TokenBucket::new(100.0, 1_000_000.0, 0.0);
        std::thread::sleep(Duration::from_millis(10));
        // A charge far above capacity succeeds once the bucket is full.
        assert!(bucket.try_consume(1.0e9));
    }

    #[test]
    fn test_reset_clock_discards_elapsed_time() {
        let mut bucket = TokenBucket::new(1000.0, 100_000.0, 0.0);
        std::thread::sleep(Duration::from_millis(20));
        bucket.reset_clock();
        // The 20ms of refill credit was discarded.
        assert!(!bucket.try_consume(900.0));
    }

    #[test]
    fn test_consumption_rate_bounded_by_refill() {
        // Spend as fast as possible for ~100ms; total spend must stay within
        // initial + refill * elapsed (plus one charge of slack).
        let mut bucket = TokenBucket::new(10_000.0, 1000.0, 0.0);
        let start = Instant::now();
        let mut spent = 0.0;
        while start.elapsed() < Duration::from_millis(100) {
            if bucket.try_consume(10.0) {
                spent += 10.0;
            }
        }
        let budget = 1000.0 * start.elapsed().as_secs_f64() + 10.0;
        assert!(
            spent <= budget,
            "spent {} tokens, budget was {}",
            spent,
            budget
        );
    }
}
