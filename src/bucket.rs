use std::time::{Duration, Instant};

use serde::Serialize;

/// Fixed-window token bucket for a single rate-limit category.
///
/// The marketplace enforces its limits per fixed window, so a refill is a
/// full reset to capacity once the interval has elapsed, not a proportional
/// trickle. Only one window is reset per call; missed windows are not
/// accumulated.
///
/// Time is always passed in explicitly; tests simulate elapsed time without
/// sleeping. The bucket itself is not synchronized; the registry holds it
/// behind its exclusion scope.
#[derive(Debug, Clone)]
pub struct Bucket {
    capacity: u32,
    interval: Duration,
    tokens: u32,
    last_refill: Instant,
}

impl Bucket {
    pub fn new(capacity: u32, interval: Duration, now: Instant) -> Self {
        Self {
            capacity,
            interval,
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Resets tokens to capacity if a full interval has elapsed since the
    /// last refill.
    pub fn refill(&mut self, now: Instant) {
        if now.duration_since(self.last_refill) >= self.interval {
            self.tokens = self.capacity;
            self.last_refill = now;
        }
    }

    /// Refills, then debits `cost` tokens if enough are available. Returns
    /// false without mutation when the bucket cannot cover the cost.
    pub fn try_spend(&mut self, cost: u32, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }

    /// Credits tokens back, capped at capacity. Used to roll back a partial
    /// multi-bucket admission and when an admitted waiter vanished before it
    /// could run.
    pub fn refund(&mut self, cost: u32) {
        self.tokens = self.tokens.saturating_add(cost).min(self.capacity);
    }

    /// Empties the bucket without touching the refill timestamp, so the rest
    /// of the current window is treated as exhausted. Applied when the remote
    /// reports a violation the local count did not predict.
    pub fn force_empty(&mut self) {
        self.tokens = 0;
    }

    /// Read-only snapshot. Never mutates state or triggers a refill, so
    /// inspection cannot perturb refill timing.
    pub fn status(&self, now: Instant) -> BucketStatus {
        BucketStatus {
            tokens: self.tokens,
            capacity: self.capacity,
            interval: self.interval,
            since_refill: now.duration_since(self.last_refill),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Observability snapshot of a single bucket.
#[derive(Debug, Clone, Serialize)]
pub struct BucketStatus {
    pub tokens: u32,
    pub capacity: u32,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Time elapsed in the current window.
    #[serde(with = "humantime_serde")]
    pub since_refill: Duration,
}
