use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::bucket::{Bucket, BucketStatus};
use crate::config::{Category, GateConfig};

/// Owns every category bucket and makes multi-bucket admission decisions.
///
/// All buckets live behind one registry-level exclusion scope, so a
/// multi-category check is atomic to outside observers: no caller can ever
/// observe a partial debit.
#[derive(Debug)]
pub struct BucketRegistry {
    buckets: Mutex<HashMap<Category, Bucket>>,
    min_interval: Duration,
}

impl BucketRegistry {
    /// Builds one bucket per configured category, all starting full.
    /// `config` has already been validated by the controller.
    pub fn new(config: &GateConfig, now: Instant) -> Self {
        let mut min_interval = Duration::MAX;
        let mut buckets = HashMap::with_capacity(config.limits.len());
        for (category, limit) in &config.limits {
            min_interval = min_interval.min(limit.interval);
            buckets.insert(
                category.clone(),
                Bucket::new(limit.capacity, limit.interval, now),
            );
        }
        Self {
            buckets: Mutex::new(buckets),
            min_interval,
        }
    }

    /// All-or-nothing admission across `categories`: either every bucket is
    /// debited by `cost` or none is. Categories are visited in canonical
    /// order; on the first refusal everything already debited in this attempt
    /// is refunded before returning false.
    pub fn try_admit(&self, categories: &[Category], cost: u32, now: Instant) -> bool {
        let mut ordered: Vec<&Category> = categories.iter().collect();
        ordered.sort();
        ordered.dedup();

        let mut buckets = self.lock();
        let mut spent: Vec<&Category> = Vec::with_capacity(ordered.len());
        for category in &ordered {
            let admitted = buckets
                .get_mut(*category)
                .map(|bucket| bucket.try_spend(cost, now))
                .unwrap_or(false);
            if admitted {
                spent.push(*category);
            } else {
                for refunded in spent {
                    if let Some(bucket) = buckets.get_mut(refunded) {
                        bucket.refund(cost);
                    }
                }
                debug!(category = %category, cost, "admission refused");
                return false;
            }
        }
        true
    }

    /// Credits `cost` back to every category. Used when an admitted request
    /// could not be handed over to its caller.
    pub fn refund(&self, categories: &[Category], cost: u32) {
        let mut buckets = self.lock();
        for category in categories {
            if let Some(bucket) = buckets.get_mut(category) {
                bucket.refund(cost);
            }
        }
    }

    /// Zeroes the named buckets without touching their window phase. Called
    /// when the remote signalled a violation the local counts did not
    /// predict, so the rest of the current window is treated as exhausted.
    pub fn force_empty(&self, categories: &[Category]) {
        let mut buckets = self.lock();
        for category in categories {
            if let Some(bucket) = buckets.get_mut(category) {
                bucket.force_empty();
            }
        }
    }

    /// Read-only snapshot of every bucket.
    pub fn status(&self, now: Instant) -> HashMap<Category, BucketStatus> {
        let buckets = self.lock();
        buckets
            .iter()
            .map(|(category, bucket)| (category.clone(), bucket.status(now)))
            .collect()
    }

    /// Smallest configured refill interval; the dispatch loop re-polls at
    /// least this often.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Category, Bucket>> {
        match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
