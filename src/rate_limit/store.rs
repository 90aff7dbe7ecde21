use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::arbitration::arbitrate;
use crate::quota::{CounterKey, Quota};

/// One quota's view of its usage history at a given timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageProbe {
    /// Usage history to read and credit.
    pub key: CounterKey,
    /// Start of the bucket the call timestamp falls into.
    pub bucket_start: u64,
    /// Bucket width.
    pub granularity_seconds: u64,
    /// Buckets summed, newest first, starting at `bucket_start`.
    pub bucket_count: u64,
    /// Quota limit used by the reduction.
    pub limit: u64,
    /// Lifetime of a credited bucket.
    pub ttl_seconds: u64,
}

impl UsageProbe {
    /// Build the probe for `quota` as seen by `prefix` at `timestamp`.
    pub fn new(quota: &Quota, prefix: &str, timestamp: u64) -> Self {
        Self {
            key: quota.counter_key(prefix),
            bucket_start: quota.bucket_start(timestamp),
            granularity_seconds: quota.granularity_seconds(),
            bucket_count: quota.bucket_count(),
            limit: quota.limit(),
            ttl_seconds: quota.ttl_seconds(),
        }
    }

    /// Start of the oldest bucket in the window, clamped at timestamp zero.
    pub fn oldest_bucket_start(&self) -> u64 {
        let span = self.bucket_count.saturating_sub(1).saturating_mul(self.granularity_seconds);
        self.bucket_start.saturating_sub(span)
    }

    /// Bucket starts covered by this probe, newest first.
    ///
    /// Stops early instead of wrapping below timestamp zero.
    pub fn bucket_starts(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.bucket_count).map_while(move |k| {
            k.checked_mul(self.granularity_seconds)
                .and_then(|offset| self.bucket_start.checked_sub(offset))
        })
    }
}

/// A single request handed to the store for atomic evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageCheck {
    /// Call timestamp, seconds.
    pub timestamp: u64,
    /// Units asked for.
    pub requested: u64,
    /// One probe per quota, in request order.
    pub probes: Vec<UsageProbe>,
}

impl UsageCheck {
    pub fn new(timestamp: u64, requested: u64, probes: Vec<UsageProbe>) -> Self {
        Self { timestamp, requested, probes }
    }
}

/// Shared usage store capability.
///
/// Implementations hold per-(counter key, bucket) unit counts with expiry and
/// must evaluate [`check_and_use`](UsageStore::check_and_use) atomically with
/// respect to every other caller touching the same counter keys.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Error type for storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sum each probe's window, reduce `requested` through the probes in order,
    /// credit the reduced amount to every probe's current bucket and refresh
    /// its expiry, all as one atomic step.
    ///
    /// Returns the usage each probe observed before the credit, in probe order.
    async fn check_and_use(&self, check: &UsageCheck) -> Result<Vec<u64>, Self::Error>;

    /// Sum each probe's window without modifying anything.
    async fn peek_usage(&self, probes: &[UsageProbe], timestamp: u64) -> Result<Vec<u64>, Self::Error>;
}

#[async_trait]
impl<S> UsageStore for Arc<S>
where
    S: UsageStore + ?Sized,
{
    type Error = S::Error;

    async fn check_and_use(&self, check: &UsageCheck) -> Result<Vec<u64>, Self::Error> {
        (**self).check_and_use(check).await
    }

    async fn peek_usage(&self, probes: &[UsageProbe], timestamp: u64) -> Result<Vec<u64>, Self::Error> {
        (**self).peek_usage(probes, timestamp).await
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    count: u64,
    expires_at: u64,
}

type History = BTreeMap<u64, Bucket>;

/// Process-local usage store.
///
/// Every operation runs under one mutex, which makes `check_and_use` atomic for
/// all callers sharing this instance (clones share state). Expiry is evaluated
/// against the call timestamp: a bucket is gone once `timestamp >= start + ttl`.
#[derive(Default, Clone, Debug)]
pub struct InMemoryUsageStore {
    // counter key -> bucket start -> bucket
    data: Arc<Mutex<HashMap<CounterKey, History>>>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CounterKey, History>> {
        // Every critical section leaves the map consistent, so a poisoned lock is still usable.
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drop every bucket expired at `now`, and counter keys left empty.
    pub fn purge_expired(&self, now: u64) {
        let mut guard = self.lock();
        guard.retain(|_, history| {
            history.retain(|_, bucket| bucket.expires_at > now);
            !history.is_empty()
        });
        tracing::debug!(keys = guard.len(), "usage store purge complete");
    }

    /// Number of live bucket entries across all counter keys.
    pub fn bucket_entries(&self) -> usize {
        self.lock().values().map(BTreeMap::len).sum()
    }

    /// Number of counter keys holding at least one bucket.
    pub fn counter_keys(&self) -> usize {
        self.lock().len()
    }
}

fn window_sum(history: Option<&History>, probe: &UsageProbe, now: u64) -> u64 {
    let Some(history) = history else {
        return 0;
    };
    // Stored starts are aligned to the key's granularity, so the range holds
    // exactly the window's buckets and costs what is stored, not the window length.
    history
        .range(probe.oldest_bucket_start()..=probe.bucket_start)
        .map(|(_, bucket)| bucket)
        .filter(|bucket| bucket.expires_at > now)
        .fold(0u64, |acc, bucket| acc.saturating_add(bucket.count))
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    type Error = Infallible;

    async fn check_and_use(&self, check: &UsageCheck) -> Result<Vec<u64>, Self::Error> {
        let mut guard = self.lock();

        let used: Vec<u64> = check
            .probes
            .iter()
            .map(|probe| window_sum(guard.get(&probe.key), probe, check.timestamp))
            .collect();

        let granted =
            arbitrate(check.requested, check.probes.iter().map(|p| p.limit), used.iter().copied())
                .granted;

        for probe in &check.probes {
            let history = guard.entry(probe.key.clone()).or_default();
            history.retain(|_, bucket| bucket.expires_at > check.timestamp);
            if granted == 0 {
                continue;
            }
            let expires_at = probe.bucket_start.saturating_add(probe.ttl_seconds);
            let bucket = history
                .entry(probe.bucket_start)
                .or_insert(Bucket { count: 0, expires_at });
            bucket.count = bucket.count.saturating_add(granted);
            bucket.expires_at = bucket.expires_at.max(expires_at);
        }
        guard.retain(|_, history| !history.is_empty());

        Ok(used)
    }

    async fn peek_usage(&self, probes: &[UsageProbe], timestamp: u64) -> Result<Vec<u64>, Self::Error> {
        let guard = self.lock();
        Ok(probes.iter().map(|probe| window_sum(guard.get(&probe.key), probe, timestamp)).collect())
    }
}
