use std::sync::Arc;
use std::time::Duration;

use crate::arbitration::arbitrate;
use crate::clock::{Clock, SystemClock};
use crate::error::{BatchError, QuotaError};
use crate::quota::{GrantedQuota, Quota, RequestedQuota};
use crate::rate_limit::store::{UsageCheck, UsageProbe, UsageStore};
use crate::telemetry::{emit_best_effort, NullSink, QuotaEvent, TelemetrySink};
use crate::timeout::TimeoutPolicy;

/// Sliding-window quota limiter over a shared [`UsageStore`].
///
/// Holds no usage state of its own; everything lives in the store, so any
/// number of limiters in any number of processes can share one store. Cloning
/// is cheap and clones share the store handle.
pub struct SlidingWindowRateLimiter<S, T = NullSink, C = SystemClock> {
    store: Arc<S>,
    sink: T,
    clock: C,
    timeout: TimeoutPolicy,
}

impl<S, T: Clone, C: Clone> Clone for SlidingWindowRateLimiter<S, T, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            sink: self.sink.clone(),
            clock: self.clock.clone(),
            timeout: self.timeout,
        }
    }
}

impl<S, T, C> std::fmt::Debug for SlidingWindowRateLimiter<S, T, C>
where
    C: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowRateLimiter")
            .field("store", &std::any::type_name::<S>())
            .field("clock", &self.clock)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<S> SlidingWindowRateLimiter<S>
where
    S: UsageStore + 'static,
{
    /// Create a limiter backed by `store`, using wall-clock time, no telemetry
    /// and the default store timeout.
    pub fn new(store: S) -> Self {
        tracing::info!(
            store = std::any::type_name::<S>(),
            timeout_ms = TimeoutPolicy::default().duration().as_millis() as u64,
            "creating sliding window rate limiter"
        );
        Self { store: Arc::new(store), sink: NullSink, clock: SystemClock, timeout: TimeoutPolicy::default() }
    }

    /// Create a limiter from validated settings.
    #[cfg(feature = "config")]
    pub fn from_config(
        store: S,
        config: &crate::config::LimiterConfig,
    ) -> Result<Self, crate::config::ConfigError> {
        config.validate()?;
        Ok(Self::new(store).with_store_timeout(config.store_timeout()))
    }
}

impl<S, T, C> SlidingWindowRateLimiter<S, T, C>
where
    S: UsageStore + 'static,
    T: TelemetrySink,
    T::Future: Send + 'static,
    C: Clock,
{
    /// Replace the clock used when no timestamp is given.
    pub fn with_clock<C2: Clock>(self, clock: C2) -> SlidingWindowRateLimiter<S, T, C2> {
        SlidingWindowRateLimiter { store: self.store, sink: self.sink, clock, timeout: self.timeout }
    }

    /// Send one [`QuotaEvent`] per evaluated request to `sink`.
    pub fn with_sink<T2>(self, sink: T2) -> SlidingWindowRateLimiter<S, T2, C>
    where
        T2: TelemetrySink,
    {
        SlidingWindowRateLimiter { store: self.store, sink, clock: self.clock, timeout: self.timeout }
    }

    /// Bound every store round trip. Panics if `timeout` is zero.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = TimeoutPolicy::new(timeout);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn sink(&self) -> &T {
        &self.sink
    }

    pub fn store_timeout(&self) -> Duration {
        self.timeout.duration()
    }

    /// Evaluate `requests` at the current clock time.
    ///
    /// See [`check_and_use_quotas_at`](Self::check_and_use_quotas_at).
    pub async fn check_and_use_quotas(
        &self,
        requests: &[RequestedQuota],
    ) -> Result<Vec<GrantedQuota>, BatchError> {
        self.check_and_use_quotas_at(requests, self.clock.now_seconds()).await
    }

    /// Grant and record each request in order at `timestamp` (seconds).
    ///
    /// Each request is one atomic store round trip and is recorded before the
    /// next one is evaluated, so later requests see earlier grants, including
    /// through shared override keys.
    ///
    /// # Errors
    /// On the first store failure the batch stops with a [`BatchError`]
    /// holding the results already recorded; they are not rolled back.
    pub async fn check_and_use_quotas_at(
        &self,
        requests: &[RequestedQuota],
        timestamp: u64,
    ) -> Result<Vec<GrantedQuota>, BatchError> {
        let mut granted = Vec::with_capacity(requests.len());
        for (index, request) in requests.iter().enumerate() {
            match self.check_one(request, timestamp).await {
                Ok(result) => granted.push(result),
                Err(source) => {
                    tracing::warn!(
                        prefix = request.prefix(),
                        failed_index = index,
                        completed = granted.len(),
                        error = %source,
                        "quota batch aborted"
                    );
                    return Err(BatchError { granted, failed_index: index, source });
                }
            }
        }
        Ok(granted)
    }

    async fn check_one(&self, request: &RequestedQuota, timestamp: u64) -> Result<GrantedQuota, QuotaError> {
        let quotas = request.quotas();
        let probes: Vec<UsageProbe> =
            quotas.iter().map(|quota| UsageProbe::new(quota, request.prefix(), timestamp)).collect();
        let check = UsageCheck::new(timestamp, request.requested(), probes);

        let used = match self.timeout.execute(self.store.check_and_use(&check)).await {
            Ok(used) => used,
            Err(err) => {
                self.emit(QuotaEvent::StoreFailed {
                    prefix: request.prefix().to_owned(),
                    error: err.to_string(),
                })
                .await;
                return Err(err);
            }
        };
        if used.len() != quotas.len() {
            return Err(QuotaError::backend(ProbeCountMismatch { expected: quotas.len(), got: used.len() }));
        }

        let outcome = arbitrate(request.requested(), quotas.iter().map(Quota::limit), used.iter().copied());
        let reached: Vec<Quota> = outcome.reached.iter().map(|&i| quotas[i].clone()).collect();

        tracing::debug!(
            prefix = request.prefix(),
            timestamp,
            requested = request.requested(),
            granted = outcome.granted,
            reached = reached.len(),
            "quota request evaluated"
        );

        let event = if reached.is_empty() {
            QuotaEvent::Granted {
                prefix: request.prefix().to_owned(),
                requested: request.requested(),
                granted: outcome.granted,
            }
        } else {
            QuotaEvent::Limited {
                prefix: request.prefix().to_owned(),
                requested: request.requested(),
                granted: outcome.granted,
                reached: reached.clone(),
            }
        };
        self.emit(event).await;

        Ok(GrantedQuota::new(request.prefix(), outcome.granted, reached))
    }

    /// Units used in `quota`'s window at `timestamp` for `prefix`, without
    /// recording anything.
    pub async fn usage(&self, prefix: &str, quota: &Quota, timestamp: u64) -> Result<u64, QuotaError> {
        let probes = [UsageProbe::new(quota, prefix, timestamp)];
        let used = self.timeout.execute(self.store.peek_usage(&probes, timestamp)).await?;
        used.first().copied().ok_or_else(|| QuotaError::backend(ProbeCountMismatch { expected: 1, got: 0 }))
    }

    async fn emit(&self, event: QuotaEvent) {
        emit_best_effort(self.sink.clone(), event).await;
    }
}

/// A store answered with a different number of sums than probes sent.
#[derive(thiserror::Error, Debug)]
#[error("store returned {got} window sums for {expected} quotas")]
struct ProbeCountMismatch {
    expected: usize,
    got: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::rate_limit::store::InMemoryUsageStore;
    use crate::telemetry::MemorySink;

    fn quota(window: u64, limit: u64) -> Quota {
        Quota::new(window, 1, limit).unwrap()
    }

    fn request(prefix: &str, requested: u64, quotas: &[Quota]) -> RequestedQuota {
        RequestedQuota::new(prefix, requested, quotas.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn empty_quota_list_grants_everything() {
        let limiter = SlidingWindowRateLimiter::new(InMemoryUsageStore::new());
        let resp = limiter.check_and_use_quotas_at(&[request("foo", 9, &[])], 100).await.unwrap();
        assert_eq!(resp, vec![GrantedQuota::new("foo", 9, vec![])]);
    }

    #[tokio::test]
    async fn empty_batch_returns_empty() {
        let limiter = SlidingWindowRateLimiter::new(InMemoryUsageStore::new());
        assert!(limiter.check_and_use_quotas_at(&[], 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_limit_always_denies() {
        let limiter = SlidingWindowRateLimiter::new(InMemoryUsageStore::new());
        let quotas = [quota(10, 0)];
        let resp = limiter.check_and_use_quotas_at(&[request("foo", 1, &quotas)], 100).await.unwrap();
        assert_eq!(resp, vec![GrantedQuota::new("foo", 0, quotas.to_vec())]);
    }

    #[tokio::test]
    async fn zero_request_leaves_usage_unchanged() {
        let store = InMemoryUsageStore::new();
        let limiter = SlidingWindowRateLimiter::new(store.clone());
        let quotas = [quota(10, 10)];

        limiter.check_and_use_quotas_at(&[request("foo", 3, &quotas)], 100).await.unwrap();
        for _ in 0..2 {
            let resp = limiter.check_and_use_quotas_at(&[request("foo", 0, &quotas)], 101).await.unwrap();
            assert_eq!(resp, vec![GrantedQuota::new("foo", 0, vec![])]);
        }
        assert_eq!(limiter.usage("foo", &quotas[0], 101).await.unwrap(), 3);
        assert_eq!(store.bucket_entries(), 1);
    }

    #[tokio::test]
    async fn uses_clock_when_no_timestamp_given() {
        let clock = ManualClock::new(100);
        let limiter =
            SlidingWindowRateLimiter::new(InMemoryUsageStore::new()).with_clock(clock.clone());
        let quotas = [quota(10, 2)];

        limiter.check_and_use_quotas(&[request("foo", 2, &quotas)]).await.unwrap();
        let resp = limiter.check_and_use_quotas(&[request("foo", 1, &quotas)]).await.unwrap();
        assert_eq!(resp[0].granted(), 0);

        clock.advance(10);
        let resp = limiter.check_and_use_quotas(&[request("foo", 1, &quotas)]).await.unwrap();
        assert_eq!(resp[0].granted(), 1);
    }

    #[tokio::test]
    async fn emits_one_event_per_request() {
        let sink = MemorySink::new();
        let limiter = SlidingWindowRateLimiter::new(InMemoryUsageStore::new()).with_sink(sink.clone());
        let quotas = [quota(10, 5)];

        limiter
            .check_and_use_quotas_at(&[request("a", 3, &quotas), request("a", 3, &quotas)], 100)
            .await
            .unwrap();

        assert_eq!(
            sink.events(),
            vec![
                QuotaEvent::Granted { prefix: "a".into(), requested: 3, granted: 3 },
                QuotaEvent::Limited {
                    prefix: "a".into(),
                    requested: 3,
                    granted: 2,
                    reached: quotas.to_vec(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn clones_share_the_store() {
        let limiter = SlidingWindowRateLimiter::new(InMemoryUsageStore::new());
        let other = limiter.clone();
        let quotas = [quota(10, 4)];

        limiter.check_and_use_quotas_at(&[request("foo", 3, &quotas)], 100).await.unwrap();
        let resp = other.check_and_use_quotas_at(&[request("foo", 3, &quotas)], 100).await.unwrap();
        assert_eq!(resp[0].granted(), 1);
    }

    #[cfg(feature = "config")]
    #[test]
    fn from_config_applies_timeout() {
        let config = crate::config::LimiterConfig { store_timeout_ms: 25 };
        let limiter = SlidingWindowRateLimiter::from_config(InMemoryUsageStore::new(), &config).unwrap();
        assert_eq!(limiter.store_timeout(), Duration::from_millis(25));

        let bad = crate::config::LimiterConfig { store_timeout_ms: 0 };
        assert!(SlidingWindowRateLimiter::from_config(InMemoryUsageStore::new(), &bad).is_err());
    }
}
