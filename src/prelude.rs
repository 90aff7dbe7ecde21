//! Convenient re-exports for common windowquota types.
pub use crate::{
    clock::{Clock, ManualClock, SystemClock},
    error::{BatchError, QuotaError, StoreFailure},
    quota::{CounterKey, GrantedQuota, Quota, RequestedQuota},
    rate_limit::{InMemoryUsageStore, SlidingWindowRateLimiter, UsageStore},
    telemetry::{LogSink, MemorySink, NullSink, QuotaEvent, TelemetrySink},
    timeout::TimeoutPolicy,
};
