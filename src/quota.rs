//! Quota value objects.
//!
//! A [`Quota`] is one admission rule: a trailing window, the bucket width it is
//! stored at, a unit limit and an optional shared-counter override. A
//! [`RequestedQuota`] is one caller's ask against an ordered list of quotas and a
//! [`GrantedQuota`] is what the limiter decided.
//!
//! All three are plain data; they carry no connection to the usage store.

use std::fmt;

use crate::error::QuotaError;

/// Largest unit count a quota limit or request may carry.
///
/// 2^53: the largest range in which every integer survives a round trip
/// through a double, which is how Redis Lua scripts hold numbers.
pub const MAX_UNITS: u64 = 1 << 53;

/// Most buckets one quota window may span (a day of one-second buckets).
///
/// Every request reads each bucket of each window, so this bounds the work a
/// single store round trip can do.
pub const MAX_BUCKETS: u64 = 86_400;

/// One admission rule.
///
/// Construct through [`Quota::new`], which rejects zero granularity, a
/// granularity wider than the window and limits the store cannot represent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "config",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "crate::config::QuotaConfig", into = "crate::config::QuotaConfig")
)]
pub struct Quota {
    window_seconds: u64,
    granularity_seconds: u64,
    limit: u64,
    prefix_override: Option<String>,
}

impl Quota {
    /// Create a quota allowing `limit` units per trailing `window_seconds`,
    /// tracked in buckets of `granularity_seconds`.
    ///
    /// # Errors
    /// Returns [`QuotaError::InvalidQuota`] if `granularity_seconds` is zero or
    /// larger than `window_seconds`, if the window spans more than
    /// [`MAX_BUCKETS`] buckets, or if `limit` exceeds [`MAX_UNITS`].
    pub fn new(window_seconds: u64, granularity_seconds: u64, limit: u64) -> Result<Self, QuotaError> {
        if granularity_seconds == 0 {
            return Err(QuotaError::invalid_quota("granularity_seconds must be positive"));
        }
        if granularity_seconds > window_seconds {
            return Err(QuotaError::invalid_quota(format!(
                "granularity_seconds ({granularity_seconds}) exceeds window_seconds ({window_seconds})"
            )));
        }
        if limit > MAX_UNITS {
            return Err(QuotaError::invalid_quota(format!("limit {limit} exceeds {MAX_UNITS}")));
        }
        let quota = Self { window_seconds, granularity_seconds, limit, prefix_override: None };
        if quota.bucket_count() > MAX_BUCKETS {
            return Err(QuotaError::invalid_quota(format!(
                "window of {window_seconds}s at {granularity_seconds}s granularity spans {} buckets, more than {MAX_BUCKETS}",
                quota.bucket_count()
            )));
        }
        Ok(quota)
    }

    /// Track usage under `prefix` instead of the requester's own prefix.
    pub fn with_prefix_override(mut self, prefix: impl Into<String>) -> Self {
        self.prefix_override = Some(prefix.into());
        self
    }

    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    pub fn granularity_seconds(&self) -> u64 {
        self.granularity_seconds
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn prefix_override(&self) -> Option<&str> {
        self.prefix_override.as_deref()
    }

    /// Number of buckets summed per window, rounded up to whole buckets.
    pub fn bucket_count(&self) -> u64 {
        self.window_seconds / self.granularity_seconds
            + u64::from(self.window_seconds % self.granularity_seconds != 0)
    }

    /// Start of the bucket containing `timestamp`.
    pub fn bucket_start(&self, timestamp: u64) -> u64 {
        timestamp - timestamp % self.granularity_seconds
    }

    /// Lifetime of a bucket in the store: one window plus one bucket.
    pub fn ttl_seconds(&self) -> u64 {
        self.window_seconds.saturating_add(self.granularity_seconds)
    }

    /// Identity under which this quota's usage is stored for a caller.
    pub fn counter_key(&self, request_prefix: &str) -> CounterKey {
        let prefix = self.prefix_override.as_deref().unwrap_or(request_prefix);
        CounterKey {
            prefix: prefix.to_owned(),
            window_seconds: self.window_seconds,
            granularity_seconds: self.granularity_seconds,
        }
    }
}

impl fmt::Display for Quota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}s@{}s", self.limit, self.window_seconds, self.granularity_seconds)?;
        if let Some(prefix) = &self.prefix_override {
            write!(f, "[{prefix}]")?;
        }
        Ok(())
    }
}

/// Derived identity of one usage history.
///
/// Two quotas with the same key read and write the same buckets regardless of
/// which request they arrive in. Only [`Quota::counter_key`] builds these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CounterKey {
    prefix: String,
    window_seconds: u64,
    granularity_seconds: u64,
}

impl CounterKey {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    pub fn granularity_seconds(&self) -> u64 {
        self.granularity_seconds
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.prefix, self.window_seconds, self.granularity_seconds)
    }
}

/// One caller's ask: `requested` units under `prefix`, subject to every quota
/// in `quotas`, evaluated in list order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedQuota {
    prefix: String,
    requested: u64,
    quotas: Vec<Quota>,
}

impl RequestedQuota {
    /// # Errors
    /// Returns [`QuotaError::InvalidRequest`] if `requested` exceeds [`MAX_UNITS`].
    pub fn new(prefix: impl Into<String>, requested: u64, quotas: Vec<Quota>) -> Result<Self, QuotaError> {
        let prefix = prefix.into();
        if requested > MAX_UNITS {
            return Err(QuotaError::InvalidRequest {
                prefix,
                reason: format!("requested {requested} exceeds {MAX_UNITS}"),
            });
        }
        Ok(Self { prefix, requested, quotas })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn requested(&self) -> u64 {
        self.requested
    }

    pub fn quotas(&self) -> &[Quota] {
        &self.quotas
    }
}

/// Outcome of one [`RequestedQuota`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantedQuota {
    prefix: String,
    granted: u64,
    reached_quotas: Vec<Quota>,
}

impl GrantedQuota {
    pub fn new(prefix: impl Into<String>, granted: u64, reached_quotas: Vec<Quota>) -> Self {
        Self { prefix: prefix.into(), granted, reached_quotas }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Units allowed, never more than requested.
    pub fn granted(&self) -> u64 {
        self.granted
    }

    /// Quotas that strictly reduced the grant, in request order.
    pub fn reached_quotas(&self) -> &[Quota] {
        &self.reached_quotas
    }

    /// True when at least one quota cut the grant below the request.
    pub fn is_limited(&self) -> bool {
        !self.reached_quotas.is_empty()
    }
}
