//! Error types for quota arbitration
use std::time::Duration;

use crate::quota::GrantedQuota;

/// Boxed backend error carried through [`StoreFailure::Backend`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why the shared usage store could not answer.
#[derive(thiserror::Error, Debug)]
pub enum StoreFailure {
    /// The store round trip exceeded the configured timeout.
    #[error("store round trip timed out after {elapsed:?} (limit: {timeout:?})")]
    Timeout { elapsed: Duration, timeout: Duration },
    /// The store backend reported an error (connection refused, script error, ...).
    #[error("store backend error: {0}")]
    Backend(#[source] BoxError),
}

/// Unified error type for quota construction and arbitration.
#[derive(thiserror::Error, Debug)]
pub enum QuotaError {
    /// A quota definition violates its window/granularity/limit rules.
    #[error("invalid quota: {reason}")]
    InvalidQuota { reason: String },
    /// A request carries a unit count the store cannot represent.
    #[error("invalid request for '{prefix}': {reason}")]
    InvalidRequest { prefix: String, reason: String },
    /// The shared store could not be reached or did not answer in time.
    #[error("usage store unavailable: {0}")]
    StoreUnavailable(#[source] StoreFailure),
}

impl QuotaError {
    pub(crate) fn invalid_quota(reason: impl Into<String>) -> Self {
        Self::InvalidQuota { reason: reason.into() }
    }

    pub(crate) fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::StoreUnavailable(StoreFailure::Backend(Box::new(err)))
    }

    /// Check if this error rejected a quota or request before any store access.
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::InvalidQuota { .. } | Self::InvalidRequest { .. })
    }

    /// Check if this error is a store outage, including timeouts.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Check if this error is specifically a store timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::StoreUnavailable(StoreFailure::Timeout { .. }))
    }
}

/// A batch stopped at a store failure.
///
/// Requests ahead of `failed_index` were granted and recorded in the store;
/// they are not rolled back. Requests after it were never evaluated.
///
/// The failing request's own effect on the store is unknown. A timeout or a
/// malformed reply (a sum count that does not match the quota count) can
/// arrive after the store already credited the request.
#[derive(thiserror::Error, Debug)]
#[error("quota batch failed at request {failed_index} ({} granted before failure): {source}", .granted.len())]
pub struct BatchError {
    /// Results for the requests that completed, in input order.
    pub granted: Vec<GrantedQuota>,
    /// Index of the request whose store call failed.
    pub failed_index: usize,
    /// The failure itself.
    #[source]
    pub source: QuotaError,
}

impl BatchError {
    /// Split into completed results, failing index and cause.
    pub fn into_parts(self) -> (Vec<GrantedQuota>, usize, QuotaError) {
        (self.granted, self.failed_index, self.source)
    }
}
