//! Sliding-window quota limiting.
//!
//! This module provides the building blocks for quota arbitration:
//! - [`SlidingWindowRateLimiter`]: evaluates batches of [`RequestedQuota`](crate::RequestedQuota)s.
//! - [`UsageStore`]: the shared counter store it reads and credits.
//! - [`InMemoryUsageStore`]: a process-local store for tests and single-process use.
//!
//! # Architecture
//!
//! - **Math**: [`arbitrate`](crate::arbitration::arbitrate) reduces a request
//!   through its quotas given the usage each one observed.
//! - **Storage**: `UsageStore` owns the bucketed usage history and evaluates one
//!   request atomically, enabling distributed backends (e.g., Redis) where many
//!   processes share counters.
//! - **Orchestration**: `SlidingWindowRateLimiter` walks a batch in order, bounds
//!   each round trip with a timeout and reports every decision to telemetry.

pub mod sliding_window;
pub mod store;

pub use sliding_window::SlidingWindowRateLimiter;
pub use store::{InMemoryUsageStore, UsageCheck, UsageProbe, UsageStore};
