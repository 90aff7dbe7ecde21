#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # windowquota
//!
//! Distributed sliding-window quota arbitration: decide how many of the units a
//! caller asks for may be granted right now, against several windowed limits at
//! once, with usage tracked in a store shared by every process.
//!
//! ## Features
//!
//! - **Multiple quotas per request** with different windows, evaluated in order
//! - **Bucketed, self-expiring counters** instead of an unbounded request log
//! - **Shared counters** through per-quota prefix overrides
//! - **Ordered batches**: later requests see earlier grants in the same call
//! - **Pluggable stores**: in-memory here, Redis in `windowquota-redis`
//!
//! ## Quick Start
//!
//! ```rust
//! use windowquota::{InMemoryUsageStore, Quota, RequestedQuota, SlidingWindowRateLimiter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let limiter = SlidingWindowRateLimiter::new(InMemoryUsageStore::new());
//!     let quotas = vec![
//!         Quota::new(10, 1, 10)?,
//!         Quota::new(5, 1, 5)?,
//!     ];
//!
//!     let granted = limiter
//!         .check_and_use_quotas_at(&[RequestedQuota::new("foo", 6, quotas.clone())?], 100)
//!         .await?;
//!
//!     assert_eq!(granted[0].granted(), 5);
//!     assert_eq!(granted[0].reached_quotas(), &quotas[1..]);
//!     Ok(())
//! }
//! ```

pub mod arbitration;
pub mod clock;
#[cfg(feature = "config")]
pub mod config;
pub mod error;
pub mod quota;
pub mod prelude;
pub mod rate_limit;
pub mod telemetry;
pub mod timeout;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{BatchError, QuotaError, StoreFailure};
pub use quota::{CounterKey, GrantedQuota, Quota, RequestedQuota, MAX_BUCKETS, MAX_UNITS};
pub use rate_limit::{InMemoryUsageStore, SlidingWindowRateLimiter, UsageCheck, UsageProbe, UsageStore};
pub use timeout::TimeoutPolicy;
