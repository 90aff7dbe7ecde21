//! Clock abstractions used to timestamp quota checks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Clock abstraction so timing can be faked in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Whole seconds since the Unix epoch.
    fn now_seconds(&self) -> u64;
}

/// Wall clock backed by `SystemTime::now()`.
///
/// Bucket boundaries are shared between processes through the store, so this
/// must be wall-clock time rather than a monotonic process-local instant.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_seconds(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
    }
}

/// Manually driven clock for tests; clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_seconds: u64) -> Self {
        Self { now: Arc::new(AtomicU64::new(start_seconds)) }
    }

    pub fn set(&self, seconds: u64) {
        self.now.store(seconds, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: u64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_seconds(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
