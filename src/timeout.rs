//! Deadline for store round trips

use crate::error::{QuotaError, StoreFailure};
use std::future::Future;
use std::time::{Duration, Instant};

/// Default bound on one store round trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    duration: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self { duration: DEFAULT_STORE_TIMEOUT }
    }
}

impl TimeoutPolicy {
    /// Create a timeout policy. Panics if duration is zero or `Duration::MAX`.
    pub fn new(duration: Duration) -> Self {
        assert!(
            duration > Duration::ZERO && duration < Duration::MAX,
            "timeout duration must be non-zero and finite",
        );
        Self { duration }
    }

    /// Inspect the configured timeout duration.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Run one store operation, mapping backend errors and an elapsed deadline
    /// to [`QuotaError::StoreUnavailable`].
    pub async fn execute<T, E, Fut>(&self, operation: Fut) -> Result<T, QuotaError>
    where
        E: std::error::Error + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>>,
    {
        let start = Instant::now();

        match tokio::time::timeout(self.duration, operation).await {
            Ok(result) => result.map_err(QuotaError::backend),
            Err(_) => {
                let elapsed = start.elapsed();
                Err(QuotaError::StoreUnavailable(StoreFailure::Timeout {
                    elapsed,
                    timeout: self.duration,
                }))
            }
        }
    }
}
