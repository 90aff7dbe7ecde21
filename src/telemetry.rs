//! Telemetry for quota decisions.
//!
//! The limiter emits one [`QuotaEvent`] per evaluated request. Events flow
//! through [`TelemetrySink`] implementations, which are plain
//! `tower::Service<QuotaEvent>`s, so they can log, aggregate or forward
//! decisions without the limiter knowing how.
//!
//! Emission is best-effort: a sink that is not ready or fails never changes a
//! grant.
//!
//! ```rust
//! use windowquota::telemetry::{MemorySink, QuotaEvent};
//! use tower::Service;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut sink = MemorySink::new();
//! let event = QuotaEvent::Granted { prefix: "org:1".into(), requested: 3, granted: 3 };
//!
//! sink.call(event.clone()).await.unwrap();
//! assert_eq!(sink.events(), vec![event]);
//! # }
//! ```

use std::collections::VecDeque;
use std::convert::Infallible;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tower::Service;

use crate::quota::Quota;

/// A telemetry sink that consumes quota events.
pub trait TelemetrySink:
    tower::Service<QuotaEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    /// The error type for this sink.
    type SinkError: std::error::Error + Send + 'static;
}

/// Best-effort emit helper that honors `poll_ready` and swallows errors.
pub async fn emit_best_effort<S>(sink: S, event: QuotaEvent)
where
    S: tower::Service<QuotaEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

/// Outcome of one evaluated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaEvent {
    /// Every quota had room; the full request was granted.
    Granted {
        /// Requesting prefix
        prefix: String,
        /// Units asked for
        requested: u64,
        /// Units granted (equal to `requested`)
        granted: u64,
    },
    /// At least one quota cut the grant.
    Limited {
        /// Requesting prefix
        prefix: String,
        /// Units asked for
        requested: u64,
        /// Units granted, possibly zero
        granted: u64,
        /// Quotas that reduced the grant, in request order
        reached: Vec<Quota>,
    },
    /// The store call for this request failed; nothing was granted or recorded.
    StoreFailed {
        /// Requesting prefix
        prefix: String,
        /// Rendered store error
        error: String,
    },
}

impl QuotaEvent {
    /// Prefix the event refers to.
    pub fn prefix(&self) -> &str {
        match self {
            QuotaEvent::Granted { prefix, .. }
            | QuotaEvent::Limited { prefix, .. }
            | QuotaEvent::StoreFailed { prefix, .. } => prefix,
        }
    }
}

impl fmt::Display for QuotaEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaEvent::Granted { prefix, requested, granted } => {
                write!(f, "Granted({}, {}/{})", prefix, granted, requested)
            }
            QuotaEvent::Limited { prefix, requested, granted, reached } => {
                write!(f, "Limited({}, {}/{}, reached=[", prefix, granted, requested)?;
                for (i, quota) in reached.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", quota)?;
                }
                write!(f, "])")
            }
            QuotaEvent::StoreFailed { prefix, error } => {
                write!(f, "StoreFailed({}, {})", prefix, error)
            }
        }
    }
}

type BoxedReady = Pin<Box<dyn std::future::Future<Output = Result<(), Infallible>> + Send>>;

/// A no-op telemetry sink that discards all events.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<QuotaEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = BoxedReady;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: QuotaEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// A telemetry sink that logs events using the `tracing` crate.
///
/// Full grants log at DEBUG, limited grants at INFO, store failures at WARN.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<QuotaEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = BoxedReady;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: QuotaEvent) -> Self::Future {
        match &event {
            QuotaEvent::Granted { .. } => tracing::debug!(event = %event, "quota_event"),
            QuotaEvent::Limited { .. } => tracing::info!(event = %event, "quota_event"),
            QuotaEvent::StoreFailed { .. } => tracing::warn!(event = %event, "quota_event"),
        }
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// Keeps the most recent quota events in memory, dropping the oldest once
/// `capacity` is reached. Clones share the buffer.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<VecDeque<QuotaEvent>>>,
    capacity: usize,
}

impl MemorySink {
    /// Keeps up to 10,000 events.
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { events: Arc::new(Mutex::new(VecDeque::new())), capacity: capacity.max(1) }
    }

    fn guard(&self) -> MutexGuard<'_, VecDeque<QuotaEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of the retained events, oldest first.
    pub fn events(&self) -> Vec<QuotaEvent> {
        self.guard().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.guard().clear();
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<QuotaEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = BoxedReady;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: QuotaEvent) -> Self::Future {
        let mut events = self.guard();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}
