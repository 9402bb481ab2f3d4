//! Domain events emitted by the orchestrator.
//!
//! Events flow through a [`TelemetrySink`], which is a
//! `tower::Service<MeterEvent>`, so sinks compose with ordinary tower
//! combinators. Emission is best-effort: a sink that is not ready or fails
//! never affects the operation that produced the event.
//!
//! ```rust
//! use altmeter::telemetry::{MemorySink, MeterEvent};
//! use tower::Service;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut sink = MemorySink::new();
//! sink.call(MeterEvent::AltCleared { image_id: 7 }).await.unwrap();
//! assert_eq!(sink.events(), vec![MeterEvent::AltCleared { image_id: 7 }]);
//! # }
//! ```

use futures::future::BoxFuture;
use serde::Serialize;
use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tower::Service;

/// A telemetry sink that consumes meter events.
pub trait TelemetrySink:
    tower::Service<MeterEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    /// The error type for this sink.
    type SinkError: std::error::Error + Send + 'static;
}

/// Best-effort emit helper that honors `poll_ready` and swallows errors.
pub async fn emit_best_effort<S>(sink: S, event: MeterEvent)
where
    S: tower::Service<MeterEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

/// Something worth recording happened while metering or generating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MeterEvent {
    /// Alt text was generated and persisted.
    GenerationSucceeded { image_id: u64, site_id: String, bulk: bool },
    /// The generator answered with nothing usable. No quota consumed.
    EmptyResult { image_id: u64, bulk: bool },
    /// The generator call failed.
    GenerationFailed { image_id: u64, error: String, bulk: bool },
    /// Quota was exhausted before generating.
    QuotaDenied { usage: u64, limit: i64, is_pro: bool },
    /// The caller exceeded the request rate.
    RateLimited { caller: String, wait_ms: u64 },
    /// A bulk run finished.
    BulkCompleted { tagged: usize, candidates: usize },
    /// Alt text was cleared from an image.
    AltCleared { image_id: u64 },
    /// The account service did not know the site; one re-registration was tried.
    SiteReregistered { site_id: String, success: bool },
}

impl fmt::Display for MeterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeterEvent::GenerationSucceeded { image_id, bulk, .. } => {
                write!(f, "GenerationSucceeded(image={image_id}, bulk={bulk})")
            }
            MeterEvent::EmptyResult { image_id, .. } => write!(f, "EmptyResult(image={image_id})"),
            MeterEvent::GenerationFailed { image_id, error, .. } => {
                write!(f, "GenerationFailed(image={image_id}, error={error})")
            }
            MeterEvent::QuotaDenied { usage, limit, is_pro } => {
                write!(f, "QuotaDenied({usage}/{limit}, pro={is_pro})")
            }
            MeterEvent::RateLimited { caller, wait_ms } => {
                write!(f, "RateLimited(caller={caller}, wait={wait_ms}ms)")
            }
            MeterEvent::BulkCompleted { tagged, candidates } => {
                write!(f, "BulkCompleted({tagged}/{candidates})")
            }
            MeterEvent::AltCleared { image_id } => write!(f, "AltCleared(image={image_id})"),
            MeterEvent::SiteReregistered { site_id, success } => {
                write!(f, "SiteReregistered(site={site_id}, success={success})")
            }
        }
    }
}

type SinkFuture = BoxFuture<'static, Result<(), Infallible>>;

/// Discards every event.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<MeterEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: MeterEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// Logs events at INFO through `tracing`.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<MeterEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: MeterEvent) -> Self::Future {
        tracing::info!(event = %event, "meter_event");
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// Keeps events in memory, evicting the oldest past `capacity`.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<MeterEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    /// Bounded sink holding up to 10,000 events.
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Snapshot of the events received so far.
    pub fn events(&self) -> Vec<MeterEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<MeterEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: MeterEvent) -> Self::Future {
        let mut guard = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.len() >= self.capacity {
            guard.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push(event);
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}
