//! Metrics hooks for correlation and dispatch.
//!
//! The engine reports every state transition through a [`MetricsRecorder`].
//! [`Metrics`] is the built-in lock-free collector; `rpc-telemetry` provides a
//! Prometheus-backed recorder for production processes.
//!
//! ```ignore
//! use std::sync::Arc;
//! use rpc_correlation::{CorrelationEngine, EngineConfig, Metrics};
//!
//! let metrics = Arc::new(Metrics::new());
//! let engine = CorrelationEngine::with_metrics(EngineConfig::default(), metrics.clone())?;
//! // ...
//! println!("{:?}", metrics.snapshot());
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Port for metrics recording implementations.
///
/// Implement this to integrate with an external metrics system.
pub trait MetricsRecorder: Send + Sync {
    /// A new pending record was created
    fn record_registered(&self);

    /// A pending record received its reply
    fn record_completed(&self, latency: Duration);

    /// A waiter gave up on a pending record
    fn record_timed_out(&self);

    /// A pending record was cancelled
    fn record_cancelled(&self);

    /// The reaper removed `count` records in one sweep
    fn record_reaped(&self, count: usize);

    /// A reply arrived with no pending record to receive it
    fn record_late_reply(&self);

    /// Current number of records in the correlation map
    fn record_in_flight(&self, count: usize);

    /// A notification entered the dispatch queue
    fn record_notification_enqueued(&self);

    /// A notification was handed to a listener
    fn record_notification_dispatched(&self);

    /// A notification matched no known event group
    fn record_notification_unrecognised(&self);

    /// A notification could not be parsed
    fn record_notification_malformed(&self);

    /// A listener callback panicked
    fn record_listener_panic(&self);
}

/// No-op metrics recorder for when metrics are disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpMetrics;

impl MetricsRecorder for NoOpMetrics {
    fn record_registered(&self) {}
    fn record_completed(&self, _latency: Duration) {}
    fn record_timed_out(&self) {}
    fn record_cancelled(&self) {}
    fn record_reaped(&self, _count: usize) {}
    fn record_late_reply(&self) {}
    fn record_in_flight(&self, _count: usize) {}
    fn record_notification_enqueued(&self) {}
    fn record_notification_dispatched(&self) {}
    fn record_notification_unrecognised(&self) {}
    fn record_notification_malformed(&self) {}
    fn record_listener_panic(&self) {}
}

/// In-process metrics collector
///
/// Thread-safe counters for correlation and dispatch activity.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Records created
    pub registered: AtomicU64,
    /// Records completed by a reply
    pub completed: AtomicU64,
    /// Waits that timed out
    pub timed_out: AtomicU64,
    /// Records cancelled
    pub cancelled: AtomicU64,
    /// Records removed by the reaper
    pub reaped: AtomicU64,
    /// Replies with no pending record
    pub late_replies: AtomicU64,
    /// Records in the map at the last observation
    pub in_flight: AtomicU64,
    /// Notifications queued
    pub notifications_enqueued: AtomicU64,
    /// Notifications delivered to a listener
    pub notifications_dispatched: AtomicU64,
    /// Notifications with no matching event group
    pub notifications_unrecognised: AtomicU64,
    /// Notifications that failed to parse
    pub notifications_malformed: AtomicU64,
    /// Listener callbacks that panicked
    pub listener_panics: AtomicU64,
    /// Cumulative reply latency in microseconds
    pub reply_latency_us: AtomicU64,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Average reply latency in microseconds
    pub fn avg_reply_latency_us(&self) -> u64 {
        let total = self.reply_latency_us.load(Ordering::Relaxed);
        let count = self.completed.load(Ordering::Relaxed);
        if count > 0 {
            total / count
        } else {
            0
        }
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            registered: self.registered.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            reaped: self.reaped.load(Ordering::Relaxed),
            late_replies: self.late_replies.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            notifications_enqueued: self.notifications_enqueued.load(Ordering::Relaxed),
            notifications_dispatched: self.notifications_dispatched.load(Ordering::Relaxed),
            notifications_unrecognised: self.notifications_unrecognised.load(Ordering::Relaxed),
            notifications_malformed: self.notifications_malformed.load(Ordering::Relaxed),
            listener_panics: self.listener_panics.load(Ordering::Relaxed),
            avg_reply_latency_us: self.avg_reply_latency_us(),
        }
    }
}

impl MetricsRecorder for Metrics {
    fn record_registered(&self) {
        self.registered.fetch_add(1, Ordering::Relaxed);
    }

    fn record_completed(&self, latency: Duration) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.reply_latency_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    fn record_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    fn record_reaped(&self, count: usize) {
        self.reaped.fetch_add(count as u64, Ordering::Relaxed);
    }

    fn record_late_reply(&self) {
        self.late_replies.fetch_add(1, Ordering::Relaxed);
    }

    fn record_in_flight(&self, count: usize) {
        self.in_flight.store(count as u64, Ordering::Relaxed);
    }

    fn record_notification_enqueued(&self) {
        self.notifications_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    fn record_notification_dispatched(&self) {
        self.notifications_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    fn record_notification_unrecognised(&self) {
        self.notifications_unrecognised
            .fetch_add(1, Ordering::Relaxed);
    }

    fn record_notification_malformed(&self) {
        self.notifications_malformed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_listener_panic(&self) {
        self.listener_panics.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time metrics snapshot
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub registered: u64,
    pub completed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub reaped: u64,
    pub late_replies: u64,
    pub in_flight: u64,
    pub notifications_enqueued: u64,
    pub notifications_dispatched: u64,
    pub notifications_unrecognised: u64,
    pub notifications_malformed: u64,
    pub listener_panics: u64,
    pub avg_reply_latency_us: u64,
}
