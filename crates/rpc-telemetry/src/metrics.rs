//! Prometheus metrics for the correlation engine.
//!
//! All metrics follow the naming convention: `rpc_<area>_<metric>_<unit>`
//!
//! [`PrometheusRecorder`] implements the engine's
//! [`MetricsRecorder`](rpc_correlation::MetricsRecorder) port, so an engine
//! built with it reports straight into a Prometheus registry.

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge,
    Opts, Registry, TextEncoder,
};
use rpc_correlation::MetricsRecorder;
use std::time::Duration;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();
}

/// Request lifecycle labels for `rpc_requests_total`.
pub mod request_outcome {
    pub const REGISTERED: &str = "registered";
    pub const COMPLETED: &str = "completed";
    pub const TIMED_OUT: &str = "timed_out";
    pub const CANCELLED: &str = "cancelled";
    pub const REAPED: &str = "reaped";
    pub const LATE_REPLY: &str = "late_reply";
}

/// Notification result labels for `rpc_notifications_total`.
pub mod notification_result {
    pub const ENQUEUED: &str = "enqueued";
    pub const DISPATCHED: &str = "dispatched";
    pub const UNRECOGNISED: &str = "unrecognised";
    pub const MALFORMED: &str = "malformed";
}

/// Engine metrics backed by Prometheus collectors.
#[derive(Clone)]
pub struct PrometheusRecorder {
    requests: IntCounterVec,
    in_flight: IntGauge,
    reply_latency: Histogram,
    notifications: IntCounterVec,
    listener_panics: IntCounter,
}

impl PrometheusRecorder {
    /// Create and register collectors in the global [`REGISTRY`].
    pub fn new() -> Result<Self, TelemetryError> {
        Self::register(&REGISTRY)
    }

    /// Create and register collectors in `registry`.
    pub fn register(registry: &Registry) -> Result<Self, TelemetryError> {
        let requests = IntCounterVec::new(
            Opts::new("rpc_requests_total", "Correlated requests by lifecycle outcome"),
            &["outcome"],
        )
        .map_err(metrics_err)?;

        let in_flight = IntGauge::new(
            "rpc_requests_in_flight",
            "Records in the correlation map at the last sweep",
        )
        .map_err(metrics_err)?;

        let reply_latency = Histogram::with_opts(
            HistogramOpts::new(
                "rpc_reply_latency_seconds",
                "Time from record creation to reply delivery",
            )
            .buckets(exponential_buckets(0.0005, 2.0, 16).map_err(metrics_err)?),
        )
        .map_err(metrics_err)?;

        let notifications = IntCounterVec::new(
            Opts::new("rpc_notifications_total", "Notifications by dispatch result"),
            &["result"],
        )
        .map_err(metrics_err)?;

        let listener_panics = IntCounter::new(
            "rpc_listener_panics_total",
            "Listener callbacks that panicked",
        )
        .map_err(metrics_err)?;

        registry
            .register(Box::new(requests.clone()))
            .map_err(metrics_err)?;
        registry
            .register(Box::new(in_flight.clone()))
            .map_err(metrics_err)?;
        registry
            .register(Box::new(reply_latency.clone()))
            .map_err(metrics_err)?;
        registry
            .register(Box::new(notifications.clone()))
            .map_err(metrics_err)?;
        registry
            .register(Box::new(listener_panics.clone()))
            .map_err(metrics_err)?;

        Ok(Self {
            requests,
            in_flight,
            reply_latency,
            notifications,
            listener_panics,
        })
    }

    fn request(&self, outcome: &str, by: u64) {
        self.requests.with_label_values(&[outcome]).inc_by(by);
    }

    fn notification(&self, result: &str) {
        self.notifications.with_label_values(&[result]).inc();
    }
}

impl MetricsRecorder for PrometheusRecorder {
    fn record_registered(&self) {
        self.request(request_outcome::REGISTERED, 1);
    }

    fn record_completed(&self, latency: Duration) {
        self.request(request_outcome::COMPLETED, 1);
        self.reply_latency.observe(latency.as_secs_f64());
    }

    fn record_timed_out(&self) {
        self.request(request_outcome::TIMED_OUT, 1);
    }

    fn record_cancelled(&self) {
        self.request(request_outcome::CANCELLED, 1);
    }

    fn record_reaped(&self, count: usize) {
        if count > 0 {
            self.request(request_outcome::REAPED, count as u64);
        }
    }

    fn record_late_reply(&self) {
        self.request(request_outcome::LATE_REPLY, 1);
    }

    fn record_in_flight(&self, count: usize) {
        self.in_flight.set(count as i64);
    }

    fn record_notification_enqueued(&self) {
        self.notification(notification_result::ENQUEUED);
    }

    fn record_notification_dispatched(&self) {
        self.notification(notification_result::DISPATCHED);
    }

    fn record_notification_unrecognised(&self) {
        self.notification(notification_result::UNRECOGNISED);
    }

    fn record_notification_malformed(&self) {
        self.notification(notification_result::MALFORMED);
    }

    fn record_listener_panic(&self) {
        self.listener_panics.inc();
    }
}

impl std::fmt::Debug for PrometheusRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusRecorder").finish_non_exhaustive()
    }
}

fn metrics_err(e: prometheus::Error) -> TelemetryError {
    TelemetryError::MetricsInit(e.to_string())
}

/// Encode all metrics in the global registry as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    encode_registry(&REGISTRY)
}

/// Encode all metrics in `registry` as Prometheus text format.
pub fn encode_registry(registry: &Registry) -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(metrics_err)?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpc_correlation::{CorrelationEngine, EngineConfig};
    use std::sync::Arc;

    #[test]
    fn test_register_in_fresh_registry() {
        let registry = Registry::new();
        assert!(PrometheusRecorder::register(&registry).is_ok());
        // Same names twice in one registry is rejected.
        assert!(matches!(
            PrometheusRecorder::register(&registry),
            Err(TelemetryError::MetricsInit(_))
        ));
    }

    #[test]
    fn test_counters_and_gauge() {
        let registry = Registry::new();
        let recorder = PrometheusRecorder::register(&registry).unwrap();

        recorder.record_registered();
        recorder.record_completed(Duration::from_millis(3));
        recorder.record_reaped(0);
        recorder.record_reaped(4);
        recorder.record_in_flight(12);
        recorder.record_notification_unrecognised();
        recorder.record_listener_panic();

        let text = encode_registry(&registry).unwrap();
        assert!(text.contains(r#"rpc_requests_total{outcome="registered"} 1"#));
        assert!(text.contains(r#"rpc_requests_total{outcome="reaped"} 4"#));
        assert!(text.contains("rpc_requests_in_flight 12"));
        assert!(text.contains(r#"rpc_notifications_total{result="unrecognised"} 1"#));
        assert!(text.contains("rpc_listener_panics_total 1"));
        assert!(text.contains("rpc_reply_latency_seconds_count 1"));
    }

    #[tokio::test]
    async fn test_engine_reports_through_recorder() {
        let registry = Registry::new();
        let recorder = Arc::new(PrometheusRecorder::register(&registry).unwrap());
        let engine = CorrelationEngine::with_metrics(EngineConfig::default(), recorder).unwrap();

        let reply = engine.complete_async(1001);
        engine.on_message(r#"{"jsonrpc":"2.0","id":1001,"result":0}"#);
        engine.on_message(r#"{"jsonrpc":"2.0","id":5,"result":0}"#);
        assert!(reply.await.is_completed());

        let text = encode_registry(&registry).unwrap();
        assert!(text.contains(r#"rpc_requests_total{outcome="completed"} 1"#));
        assert!(text.contains(r#"rpc_requests_total{outcome="late_reply"} 1"#));
    }
}
