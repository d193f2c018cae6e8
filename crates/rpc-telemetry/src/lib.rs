//! # RPC Telemetry
//!
//! Process-level observability for services embedding the correlation engine.
//!
//! ## Components
//!
//! - **Logs**: `tracing-subscriber` with an `EnvFilter`, human or JSON output
//! - **Metrics**: Prometheus collectors behind the engine's `MetricsRecorder` port
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rpc_telemetry::{init_telemetry, TelemetryConfig};
//! use rpc_correlation::{CorrelationEngine, EngineConfig};
//!
//! let telemetry = init_telemetry(TelemetryConfig::from_env())?;
//! let engine = CorrelationEngine::with_metrics(EngineConfig::from_env(), telemetry.recorder())?;
//! engine.start()?;
//!
//! // serve rpc_telemetry::encode_metrics() from a scrape endpoint
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RPC_SERVICE_NAME` | `rpc-correlation` | Service name in startup logs |
//! | `RPC_LOG_LEVEL` / `RUST_LOG` | `info` | Log filter |
//! | `RPC_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `RPC_JSON_LOGS` | `false` (`true` in containers) | JSON log lines |

#![allow(missing_docs)]

mod config;
mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use metrics::{
    encode_metrics, encode_registry, notification_result, request_outcome, PrometheusRecorder,
    REGISTRY,
};
pub use tracing_setup::{build_filter, init_tracing, TracingGuard};

use rpc_correlation::MetricsRecorder;
use std::sync::Arc;
use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to install tracing subscriber: {0}")]
    SubscriberInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Install logging and register engine metrics in the global registry.
///
/// Returns a guard holding the recorder to hand to the engine. Calling this
/// twice in one process fails rather than panicking.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    // Metrics first so a logging failure leaves nothing half-installed
    let recorder = Arc::new(PrometheusRecorder::new()?);
    let tracing = init_tracing(&config)?;

    Ok(TelemetryGuard {
        _tracing: tracing,
        recorder,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    _tracing: TracingGuard,
    recorder: Arc<PrometheusRecorder>,
}

impl TelemetryGuard {
    /// Recorder to pass to `CorrelationEngine::with_metrics`.
    pub fn recorder(&self) -> Arc<dyn MetricsRecorder> {
        self.recorder.clone()
    }

    /// The concrete Prometheus recorder.
    pub fn prometheus(&self) -> &Arc<PrometheusRecorder> {
        &self.recorder
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry...");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TelemetryError::MetricsInit("duplicate".into());
        assert!(err.to_string().contains("duplicate"));
    }
}
