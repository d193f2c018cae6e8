// Allow missing docs for internal items in development
#![allow(missing_docs)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! # RPC Correlation
//!
//! Asynchronous JSON-RPC reply correlation and notification dispatch for a
//! single persistent bidirectional connection (e.g. a Thunder WebSocket).
//!
//! # Architecture
//!
//! ```text
//!                      transport reader
//!                             │ on_message(raw)
//!                     ┌───────┴────────┐
//!                     │ MessageRouter  │
//!                     └───┬────────┬───┘
//!              has `id`   │        │  `method`, no `id`
//!                         ▼        ▼
//!   ┌──────────────────────────┐  ┌──────────────────────────┐
//!   │       Correlator         │  │       Dispatcher         │
//!   │  id -> RequestRecord     │  │  FIFO queue (own lock)   │
//!   │  (own lock)              │  │                          │
//!   └───────┬──────────▲───────┘  └────────────┬─────────────┘
//!           │          │ sweep                 │ drain task
//!   wait_for_reply   Reaper                    ▼
//!   complete_async   (interval)      DIAL / lifecycle / state-change
//!                                    listeners
//! ```
//!
//! The two locks are never held together, and neither is held while a
//! caller waits or a listener runs.
//!
//! # Usage
//!
//! ```ignore
//! use rpc_correlation::{CorrelationEngine, EngineConfig, Outcome};
//!
//! let engine = CorrelationEngine::new(EngineConfig::from_env())?;
//! engine.set_lifecycle_listener(|event, params| println!("{event}: {params}"));
//! engine.start()?;
//!
//! // transport reader: engine.on_message(&frame);
//!
//! let reply = engine.complete_async(1001);
//! transport.send(request_with_id_1001).await?;
//! match reply.with_timeout(Duration::from_secs(5)).await {
//!     Outcome::Completed(frame) => { /* ... */ }
//!     other => { /* timed out, cancelled or abandoned */ }
//! }
//!
//! engine.shutdown().await;
//! ```

pub mod client;
pub mod config;
pub mod correlator;
pub mod dispatcher;
pub mod domain;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod router;

pub use client::{decode_result, JsonRpcRequest, RequestIdAllocator, RpcClient, RpcTransport};
pub use config::{ConfigError, EngineConfig};
pub use correlator::{reaper_task, Correlator, ReplyFuture};
pub use dispatcher::{drain_task, Dispatcher, ListenerRegistry};
pub use domain::{
    classify_event, DialEvent, DialParams, EventCategory, Notification, Outcome, RequestId,
    RequestState,
};
pub use engine::CorrelationEngine;
pub use error::{CorrelationError, CorrelationResult};
pub use metrics::{Metrics, MetricsRecorder, MetricsSnapshot, NoOpMetrics};
pub use router::{MessageRouter, Routed};
