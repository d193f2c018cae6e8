//! # Correlation Engine
//!
//! Owns the correlator, the dispatcher and their two background tasks.
//!
//! ## Lifecycle
//!
//! 1. [`CorrelationEngine::new`] validates the config and builds the parts
//! 2. [`CorrelationEngine::start`] spawns the drain task and the reaper
//! 3. The transport reader feeds [`CorrelationEngine::on_message`]
//! 4. [`CorrelationEngine::shutdown`] wakes every waiter, stops and joins both tasks
//!
//! Engines are ordinary values; any number may coexist in one process.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::correlator::{reaper_task, Correlator, ReplyFuture};
use crate::dispatcher::{drain_task, Dispatcher, ListenerRegistry};
use crate::domain::{DialEvent, DialParams, Outcome, RequestId};
use crate::error::{CorrelationError, CorrelationResult};
use crate::metrics::{MetricsRecorder, NoOpMetrics};
use crate::router::{MessageRouter, Routed};

enum Lifecycle {
    Created,
    Running(Vec<JoinHandle<()>>),
    Stopped,
}

/// Reply correlation and notification dispatch for one connection.
pub struct CorrelationEngine {
    config: EngineConfig,
    correlator: Arc<Correlator>,
    dispatcher: Arc<Dispatcher>,
    router: MessageRouter,
    shutdown_tx: watch::Sender<bool>,
    lifecycle: Mutex<Lifecycle>,
}

impl CorrelationEngine {
    /// Create an engine without metrics.
    pub fn new(config: EngineConfig) -> CorrelationResult<Self> {
        Self::with_metrics(config, Arc::new(NoOpMetrics))
    }

    /// Create an engine reporting to `metrics`.
    pub fn with_metrics(
        config: EngineConfig,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> CorrelationResult<Self> {
        config.validate()?;

        let correlator = Arc::new(Correlator::with_metrics(
            config.default_timeout(),
            config.max_record_age(),
            Arc::clone(&metrics),
        ));
        let dispatcher = Arc::new(Dispatcher::with_metrics(
            Arc::new(ListenerRegistry::new()),
            metrics,
        ));
        let router = MessageRouter::new(Arc::clone(&correlator), Arc::clone(&dispatcher));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            correlator,
            dispatcher,
            router,
            shutdown_tx,
            lifecycle: Mutex::new(Lifecycle::Created),
        })
    }

    /// Spawn the drain task and the reaper on the current tokio runtime.
    pub fn start(&self) -> CorrelationResult<()> {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Created => {}
            Lifecycle::Running(_) => return Err(CorrelationError::AlreadyStarted),
            Lifecycle::Stopped => return Err(CorrelationError::ShuttingDown),
        }

        let drain = tokio::spawn(drain_task(
            Arc::clone(&self.dispatcher),
            self.shutdown_tx.subscribe(),
        ));
        let reaper = tokio::spawn(reaper_task(
            Arc::clone(&self.correlator),
            self.config.reaper_interval(),
            self.shutdown_tx.subscribe(),
        ));
        *lifecycle = Lifecycle::Running(vec![drain, reaper]);

        info!(
            reaper_interval_ms = self.config.reaper_interval_ms,
            max_record_age_ms = self.config.max_record_age_ms,
            default_timeout_ms = self.config.default_timeout_ms,
            "Correlation engine started"
        );
        Ok(())
    }

    /// Stop the engine.
    ///
    /// Every pending waiter wakes with [`Outcome::Abandoned`], queued
    /// notifications are discarded and both background tasks are joined.
    /// Calling this more than once is harmless.
    pub async fn shutdown(&self) {
        let tasks = match std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Stopped) {
            Lifecycle::Running(tasks) => tasks,
            Lifecycle::Created | Lifecycle::Stopped => Vec::new(),
        };

        info!("Shutting down correlation engine...");
        self.shutdown_tx.send_replace(true);
        let released = self.correlator.shutdown_all();
        let discarded = self.dispatcher.close();

        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        info!(released, discarded, "Correlation engine stopped");
    }

    /// Whether background tasks are running.
    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Running(_))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        self.dispatcher.listeners()
    }

    // Transport-facing

    /// Route one inbound frame.
    pub fn on_message(&self, raw: &str) -> Routed {
        self.router.on_message(raw)
    }

    /// Report a connectivity change.
    pub fn on_connection(&self, connected: bool) {
        self.router.on_connection(connected);
    }

    // Caller-facing

    pub async fn wait_for_reply(
        &self,
        id: RequestId,
        timeout: Duration,
    ) -> CorrelationResult<Outcome> {
        self.correlator.wait_for_reply(id, timeout).await
    }

    pub async fn wait_for_reply_default(&self, id: RequestId) -> CorrelationResult<Outcome> {
        self.correlator.wait_for_reply_default(id).await
    }

    pub fn complete_async(&self, id: RequestId) -> ReplyFuture {
        self.correlator.complete_async(id)
    }

    pub fn complete(&self, id: RequestId, payload: impl Into<String>) -> bool {
        self.correlator.complete(id, payload)
    }

    pub fn cancel(&self, id: RequestId) -> bool {
        self.correlator.cancel(id)
    }

    pub fn enqueue(&self, raw: impl Into<String>) -> bool {
        self.dispatcher.enqueue(raw)
    }

    pub fn count_pending(&self) -> usize {
        self.correlator.count_pending()
    }

    pub fn count_completed(&self) -> usize {
        self.correlator.count_completed()
    }

    pub fn count_records(&self) -> usize {
        self.correlator.count_records()
    }

    pub fn clear_completed(&self) -> usize {
        self.correlator.clear_completed()
    }

    // Listener registration

    pub fn set_dial_listener<F>(&self, listener: F)
    where
        F: Fn(DialEvent, &DialParams) + Send + Sync + 'static,
    {
        self.listeners().set_dial_listener(listener);
    }

    pub fn set_lifecycle_listener<F>(&self, listener: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.listeners().set_lifecycle_listener(listener);
    }

    pub fn set_state_change_listener<F>(&self, listener: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.listeners().set_state_change_listener(listener);
    }

    pub fn set_connection_listener<F>(&self, listener: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.listeners().set_connection_listener(listener);
    }
}

impl Drop for CorrelationEngine {
    fn drop(&mut self) {
        // Background tasks exit on this signal even without an explicit shutdown.
        self.shutdown_tx.send_replace(true);
    }
}

impl std::fmt::Debug for CorrelationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationEngine")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("correlator", &self.correlator)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}
