//! # Notification Dispatcher
//!
//! FIFO queue of server-pushed notifications, drained by a single task.
//!
//! The queue has its own lock, independent of the correlator's map. The
//! drain task swaps the whole queue out under the lock and invokes
//! listeners with no lock held, so a slow listener never blocks producers.

mod listeners;

pub use listeners::{ConnectionListener, DialListener, EventListener, ListenerRegistry};

pub(crate) use listeners::invoke_isolated;

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tracing::{debug, trace, warn};

use crate::domain::{classify_event, EventCategory, Notification};
use crate::metrics::{MetricsRecorder, NoOpMetrics};

/// Ordered notification queue plus listener routing.
pub struct Dispatcher {
    queue: Mutex<VecDeque<String>>,
    wake: Notify,
    closed: AtomicBool,
    listeners: Arc<ListenerRegistry>,
    metrics: Arc<dyn MetricsRecorder>,
}

impl Dispatcher {
    /// Create a dispatcher without metrics
    pub fn new(listeners: Arc<ListenerRegistry>) -> Self {
        Self::with_metrics(listeners, Arc::new(NoOpMetrics))
    }

    /// Create a dispatcher reporting to `metrics`
    pub fn with_metrics(listeners: Arc<ListenerRegistry>, metrics: Arc<dyn MetricsRecorder>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            closed: AtomicBool::new(false),
            listeners,
            metrics,
        }
    }

    /// Append a raw notification and wake the drain task.
    ///
    /// Returns `false` if the dispatcher is closed.
    pub fn enqueue(&self, raw: impl Into<String>) -> bool {
        {
            let mut queue = self.queue.lock();
            if self.closed.load(Ordering::Acquire) {
                debug!("Notification after shutdown; dropped");
                return false;
            }
            queue.push_back(raw.into());
        }
        self.metrics.record_notification_enqueued();
        self.wake.notify_one();
        true
    }

    /// Notifications waiting for the next drain
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Listener slots used by this dispatcher
    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    /// Take every queued notification, leaving the queue empty.
    pub fn take_batch(&self) -> VecDeque<String> {
        std::mem::take(&mut *self.queue.lock())
    }

    /// Deliver a batch in order. Returns how many reached a listener.
    pub fn process_batch(&self, batch: VecDeque<String>) -> usize {
        let size = batch.len();
        let delivered = batch.iter().filter(|raw| self.dispatch(raw)).count();
        trace!(size, delivered, "Processed notification batch");
        delivered
    }

    /// Classify one raw notification and hand it to its listener.
    ///
    /// Returns `true` if a listener ran to completion.
    pub fn dispatch(&self, raw: &str) -> bool {
        let notification = match Notification::parse(raw) {
            Ok(notification) => notification,
            Err(e) => {
                self.metrics.record_notification_malformed();
                warn!(error = %e, "Dropping malformed notification");
                return false;
            }
        };
        let event = notification.name.as_str();

        let ran = match classify_event(event) {
            EventCategory::Dial(kind) => {
                let Some(params) = notification.dial_params() else {
                    warn!(event, "DIAL notification without usable params; dropped");
                    return false;
                };
                let Some(listener) = self.listeners.dial() else {
                    trace!(event, "No DIAL listener; dropped");
                    return false;
                };
                invoke_isolated("dial", event, || listener(kind, &params))
            }
            EventCategory::Lifecycle => {
                let Some(listener) = self.listeners.lifecycle() else {
                    trace!(event, "No lifecycle listener; dropped");
                    return false;
                };
                let params = notification.params_json();
                invoke_isolated("lifecycle", event, || listener(event, &params))
            }
            EventCategory::StateChange => {
                let Some(listener) = self.listeners.state_change() else {
                    trace!(event, "No state-change listener; dropped");
                    return false;
                };
                let params = notification.params_json();
                invoke_isolated("state_change", event, || listener(event, &params))
            }
            EventCategory::Unrecognised => {
                self.metrics.record_notification_unrecognised();
                warn!(event, "Unrecognised notification; dropped");
                return false;
            }
        };

        if ran {
            self.metrics.record_notification_dispatched();
        } else {
            self.metrics.record_listener_panic();
        }
        ran
    }

    /// Stop accepting notifications and discard the queue.
    ///
    /// Returns the number of discarded notifications.
    pub fn close(&self) -> usize {
        let discarded = {
            let mut queue = self.queue.lock();
            self.closed.store(true, Ordering::Release);
            let discarded = queue.len();
            queue.clear();
            discarded
        };
        self.wake.notify_waiters();
        if discarded > 0 {
            debug!(discarded, "Discarded undelivered notifications");
        }
        discarded
    }

    /// Whether [`close`](Self::close) has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("queued", &self.queued())
            .field("closed", &self.is_closed())
            .field("listeners", &self.listeners)
            .finish()
    }
}

/// Drain loop: wait for notifications, swap the queue out, deliver in order.
///
/// Runs until `shutdown` flips to `true` or its sender is dropped.
pub async fn drain_task(dispatcher: Arc<Dispatcher>, mut shutdown: watch::Receiver<bool>) {
    debug!("Notification drain started");

    loop {
        let batch = dispatcher.take_batch();
        if !batch.is_empty() {
            dispatcher.process_batch(batch);
            continue;
        }

        tokio::select! {
            _ = dispatcher.wake.notified() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    debug!("Notification drain stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DialEvent, DialParams};
    use crate::metrics::Metrics;
    use parking_lot::Mutex as PlMutex;
    use std::time::Duration;

    fn dispatcher() -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new(Arc::new(ListenerRegistry::new())))
    }

    fn frame(method: &str) -> String {
        format!(r#"{{"jsonrpc":"2.0","method":"{method}","params":{{"n":1}}}}"#)
    }

    #[test]
    fn test_batch_preserves_order() {
        let d = dispatcher();
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        d.listeners()
            .set_state_change_listener(move |event, _| s.lock().push(event.to_string()));

        for name in ["a.statechange", "b.statechange", "c.statechange"] {
            assert!(d.enqueue(frame(name)));
        }
        assert_eq!(d.queued(), 3);

        let batch = d.take_batch();
        assert_eq!(d.queued(), 0);
        assert_eq!(d.process_batch(batch), 3);
        assert_eq!(
            *seen.lock(),
            vec!["a.statechange", "b.statechange", "c.statechange"]
        );
    }

    #[test]
    fn test_dial_routing() {
        let d = dispatcher();
        let seen: Arc<PlMutex<Vec<(DialEvent, DialParams)>>> = Arc::new(PlMutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        d.listeners()
            .set_dial_listener(move |kind, params| s.lock().push((kind, params.clone())));

        let raw = r#"{"method":"4.onApplicationStopRequest","params":{"applicationName":"YouTube","applicationId":"7"}}"#;
        assert!(d.dispatch(raw));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, DialEvent::Stop);
        assert_eq!(seen[0].1.app_name, "YouTube");
        assert_eq!(seen[0].1.app_id, "7");
    }

    #[test]
    fn test_dial_with_loose_field_types_delivered() {
        let d = dispatcher();
        let seen: Arc<PlMutex<Vec<(DialEvent, DialParams)>>> = Arc::new(PlMutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        d.listeners()
            .set_dial_listener(move |kind, params| s.lock().push((kind, params.clone())));

        assert!(d.dispatch(
            r#"{"method":"onApplicationLaunchRequest","params":{"applicationName":"YouTube","applicationId":1234}}"#
        ));
        assert!(d.dispatch(
            r#"{"method":"onApplicationLaunchRequest","params":{"applicationName":null,"applicationId":1234}}"#
        ));

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, DialEvent::Launch);
        assert_eq!(seen[0].1.app_name, "YouTube");
        assert_eq!(seen[0].1.app_id, "1234");
        assert_eq!(seen[1].1.app_name, "");
    }

    #[test]
    fn test_dial_without_params_dropped() {
        let d = dispatcher();
        let hits = Arc::new(PlMutex::new(0));
        let h = Arc::clone(&hits);
        d.listeners().set_dial_listener(move |_, _| *h.lock() += 1);

        assert!(!d.dispatch(r#"{"method":"onApplicationLaunchRequest"}"#));
        assert_eq!(*hits.lock(), 0);
    }

    #[test]
    fn test_lifecycle_receives_params_json() {
        let d = dispatcher();
        let seen = Arc::new(PlMutex::new(None));
        let s = Arc::clone(&seen);
        d.listeners().set_lifecycle_listener(move |event, params| {
            *s.lock() = Some((event.to_string(), params.to_string()));
        });

        assert!(d.dispatch(&frame("org.rdk.RDKShell.1.onApplicationSuspended")));
        assert_eq!(
            seen.lock().clone(),
            Some((
                "org.rdk.RDKShell.1.onApplicationSuspended".to_string(),
                r#"{"n":1}"#.to_string()
            ))
        );
    }

    #[test]
    fn test_unrecognised_and_malformed_counted() {
        let metrics = Arc::new(Metrics::new());
        let d = Dispatcher::with_metrics(Arc::new(ListenerRegistry::new()), metrics.clone());

        assert!(!d.dispatch(&frame("foo.bar")));
        assert!(!d.dispatch("{not json"));
        assert!(!d.dispatch(r#"{"params":{}}"#));

        let snap = metrics.snapshot();
        assert_eq!(snap.notifications_unrecognised, 1);
        assert_eq!(snap.notifications_malformed, 2);
        assert_eq!(snap.notifications_dispatched, 0);
    }

    #[test]
    fn test_missing_listener_is_silent() {
        let d = dispatcher();
        assert!(!d.dispatch(&frame("onLaunched")));
        assert!(!d.dispatch(&frame("x.statechange")));
    }

    #[test]
    fn test_panicking_listener_does_not_stop_batch() {
        let metrics = Arc::new(Metrics::new());
        let d = Dispatcher::with_metrics(Arc::new(ListenerRegistry::new()), metrics.clone());
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        d.listeners().set_lifecycle_listener(move |event, _| {
            if event == "onDestroyed" {
                panic!("listener failure");
            }
            s.lock().push(event.to_string());
        });

        d.enqueue(frame("onLaunched"));
        d.enqueue(frame("onDestroyed"));
        d.enqueue(frame("onSuspended"));
        assert_eq!(d.process_batch(d.take_batch()), 2);
        assert_eq!(*seen.lock(), vec!["onLaunched", "onSuspended"]);
        assert_eq!(metrics.snapshot().listener_panics, 1);
    }

    #[test]
    fn test_close_discards_and_rejects() {
        let d = dispatcher();
        d.enqueue(frame("onLaunched"));
        assert_eq!(d.close(), 1);
        assert!(d.is_closed());
        assert!(!d.enqueue(frame("onLaunched")));
        assert_eq!(d.queued(), 0);
    }

    #[tokio::test]
    async fn test_drain_task_delivers_and_stops() {
        let d = dispatcher();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        d.listeners().set_lifecycle_listener(move |event, _| {
            let _ = tx.send(event.to_string());
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(drain_task(Arc::clone(&d), shutdown_rx));

        d.enqueue(frame("onLaunched"));
        d.enqueue(frame("onSuspended"));
        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(first.as_deref(), Some("onLaunched"));
        assert_eq!(second.as_deref(), Some("onSuspended"));

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
