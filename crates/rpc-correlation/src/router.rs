//! Inbound frame routing from the transport reader.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::correlator::Correlator;
use crate::dispatcher::{invoke_isolated, Dispatcher};
use crate::domain::{inspect_frame, FrameKind};

/// Where a frame went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Delivered to a pending request
    Reply,
    /// Reply with no pending request
    LateReply,
    /// Queued for the notification listeners
    Notification,
    /// Dropped
    Dropped,
}

/// Splits inbound frames between the correlator and the dispatcher.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    correlator: Arc<Correlator>,
    dispatcher: Arc<Dispatcher>,
}

impl MessageRouter {
    pub fn new(correlator: Arc<Correlator>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            correlator,
            dispatcher,
        }
    }

    /// Handle one inbound frame.
    pub fn on_message(&self, raw: &str) -> Routed {
        match inspect_frame(raw) {
            Ok(FrameKind::Reply(id)) => {
                if self.correlator.complete(id, raw) {
                    Routed::Reply
                } else {
                    Routed::LateReply
                }
            }
            Ok(FrameKind::Notification) => {
                if self.dispatcher.enqueue(raw) {
                    Routed::Notification
                } else {
                    Routed::Dropped
                }
            }
            Err(e) => {
                warn!(error = %e, "Dropping unroutable inbound frame");
                Routed::Dropped
            }
        }
    }

    /// Forward a connectivity change to the connection listener.
    pub fn on_connection(&self, connected: bool) {
        debug!(connected, "Transport connectivity changed");
        if let Some(listener) = self.dispatcher.listeners().connection() {
            invoke_isolated("connection", "connection", || listener(connected));
        }
    }
}
