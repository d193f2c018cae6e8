//! Listener slots, one per event category.
//!
//! Each slot holds at most one callback. Setting a slot replaces the
//! previous callback; clearing it disables delivery for that category.
//! Callbacks are cloned out of their slot before being invoked, so a
//! callback may replace or clear listeners without deadlocking.

use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

use crate::domain::{DialEvent, DialParams};

/// Callback for DIAL request events
pub type DialListener = Arc<dyn Fn(DialEvent, &DialParams) + Send + Sync>;
/// Callback for named events: `(event_name, params_json)`
pub type EventListener = Arc<dyn Fn(&str, &str) + Send + Sync>;
/// Callback for transport connectivity changes
pub type ConnectionListener = Arc<dyn Fn(bool) + Send + Sync>;

/// Current listener per category.
#[derive(Default)]
pub struct ListenerRegistry {
    dial: RwLock<Option<DialListener>>,
    lifecycle: RwLock<Option<EventListener>>,
    state_change: RwLock<Option<EventListener>>,
    connection: RwLock<Option<ConnectionListener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_dial_listener<F>(&self, listener: F)
    where
        F: Fn(DialEvent, &DialParams) + Send + Sync + 'static,
    {
        *self.dial.write() = Some(Arc::new(listener));
    }

    pub fn clear_dial_listener(&self) {
        *self.dial.write() = None;
    }

    pub fn set_lifecycle_listener<F>(&self, listener: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        *self.lifecycle.write() = Some(Arc::new(listener));
    }

    pub fn clear_lifecycle_listener(&self) {
        *self.lifecycle.write() = None;
    }

    pub fn set_state_change_listener<F>(&self, listener: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        *self.state_change.write() = Some(Arc::new(listener));
    }

    pub fn clear_state_change_listener(&self) {
        *self.state_change.write() = None;
    }

    pub fn set_connection_listener<F>(&self, listener: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        *self.connection.write() = Some(Arc::new(listener));
    }

    pub fn clear_connection_listener(&self) {
        *self.connection.write() = None;
    }

    pub(crate) fn dial(&self) -> Option<DialListener> {
        self.dial.read().clone()
    }

    pub(crate) fn lifecycle(&self) -> Option<EventListener> {
        self.lifecycle.read().clone()
    }

    pub(crate) fn state_change(&self) -> Option<EventListener> {
        self.state_change.read().clone()
    }

    pub(crate) fn connection(&self) -> Option<ConnectionListener> {
        self.connection.read().clone()
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("dial", &self.dial.read().is_some())
            .field("lifecycle", &self.lifecycle.read().is_some())
            .field("state_change", &self.state_change.read().is_some())
            .field("connection", &self.connection.read().is_some())
            .finish()
    }
}

/// Run a listener callback, containing any panic.
///
/// Returns `false` if the callback panicked.
pub(crate) fn invoke_isolated(category: &'static str, event: &str, callback: impl FnOnce()) -> bool {
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(()) => true,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            error!(category, event, reason = %reason, "Listener panicked; continuing");
            false
        }
    }
}
