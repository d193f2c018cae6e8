//! Notification event groups and DIAL parameters.
//!
//! Event names are matched by substring so that versioned Thunder names
//! (`"4.onApplicationLaunchRequest"`, `"org.rdk.RDKShell.1.onSuspended"`)
//! classify the same as their bare form. Groups are checked in order:
//! DIAL requests, then lifecycle events, then state changes.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// DIAL request carried by a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DialEvent {
    Hide,
    Launch,
    Resume,
    Stop,
    State,
}

impl fmt::Display for DialEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DialEvent::Hide => "hide",
            DialEvent::Launch => "launch",
            DialEvent::Resume => "resume",
            DialEvent::Stop => "stop",
            DialEvent::State => "state",
        };
        f.write_str(name)
    }
}

/// DIAL event names, checked first and in this order.
pub const DIAL_EVENTS: [(&str, DialEvent); 5] = [
    ("onApplicationHideRequest", DialEvent::Hide),
    ("onApplicationLaunchRequest", DialEvent::Launch),
    ("onApplicationResumeRequest", DialEvent::Resume),
    ("onApplicationStopRequest", DialEvent::Stop),
    ("onApplicationStateRequest", DialEvent::State),
];

/// Application lifecycle event names.
pub const LIFECYCLE_EVENTS: [&str; 9] = [
    "onApplicationActivated",
    "onApplicationLaunched",
    "onApplicationResumed",
    "onApplicationSuspended",
    "onApplicationTerminated",
    "onDestroyed",
    "onLaunched",
    "onSuspended",
    "onPluginSuspended",
];

/// Substring marking a plugin state-change event.
pub const STATE_CHANGE_MARKER: &str = "statechange";

/// Listener group a notification routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    Dial(DialEvent),
    Lifecycle,
    StateChange,
    Unrecognised,
}

/// Classify an event name into its listener group.
pub fn classify_event(name: &str) -> EventCategory {
    if let Some((_, event)) = DIAL_EVENTS.iter().find(|(pattern, _)| name.contains(pattern)) {
        return EventCategory::Dial(*event);
    }
    if LIFECYCLE_EVENTS.iter().any(|pattern| name.contains(pattern)) {
        return EventCategory::Lifecycle;
    }
    if name.contains(STATE_CHANGE_MARKER) {
        return EventCategory::StateChange;
    }
    EventCategory::Unrecognised
}

/// Parameters of a DIAL request notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialParams {
    /// Application name
    #[serde(rename = "applicationName", deserialize_with = "lenient_string")]
    pub app_name: String,
    /// Application instance id
    #[serde(rename = "applicationId", deserialize_with = "lenient_string")]
    pub app_id: String,
    /// Launch payload
    #[serde(
        rename = "strPayLoad",
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_opt_string"
    )]
    pub payload: Option<String>,
    /// Launch query string
    #[serde(
        rename = "strQuery",
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_opt_string"
    )]
    pub query: Option<String>,
    /// Additional-data URL
    #[serde(
        rename = "strAddDataUrl",
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_opt_string"
    )]
    pub add_data_url: Option<String>,
}

/// Text form of a DIAL field: strings as-is, other scalars in their JSON
/// spelling, `null` as absent.
fn field_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(|value| field_text(value).unwrap_or_default())
}

fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(field_text)
}
