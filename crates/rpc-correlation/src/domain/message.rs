//! Inbound frame inspection.
//!
//! A frame carrying an `id` is a reply; a frame carrying a `method` and no
//! `id` is a notification. Everything else is unroutable.

use serde_json::{Map, Value};

use super::events::DialParams;
use super::record::RequestId;

/// Reasons a frame could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Not valid JSON
    #[error("invalid JSON: {0}")]
    Json(String),
    /// Valid JSON but not an object
    #[error("frame is not a JSON object")]
    NotAnObject,
    /// `id` present but not an integer
    #[error("non-numeric id: {0}")]
    InvalidId(String),
    /// Neither `id` nor a string `method`
    #[error("frame has neither id nor method")]
    Unroutable,
}

impl From<serde_json::Error> for FrameError {
    fn from(err: serde_json::Error) -> Self {
        FrameError::Json(err.to_string())
    }
}

/// Routing decision for an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    /// Reply to the request with this id
    Reply(RequestId),
    /// Server-initiated notification
    Notification,
}

/// Decide whether `raw` is a reply or a notification.
pub fn inspect_frame(raw: &str) -> Result<FrameKind, FrameError> {
    let value: Value = serde_json::from_str(raw)?;
    let object = value.as_object().ok_or(FrameError::NotAnObject)?;

    if let Some(id) = object.get("id") {
        return extract_id(id)
            .map(FrameKind::Reply)
            .ok_or_else(|| FrameError::InvalidId(id.to_string()));
    }
    match object.get("method") {
        Some(Value::String(_)) => Ok(FrameKind::Notification),
        _ => Err(FrameError::Unroutable),
    }
}

/// Read a correlation id from an integer or integer-valued string.
pub fn extract_id(value: &Value) -> Option<RequestId> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A parsed notification frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Event name (the `method` member)
    pub name: String,
    /// The `params` member, when it is an object
    pub params: Option<Map<String, Value>>,
}

impl Notification {
    /// Parse a raw notification frame.
    pub fn parse(raw: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(raw)?;
        let Value::Object(mut object) = value else {
            return Err(FrameError::NotAnObject);
        };
        let name = match object.remove("method") {
            Some(Value::String(name)) => name,
            _ => return Err(FrameError::Unroutable),
        };
        let params = match object.remove("params") {
            Some(Value::Object(params)) => Some(params),
            _ => None,
        };
        Ok(Self { name, params })
    }

    /// Compact JSON of the params object, `"{}"` when absent.
    pub fn params_json(&self) -> String {
        match &self.params {
            Some(params) => Value::Object(params.clone()).to_string(),
            None => "{}".to_string(),
        }
    }

    /// DIAL parameters, if the params object is present.
    ///
    /// Field values are read leniently: numbers and booleans become their
    /// text, `null` counts as absent.
    pub fn dial_params(&self) -> Option<DialParams> {
        let params = self.params.as_ref()?;
        serde_json::from_value(Value::Object(params.clone())).ok()
    }
}
