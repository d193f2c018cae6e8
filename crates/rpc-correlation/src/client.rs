//! JSON-RPC client facade.
//!
//! The core never sends. This module pairs a caller-supplied
//! [`RpcTransport`] with a [`Correlator`] so that a call registers
//! interest in its id before the request leaves, then awaits the reply.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::correlator::Correlator;
use crate::domain::{Outcome, RequestId};
use crate::error::{CorrelationError, CorrelationResult};

/// First id handed out by [`RequestIdAllocator`].
pub const FIRST_REQUEST_ID: RequestId = 1001;

/// Outbound half of the connection.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Send one text frame.
    async fn send(&self, frame: String) -> CorrelationResult<()>;
}

/// Monotonic request id source.
#[derive(Debug)]
pub struct RequestIdAllocator {
    next: AtomicI64,
}

impl RequestIdAllocator {
    pub fn new() -> Self {
        Self::starting_at(FIRST_REQUEST_ID)
    }

    pub fn starting_at(first: RequestId) -> Self {
        Self {
            next: AtomicI64::new(first),
        }
    }

    pub fn next_id(&self) -> RequestId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RequestIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcRequest {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>) -> Self {
        Self {
            id,
            method: method.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    /// `<callsign>register` for `event`, tagged with `event_id`.
    pub fn subscribe(id: RequestId, callsign: &str, event: &str, event_id: RequestId) -> Self {
        Self::subscription(id, callsign, event, event_id, true)
    }

    /// `<callsign>unregister` for `event`, tagged with `event_id`.
    pub fn unsubscribe(id: RequestId, callsign: &str, event: &str, event_id: RequestId) -> Self {
        Self::subscription(id, callsign, event, event_id, false)
    }

    fn subscription(
        id: RequestId,
        callsign: &str,
        event: &str,
        event_id: RequestId,
        subscribe: bool,
    ) -> Self {
        let suffix = if subscribe { "register" } else { "unregister" };
        Self::new(id, format!("{callsign}{suffix}")).with_params(json!({
            "event": event,
            "id": event_id.to_string(),
        }))
    }

    /// Encode as a text frame.
    pub fn to_json(&self) -> String {
        let mut frame = json!({
            "jsonrpc": "2.0",
            "id": self.id,
            "method": self.method,
        });
        if let (Some(params), Some(object)) = (&self.params, frame.as_object_mut()) {
            object.insert("params".to_string(), params.clone());
        }
        frame.to_string()
    }
}

/// Issues requests over a transport and correlates their replies.
pub struct RpcClient<T: RpcTransport> {
    transport: T,
    correlator: Arc<Correlator>,
    ids: RequestIdAllocator,
}

impl<T: RpcTransport> RpcClient<T> {
    pub fn new(transport: T, correlator: Arc<Correlator>) -> Self {
        Self {
            transport,
            correlator,
            ids: RequestIdAllocator::new(),
        }
    }

    pub fn with_allocator(mut self, ids: RequestIdAllocator) -> Self {
        self.ids = ids;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send `method` and wait up to `timeout` for its reply frame.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> CorrelationResult<Outcome> {
        let mut request = JsonRpcRequest::new(self.ids.next_id(), method);
        request.params = params;
        self.send_and_wait(request, timeout).await
    }

    /// Like [`call`](Self::call) but decodes the reply's `result` member.
    ///
    /// Returns `Ok(None)` when no reply arrived.
    pub async fn call_result(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> CorrelationResult<Option<Value>> {
        match self.call(method, params, timeout).await? {
            Outcome::Completed(reply) => decode_result(&reply).map(Some),
            _ => Ok(None),
        }
    }

    /// Subscribe to `event` on `callsign` (e.g. `"org.rdk.RDKShell.1."`).
    pub async fn subscribe(
        &self,
        callsign: &str,
        event: &str,
        timeout: Duration,
    ) -> CorrelationResult<Outcome> {
        let request =
            JsonRpcRequest::subscribe(self.ids.next_id(), callsign, event, self.ids.next_id());
        self.send_and_wait(request, timeout).await
    }

    /// Unsubscribe from `event` on `callsign`.
    pub async fn unsubscribe(
        &self,
        callsign: &str,
        event: &str,
        timeout: Duration,
    ) -> CorrelationResult<Outcome> {
        let request =
            JsonRpcRequest::unsubscribe(self.ids.next_id(), callsign, event, self.ids.next_id());
        self.send_and_wait(request, timeout).await
    }

    async fn send_and_wait(
        &self,
        request: JsonRpcRequest,
        timeout: Duration,
    ) -> CorrelationResult<Outcome> {
        if timeout.is_zero() {
            return Err(CorrelationError::InvalidTimeout);
        }
        if self.correlator.is_closed() {
            return Err(CorrelationError::ShuttingDown);
        }

        let id = request.id;
        let reply = self.correlator.complete_async(id);
        if let Err(e) = self.transport.send(request.to_json()).await {
            self.correlator.cancel(id);
            warn!(request_id = id, method = %request.method, error = %e, "Send failed");
            return Err(e);
        }
        debug!(request_id = id, method = %request.method, "Request sent");

        Ok(reply.with_timeout(timeout).await)
    }
}

/// Extract the `result` member of a reply frame.
pub fn decode_result(reply: &str) -> CorrelationResult<Value> {
    let mut frame: Value = serde_json::from_str(reply)
        .map_err(|e| CorrelationError::MalformedReply(e.to_string()))?;
    if let Some(result) = frame.get_mut("result") {
        return Ok(result.take());
    }
    match frame.get("error") {
        Some(error) => Err(CorrelationError::MalformedReply(format!(
            "error reply: {error}"
        ))),
        None => Err(CorrelationError::MalformedReply(
            "reply has no result member".to_string(),
        )),
    }
}
