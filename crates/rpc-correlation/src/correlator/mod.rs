//! # Correlator
//!
//! Maps caller-chosen request ids to in-flight [`RequestRecord`]s.
//!
//! Flow:
//! 1. Caller sends a request through the transport with id `N`
//! 2. Caller calls [`Correlator::wait_for_reply`] (or [`Correlator::complete_async`])
//! 3. The transport reader calls [`Correlator::complete`] when the reply arrives
//! 4. The waiter wakes, collects the payload and removes the record
//!
//! The map lock is never held across an await. Waiters hold their own
//! receiver on the record's settle cell, so `complete`, `cancel` and the
//! reaper never block behind a slow waiter.

mod reaper;
mod reply_future;

pub use reaper::reaper_task;
pub use reply_future::ReplyFuture;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, info, trace};

use crate::domain::record::{RequestRecord, SettleReceiver};
use crate::domain::{Outcome, RequestId, RequestState, Settlement};
use crate::error::{CorrelationError, CorrelationResult};
use crate::metrics::{MetricsRecorder, NoOpMetrics};

/// Result of attaching to a record.
enum Attach {
    /// The wait is already decided
    Resolved(Outcome),
    /// Wait on this receiver
    Waiting(SettleReceiver),
}

/// Reply correlation map shared by callers, the transport reader and the reaper.
pub struct Correlator {
    records: Mutex<HashMap<RequestId, RequestRecord>>,
    // Per-state tallies, only written with `records` locked.
    pending: AtomicUsize,
    completed: AtomicUsize,
    closed: AtomicBool,
    default_timeout: Duration,
    max_record_age: Duration,
    metrics: Arc<dyn MetricsRecorder>,
}

impl Correlator {
    /// Create a correlator without metrics
    pub fn new(default_timeout: Duration, max_record_age: Duration) -> Self {
        Self::with_metrics(default_timeout, max_record_age, Arc::new(NoOpMetrics))
    }

    /// Create a correlator reporting to `metrics`
    pub fn with_metrics(
        default_timeout: Duration,
        max_record_age: Duration,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            pending: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            default_timeout,
            max_record_age,
            metrics,
        }
    }

    /// Wait up to `timeout` for the reply to request `id`.
    ///
    /// A record already `Completed` is collected immediately. Otherwise the
    /// call attaches to the existing record (or creates one) and suspends
    /// without holding the map lock. On expiry the record is marked
    /// `TimedOut` and left for the reaper.
    pub async fn wait_for_reply(
        &self,
        id: RequestId,
        timeout: Duration,
    ) -> CorrelationResult<Outcome> {
        if timeout.is_zero() {
            return Err(CorrelationError::InvalidTimeout);
        }

        let mut receiver = match self.attach(id) {
            Attach::Resolved(outcome) => return Ok(outcome),
            Attach::Waiting(receiver) => receiver,
        };

        let settled = match time::timeout(timeout, receiver.wait_for(Option::is_some)).await {
            Ok(Ok(value)) => (*value).clone(),
            Ok(Err(_)) => return Ok(Outcome::Abandoned),
            Err(_) => None,
        };
        // A settlement may land between the deadline and this check.
        let settled = settled.or_else(|| (*receiver.borrow()).clone());

        Ok(match settled {
            Some(settlement) => self.collect(id, settlement),
            None => self.expire_wait(id),
        })
    }

    /// [`wait_for_reply`](Self::wait_for_reply) with the configured default timeout.
    pub async fn wait_for_reply_default(&self, id: RequestId) -> CorrelationResult<Outcome> {
        self.wait_for_reply(id, self.default_timeout).await
    }

    /// Register interest in `id` without waiting.
    ///
    /// Every handle for the same id observes the same settlement. Call this
    /// before sending the request to rule out a reply racing the registration.
    pub fn complete_async(self: &Arc<Self>, id: RequestId) -> ReplyFuture {
        match self.attach(id) {
            Attach::Resolved(outcome) => ReplyFuture::ready(id, outcome),
            Attach::Waiting(receiver) => ReplyFuture::waiting(id, Arc::clone(self), receiver),
        }
    }

    /// Deliver the reply for `id`.
    ///
    /// Returns `true` if a pending record took the reply. Replies with no
    /// record, or for a record no longer pending, are logged and dropped.
    pub fn complete(&self, id: RequestId, payload: impl Into<String>) -> bool {
        let mut records = self.records.lock();
        if self.closed.load(Ordering::Acquire) {
            debug!(request_id = id, "Reply after shutdown; dropped");
            return false;
        }

        let Some(record) = records.get_mut(&id) else {
            self.metrics.record_late_reply();
            debug!(request_id = id, "Reply for unknown request id; dropped");
            return false;
        };

        let state = record.state();
        if record.fulfil(payload.into()) {
            self.track(Some(state), Some(RequestState::Completed));
            let latency = record.age(Instant::now());
            self.metrics.record_completed(latency);
            trace!(
                request_id = id,
                latency_us = latency.as_micros() as u64,
                "Completed pending request"
            );
            true
        } else {
            self.metrics.record_late_reply();
            debug!(request_id = id, state = %state, "Reply for request no longer pending; dropped");
            false
        }
    }

    /// Cancel a pending request, waking every waiter with [`Outcome::Cancelled`].
    ///
    /// Returns `false` for unknown or already terminal ids.
    pub fn cancel(&self, id: RequestId) -> bool {
        let mut records = self.records.lock();
        let cancelled = records.get_mut(&id).is_some_and(RequestRecord::cancel);
        if cancelled {
            records.remove(&id);
            self.track(Some(RequestState::Pending), None);
            self.metrics.record_cancelled();
            debug!(request_id = id, "Cancelled pending request");
        }
        cancelled
    }

    /// Records still waiting for a reply
    pub fn count_pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Completed records not yet collected by a waiter
    pub fn count_completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    /// All records in the map, in any state
    pub fn count_records(&self) -> usize {
        self.records.lock().len()
    }

    /// Current state of the record for `id`, if any
    pub fn request_state(&self, id: RequestId) -> Option<RequestState> {
        self.records.lock().get(&id).map(RequestRecord::state)
    }

    /// Drop completed records nobody collected. Returns how many were removed.
    pub fn clear_completed(&self) -> usize {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, record| record.state() != RequestState::Completed);
        let removed = before - records.len();
        self.completed.store(0, Ordering::Release);
        if removed > 0 {
            debug!(removed, "Cleared uncollected completed requests");
        }
        removed
    }

    /// Remove records older than the age bound or already terminal.
    ///
    /// Unsettled waiters on removed records wake with [`Outcome::Abandoned`].
    /// Returns the number of records removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let max_age = self.max_record_age;
        let mut records = self.records.lock();
        let before = records.len();

        records.retain(|_, record| {
            let age = record.age(now);
            let expired = age > max_age;
            if !expired && record.state() == RequestState::Pending {
                return true;
            }
            self.track(Some(record.state()), None);
            if record.release(Settlement::Expired) {
                debug!(
                    request_id = record.id(),
                    state = %record.state(),
                    age_ms = age.as_millis() as u64,
                    "Reaping request with lingering waiter"
                );
            }
            false
        });

        let removed = before - records.len();
        let remaining = records.len();
        drop(records);

        self.metrics.record_reaped(removed);
        self.metrics.record_in_flight(remaining);
        if removed > 0 {
            debug!(removed, remaining, "Reaped stale requests");
        }
        removed
    }

    /// Release every waiter and empty the map. Later waits resolve immediately.
    pub fn shutdown_all(&self) -> usize {
        let mut records = self.records.lock();
        self.closed.store(true, Ordering::Release);
        self.pending.store(0, Ordering::Release);
        self.completed.store(0, Ordering::Release);
        let released = records
            .drain()
            .filter(|(_, record)| record.release(Settlement::Shutdown))
            .count();
        drop(records);

        self.metrics.record_in_flight(0);
        info!(released, "Correlator shut down");
        released
    }

    /// Whether [`shutdown_all`](Self::shutdown_all) has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn tally(&self, state: RequestState) -> Option<&AtomicUsize> {
        match state {
            RequestState::Pending => Some(&self.pending),
            RequestState::Completed => Some(&self.completed),
            RequestState::TimedOut | RequestState::Cancelled => None,
        }
    }

    /// Move one record between state tallies. `None` means outside the map.
    fn track(&self, from: Option<RequestState>, to: Option<RequestState>) {
        if let Some(tally) = from.and_then(|state| self.tally(state)) {
            tally.fetch_sub(1, Ordering::AcqRel);
        }
        if let Some(tally) = to.and_then(|state| self.tally(state)) {
            tally.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn attach(&self, id: RequestId) -> Attach {
        let mut records = self.records.lock();
        if self.closed.load(Ordering::Acquire) {
            return Attach::Resolved(Outcome::Abandoned);
        }

        match records.get_mut(&id).map(|record| (record.state(), record)) {
            Some((RequestState::Pending, record)) => Attach::Waiting(record.subscribe()),
            Some((RequestState::Completed, record)) => {
                let payload = record.take_payload().unwrap_or_default();
                records.remove(&id);
                self.track(Some(RequestState::Completed), None);
                trace!(request_id = id, "Collected completed request");
                Attach::Resolved(Outcome::Completed(payload))
            }
            Some((RequestState::TimedOut, _)) => Attach::Resolved(Outcome::TimedOut),
            Some((RequestState::Cancelled, _)) => Attach::Resolved(Outcome::Cancelled),
            None => {
                let record = RequestRecord::new(id);
                let receiver = record.subscribe();
                records.insert(id, record);
                self.track(None, Some(RequestState::Pending));
                self.metrics.record_registered();
                trace!(request_id = id, "Registered pending request");
                Attach::Waiting(receiver)
            }
        }
    }

    /// Turn a settlement into an outcome, removing a completed record.
    fn collect(&self, id: RequestId, settlement: Settlement) -> Outcome {
        if matches!(settlement, Settlement::Reply(_)) {
            let mut records = self.records.lock();
            if records
                .get(&id)
                .is_some_and(|record| record.state() == RequestState::Completed)
            {
                records.remove(&id);
                self.track(Some(RequestState::Completed), None);
            }
        }
        Outcome::from(settlement)
    }

    /// Resolve a wait whose deadline passed.
    fn expire_wait(&self, id: RequestId) -> Outcome {
        let mut records = self.records.lock();
        let Some(record) = records.get_mut(&id) else {
            return Outcome::TimedOut;
        };

        match record.state() {
            RequestState::Pending => {
                record.time_out();
                self.track(Some(RequestState::Pending), None);
                self.metrics.record_timed_out();
                debug!(request_id = id, "Wait for reply timed out");
                Outcome::TimedOut
            }
            RequestState::Completed => {
                let payload = record.take_payload().unwrap_or_default();
                records.remove(&id);
                self.track(Some(RequestState::Completed), None);
                Outcome::Completed(payload)
            }
            RequestState::TimedOut => Outcome::TimedOut,
            RequestState::Cancelled => Outcome::Cancelled,
        }
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("records", &self.records.lock().len())
            .field("closed", &self.is_closed())
            .field("default_timeout", &self.default_timeout)
            .field("max_record_age", &self.max_record_age)
            .finish()
    }
}
