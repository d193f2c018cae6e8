//! # Request Records
//!
//! The per-request state machine owned by the correlator map.
//!
//! ```text
//!            complete()            reaper / caller
//! Pending ───────────────► Completed ─────────────► removed
//!    │
//!    ├── await timeout ──► TimedOut ──► removed (reaper)
//!    │
//!    └── cancel() ───────► Cancelled ─► removed (synchronously)
//! ```
//!
//! Each record carries a [`SettleCell`]: a single-assignment slot that any
//! number of waiters can observe. Settling twice is a no-op.

use std::fmt;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Caller-assigned correlation identifier.
pub type RequestId = i64;

/// Lifecycle state of a [`RequestRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    /// Waiting for a reply.
    Pending,
    /// A reply arrived while pending.
    Completed,
    /// A waiter gave up before a reply arrived.
    TimedOut,
    /// Explicitly cancelled by a caller.
    Cancelled,
}

impl RequestState {
    /// Whether no further transition is allowed.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, RequestState::Pending)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestState::Pending => "pending",
            RequestState::Completed => "completed",
            RequestState::TimedOut => "timed_out",
            RequestState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// The value a record's cell is settled with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// The raw reply frame.
    Reply(String),
    /// Released by `cancel`.
    Cancelled,
    /// Released by the reaper.
    Expired,
    /// Released by engine shutdown.
    Shutdown,
}

/// What a waiter observes when its wait ends.
///
/// Keeps "timed out" and "replied with an empty body" apart; use
/// [`Outcome::into_payload`] for the flat empty-string view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Reply received.
    Completed(String),
    /// No reply within the wait window.
    TimedOut,
    /// The request was cancelled while waiting.
    Cancelled,
    /// Released by the reaper or by shutdown without a reply.
    Abandoned,
}

impl Outcome {
    /// Whether a reply was received.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    /// Borrow the reply payload, if any.
    #[must_use]
    pub fn payload(&self) -> Option<&str> {
        match self {
            Outcome::Completed(payload) => Some(payload),
            _ => None,
        }
    }

    /// The reply payload, or an empty string for every non-reply outcome.
    #[must_use]
    pub fn into_payload(self) -> String {
        match self {
            Outcome::Completed(payload) => payload,
            _ => String::new(),
        }
    }
}

impl From<Settlement> for Outcome {
    fn from(settlement: Settlement) -> Self {
        match settlement {
            Settlement::Reply(payload) => Outcome::Completed(payload),
            Settlement::Cancelled => Outcome::Cancelled,
            Settlement::Expired | Settlement::Shutdown => Outcome::Abandoned,
        }
    }
}

/// Receiving half of a [`SettleCell`].
pub(crate) type SettleReceiver = watch::Receiver<Option<Settlement>>;

/// Single-assignment cell with any number of readers.
///
/// Backed by a `watch` channel holding `None` until settled. Readers keep
/// their own receiver, so a value settled just before the record is removed
/// from the map is still observed.
#[derive(Debug)]
pub(crate) struct SettleCell {
    sender: watch::Sender<Option<Settlement>>,
}

impl SettleCell {
    pub(crate) fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self { sender }
    }

    /// Settle the cell. Returns `false` if it was already settled.
    pub(crate) fn settle(&self, value: Settlement) -> bool {
        self.sender.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(value);
            true
        })
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.sender.borrow().is_some()
    }

    pub(crate) fn subscribe(&self) -> SettleReceiver {
        self.sender.subscribe()
    }
}

/// Wait until the cell behind `receiver` is settled.
///
/// Returns `None` if the cell was dropped unsettled.
pub(crate) async fn settled(mut receiver: SettleReceiver) -> Option<Settlement> {
    receiver
        .wait_for(Option::is_some)
        .await
        .ok()
        .and_then(|value| value.clone())
}

/// One in-flight or recently resolved correlation.
#[derive(Debug)]
pub(crate) struct RequestRecord {
    id: RequestId,
    state: RequestState,
    payload: Option<String>,
    created_at: Instant,
    cell: SettleCell,
}

impl RequestRecord {
    pub(crate) fn new(id: RequestId) -> Self {
        Self {
            id,
            state: RequestState::Pending,
            payload: None,
            created_at: Instant::now(),
            cell: SettleCell::new(),
        }
    }

    pub(crate) fn id(&self) -> RequestId {
        self.id
    }

    pub(crate) fn state(&self) -> RequestState {
        self.state
    }

    pub(crate) fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    pub(crate) fn subscribe(&self) -> SettleReceiver {
        self.cell.subscribe()
    }

    /// `Pending -> Completed`. Returns `false` from any other state.
    pub(crate) fn fulfil(&mut self, payload: String) -> bool {
        if self.state != RequestState::Pending {
            return false;
        }
        self.state = RequestState::Completed;
        self.payload = Some(payload.clone());
        self.cell.settle(Settlement::Reply(payload));
        true
    }

    /// `Pending -> TimedOut`. The cell stays unsettled.
    pub(crate) fn time_out(&mut self) -> bool {
        if self.state != RequestState::Pending {
            return false;
        }
        self.state = RequestState::TimedOut;
        true
    }

    /// `Pending -> Cancelled`, waking every waiter.
    pub(crate) fn cancel(&mut self) -> bool {
        if self.state != RequestState::Pending {
            return false;
        }
        self.state = RequestState::Cancelled;
        self.cell.settle(Settlement::Cancelled);
        true
    }

    /// Settle the cell if nobody has yet, without changing state.
    pub(crate) fn release(&self, reason: Settlement) -> bool {
        if self.cell.is_settled() {
            return false;
        }
        self.cell.settle(reason)
    }

    pub(crate) fn take_payload(&mut self) -> Option<String> {
        self.payload.take()
    }
}
