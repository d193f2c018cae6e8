//! Core domain types: request records, inbound frames, event groups.

pub mod events;
pub mod message;
pub mod record;

pub use events::{classify_event, DialEvent, DialParams, EventCategory};
pub use message::{extract_id, inspect_frame, FrameError, FrameKind, Notification};
pub use record::{Outcome, RequestId, RequestState, Settlement};
