//! Awaitable handle returned by [`Correlator::complete_async`].

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time;

use super::Correlator;
use crate::domain::record::{settled, SettleReceiver};
use crate::domain::{Outcome, RequestId, Settlement};

enum Inner {
    Ready(Option<Outcome>),
    Waiting {
        correlator: Arc<Correlator>,
        settle: BoxFuture<'static, Option<Settlement>>,
    },
}

/// Resolves with the [`Outcome`] of one request.
///
/// Holds no lock while pending. Dropping the handle leaves the record in
/// place; an uncollected completion is removed by the reaper.
#[must_use = "a ReplyFuture does nothing unless awaited"]
pub struct ReplyFuture {
    id: RequestId,
    inner: Inner,
}

impl ReplyFuture {
    pub(super) fn ready(id: RequestId, outcome: Outcome) -> Self {
        Self {
            id,
            inner: Inner::Ready(Some(outcome)),
        }
    }

    pub(super) fn waiting(
        id: RequestId,
        correlator: Arc<Correlator>,
        receiver: SettleReceiver,
    ) -> Self {
        Self {
            id,
            inner: Inner::Waiting {
                correlator,
                settle: settled(receiver).boxed(),
            },
        }
    }

    /// The request id this handle waits on
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Await with a deadline. On expiry the record is marked `TimedOut`.
    pub async fn with_timeout(self, timeout: Duration) -> Outcome {
        let id = self.id;
        let correlator = match &self.inner {
            Inner::Waiting { correlator, .. } => Some(Arc::clone(correlator)),
            Inner::Ready(_) => None,
        };

        match time::timeout(timeout, self).await {
            Ok(outcome) => outcome,
            Err(_) => correlator
                .map(|c| c.expire_wait(id))
                .unwrap_or(Outcome::TimedOut),
        }
    }
}

impl Future for ReplyFuture {
    type Output = Outcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.inner {
            Inner::Ready(outcome) => Poll::Ready(outcome.take().unwrap_or(Outcome::Abandoned)),
            Inner::Waiting { correlator, settle } => match settle.poll_unpin(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(Some(settlement)) => Poll::Ready(correlator.collect(this.id, settlement)),
                Poll::Ready(None) => Poll::Ready(Outcome::Abandoned),
            },
        }
    }
}

impl std::fmt::Debug for ReplyFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.inner {
            Inner::Ready(_) => "ready",
            Inner::Waiting { .. } => "waiting",
        };
        f.debug_struct("ReplyFuture")
            .field("id", &self.id)
            .field("state", &state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    fn correlator() -> Arc<Correlator> {
        Arc::new(Correlator::new(
            Duration::from_secs(5),
            Duration::from_secs(300),
        ))
    }

    #[test]
    fn test_pending_until_completed() {
        let c = correlator();
        let mut handle = task::spawn(c.complete_async(21));
        assert_pending!(handle.poll());

        c.complete(21, "payload");
        assert!(handle.is_woken());
        assert_ready_eq!(handle.poll(), Outcome::Completed("payload".into()));
        assert_eq!(c.count_records(), 0);
    }

    #[test]
    fn test_many_handles_same_value() {
        let c = correlator();
        let mut first = task::spawn(c.complete_async(9));
        let mut second = task::spawn(c.complete_async(9));
        assert_pending!(first.poll());
        assert_pending!(second.poll());

        c.complete(9, "shared");
        assert_ready_eq!(first.poll(), Outcome::Completed("shared".into()));
        assert_ready_eq!(second.poll(), Outcome::Completed("shared".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_expires() {
        let c = correlator();
        let outcome = c
            .complete_async(30)
            .with_timeout(Duration::from_millis(50))
            .await;
        assert_eq!(outcome, Outcome::TimedOut);
        assert_eq!(c.request_state(30), Some(crate::RequestState::TimedOut));
    }

    #[tokio::test]
    async fn test_ready_handle() {
        let c = correlator();
        let _pending = c.complete_async(2);
        c.complete(2, "early");

        let handle = c.complete_async(2);
        assert_eq!(handle.id(), 2);
        assert_eq!(handle.await, Outcome::Completed("early".into()));
    }
}
