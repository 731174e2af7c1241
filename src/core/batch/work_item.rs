//! Per-request tracking and the caller-facing ticket
//!
//! Every enqueued request becomes a [`WorkItem`] inside its queue and a
//! [`BatchTicket`] in the hands of the caller. The two are joined by a
//! oneshot channel that is written at most once.

use super::problem::{Outcome, RequestError};
use super::types::BatchRequest;
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// How a settle call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settled {
    Succeeded,
    Failed,
    Cancelled,
    AlreadyResolved,
}

/// Single-assignment result slot
pub(crate) struct CompletionSlot<R> {
    sender: Option<oneshot::Sender<Result<R, RequestError>>>,
    cancel: CancellationToken,
}

impl<R> CompletionSlot<R> {
    /// Deliver an outcome; a fired cancellation token turns it into a cancellation
    pub(crate) fn settle(&mut self, outcome: Outcome<R>) -> Settled {
        if self.cancel.is_cancelled() {
            return self.cancel();
        }

        let Some(sender) = self.sender.take() else {
            return Settled::AlreadyResolved;
        };

        let settled = if outcome.is_ok() {
            Settled::Succeeded
        } else {
            Settled::Failed
        };
        // The caller may have dropped its ticket; nothing left to notify then.
        let _ = sender.send(outcome.map_err(RequestError::Failed));
        settled
    }

    pub(crate) fn cancel(&mut self) -> Settled {
        match self.sender.take() {
            Some(sender) => {
                let _ = sender.send(Err(RequestError::Cancelled));
                Settled::Cancelled
            }
            None => Settled::AlreadyResolved,
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Queue-internal state for one request
pub(crate) struct WorkItem<T, R> {
    request: BatchRequest<T>,
    tokens: usize,
    enqueued_at: Instant,
    deadline: Option<Instant>,
    slot: CompletionSlot<R>,
}

impl<T, R> WorkItem<T, R> {
    pub(crate) fn new(
        request: BatchRequest<T>,
        tokens: usize,
        enqueued_at: Instant,
        cancel: CancellationToken,
    ) -> (Self, BatchTicket<R>) {
        let (sender, receiver) = oneshot::channel();
        let deadline = request.deadline;
        let item = Self {
            request,
            tokens,
            enqueued_at,
            deadline,
            slot: CompletionSlot {
                sender: Some(sender),
                cancel: cancel.clone(),
            },
        };
        let ticket = BatchTicket {
            receiver,
            cancelled: cancel.cancelled_owned(),
        };
        (item, ticket)
    }

    pub(crate) fn tokens(&self) -> usize {
        self.tokens
    }

    pub(crate) fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.slot.is_cancelled()
    }

    pub(crate) fn settle(&mut self, outcome: Outcome<R>) -> Settled {
        self.slot.settle(outcome)
    }

    pub(crate) fn cancel(&mut self) -> Settled {
        self.slot.cancel()
    }

    /// Split into the envelope sent to the handler and the slot for its result
    pub(crate) fn into_parts(self) -> (BatchRequest<T>, CompletionSlot<R>) {
        (self.request, self.slot)
    }
}

pin_project! {
    /// Eventual result of an enqueued request
    ///
    /// Resolves as [`RequestError::Cancelled`] as soon as the request's
    /// cancellation token fires, even while the request is still pending or
    /// its batch is being retried. A result delivered before the token fired
    /// is kept.
    #[must_use = "a ticket does nothing unless awaited"]
    pub struct BatchTicket<R> {
        #[pin]
        receiver: oneshot::Receiver<Result<R, RequestError>>,
        #[pin]
        cancelled: WaitForCancellationFutureOwned,
    }
}

impl<R> Future for BatchTicket<R> {
    type Output = Result<R, RequestError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if let Poll::Ready(delivered) = this.receiver.poll(cx) {
            // A dropped sender means the item was discarded without a result.
            return Poll::Ready(delivered.unwrap_or(Err(RequestError::Cancelled)));
        }

        if this.cancelled.poll(cx).is_ready() {
            return Poll::Ready(Err(RequestError::Cancelled));
        }

        Poll::Pending
    }
}
