//! Single-assignment completion handles for in-flight requests
//!
//! Each request gets one [`CompletionSlot`] (writer side, owned by the
//! dispatch/assembly pipeline) and one [`CompletionHandle`] (reader side,
//! returned to the caller). The slot resolves exactly once: success,
//! transport error and timeout all race for the same claim, and whichever
//! path takes the sender first wins. The losing path observes `false` and
//! must not perform its side effects on the caller's behalf.
//!
//! "Already resolved" is an explicit checked condition here, not an
//! incidental property of the underlying channel.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::ClientError;
use crate::response::Response;

/// The terminal outcome of one request
pub type RequestResult = Result<Response, ClientError>;

/// Writer side of a request's completion cell
///
/// Cloneable so the assembler and the timeout guard can race for the single
/// resolution; the first claim wins and every later attempt is a no-op.
#[derive(Debug, Clone)]
pub struct CompletionSlot {
    sender: Arc<Mutex<Option<oneshot::Sender<RequestResult>>>>,
}

impl CompletionSlot {
    /// Create a connected slot/handle pair
    #[must_use]
    pub fn channel() -> (Self, CompletionHandle) {
        let (tx, rx) = oneshot::channel();
        let slot = Self {
            sender: Arc::new(Mutex::new(Some(tx))),
        };
        (slot, CompletionHandle { receiver: rx })
    }

    /// Claim the slot and deliver the outcome
    ///
    /// Returns `true` if this call won the claim. The claim (taking the
    /// sender out of the cell) happens atomically under the lock, before
    /// any delivery side effect, so two racing paths can never both win.
    pub fn complete(&self, result: RequestResult) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();

        match sender {
            Some(tx) => {
                // A dropped receiver still counts as a won claim; the
                // request is over either way.
                if tx.send(result).is_err() {
                    debug!("Completion handle dropped before resolution was delivered");
                }
                true
            }
            None => {
                debug!("Completion slot already resolved; ignoring late resolution");
                false
            }
        }
    }

    /// Claim the slot with a successful response
    pub fn resolve(&self, response: Response) -> bool {
        self.complete(Ok(response))
    }

    /// Claim the slot with a failure
    pub fn fail(&self, error: ClientError) -> bool {
        self.complete(Err(error))
    }

    /// Check whether the slot has already been claimed
    ///
    /// Advisory only: a `false` answer may be stale by the time the caller
    /// acts on it. Use [`CompletionSlot::complete`]'s return value for
    /// claim decisions.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_none()
    }
}

/// Reader side of a request's completion cell
///
/// Awaiting the handle yields the request's single terminal outcome.
#[derive(Debug)]
pub struct CompletionHandle {
    receiver: oneshot::Receiver<RequestResult>,
}

impl Future for CompletionHandle {
    type Output = RequestResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // The pipeline guarantees exactly one resolution; a dropped
            // sender without one indicates a client bug.
            Poll::Ready(Err(_)) => Poll::Ready(Err(ClientError::Internal {
                detail: "completion slot dropped without resolution".to_string(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}
