//! A pooled transport connection and its per-request mutable state
//!
//! The completion slot and timeout guard live directly on the handle as
//! typed fields. The slot is non-empty exactly while a request is
//! outstanding on the connection; the pool's checkout discipline guarantees
//! only one request holds the handle at a time.

use tracing::error;

use crate::completion::CompletionSlot;
use crate::error::ClientError;
use crate::timer::TimeoutGuard;
use crate::transport::{Connection, Event};
use crate::types::{ConnectionId, Destination};

/// One reusable transport connection managed by a pool
pub struct ConnectionHandle {
    id: ConnectionId,
    destination: Destination,
    conn: Box<dyn Connection>,
    completion: Option<CompletionSlot>,
    timeout: TimeoutGuard,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .field("outstanding", &self.completion.is_some())
            .field("timeout_armed", &self.timeout.is_armed())
            .finish()
    }
}

impl ConnectionHandle {
    /// Wrap a freshly connected transport connection
    #[must_use]
    pub fn new(destination: Destination, conn: Box<dyn Connection>) -> Self {
        Self {
            id: ConnectionId::new(),
            destination,
            conn,
            completion: None,
            timeout: TimeoutGuard::new(),
        }
    }

    /// Unique identity of this connection (stable across reuse)
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// The destination this connection belongs to
    #[must_use]
    pub const fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Store the completion slot for the request now outstanding
    ///
    /// The slot must be empty: connections are never shared across
    /// concurrent requests, so an occupied slot means a client bug. That is
    /// reported as an error rather than a panic so it can flow to the
    /// caller through the request's own completion handle.
    ///
    /// # Errors
    /// Returns `ClientError::Internal` if a slot is already attached.
    pub fn attach_completion(&mut self, slot: CompletionSlot) -> Result<(), ClientError> {
        debug_assert!(
            self.completion.is_none(),
            "completion slot attached while previous request outstanding"
        );
        if self.completion.is_some() {
            error!(
                connection = %self.id,
                destination = %self.destination,
                "Completion slot already occupied; connection shared across requests"
            );
            return Err(ClientError::Internal {
                detail: "completion slot already occupied".to_string(),
            });
        }
        self.completion = Some(slot);
        Ok(())
    }

    /// Clear and return the attached completion slot, if any
    pub fn take_completion(&mut self) -> Option<CompletionSlot> {
        self.completion.take()
    }

    /// Whether a request is currently outstanding on this connection
    #[must_use]
    pub const fn has_outstanding_request(&self) -> bool {
        self.completion.is_some()
    }

    /// The connection's timeout guard
    pub fn timeout_guard(&mut self) -> &mut TimeoutGuard {
        &mut self.timeout
    }

    /// Transmit raw request bytes
    ///
    /// # Errors
    /// Propagates the transport write error.
    pub async fn send(&mut self, payload: &[u8]) -> std::io::Result<()> {
        self.conn.send(payload).await
    }

    /// Wait for the next inbound event
    pub async fn next_event(&mut self) -> Event {
        self.conn.next_event().await
    }

    /// Whether the transport can serve another request
    #[must_use]
    pub fn is_reusable(&self) -> bool {
        self.conn.is_reusable()
    }

    /// Close the underlying transport and disarm any pending timeout
    pub async fn close(&mut self) {
        self.timeout.disable();
        self.conn.close().await;
    }
}
