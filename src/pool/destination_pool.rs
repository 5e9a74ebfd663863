//! A bounded pool of reusable connections for one destination
//!
//! Capacity is fixed at construction. Checkouts are bounded by a fair
//! semaphore, so waiters are served strictly in arrival order. A new
//! transport connection is created only when a permit is held and the idle
//! set is empty, which keeps the number of live connections at or below
//! the configured maximum.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use super::PoolStatus;
use super::connection::ConnectionHandle;
use crate::error::ClientError;
use crate::transport::Transport;
use crate::types::{
    AvailableConnections, ConnectionId, CreatedConnections, Destination, InFlightRequests,
    MaxConnections, MaxPoolSize,
};

/// Bounded connection pool for a single (host, port) destination
pub struct DestinationPool {
    destination: Destination,
    transport: Arc<dyn Transport>,
    /// Fair semaphore: one permit per allowed checkout, FIFO waiters
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<ConnectionHandle>>,
    max_size: MaxConnections,
    created: AtomicUsize,
    in_flight: AtomicUsize,
    closed: AtomicBool,
}

impl std::fmt::Debug for DestinationPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationPool")
            .field("destination", &self.destination)
            .field("max_size", &self.max_size)
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl DestinationPool {
    /// Create an empty pool; connections are established lazily
    #[must_use]
    pub fn new(
        destination: Destination,
        transport: Arc<dyn Transport>,
        max_size: MaxConnections,
    ) -> Arc<Self> {
        Arc::new(Self {
            destination,
            transport,
            permits: Arc::new(Semaphore::new(max_size.get())),
            idle: Mutex::new(VecDeque::new()),
            max_size,
            created: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// The destination this pool serves
    #[must_use]
    pub const fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Check out a connection
    ///
    /// Completes immediately when an idle connection exists or capacity
    /// allows creating one; otherwise waits until a checkout is returned.
    /// Waiters are resumed in FIFO order.
    ///
    /// # Errors
    /// Fails with `ClientError::Closed` if the pool is shut down (before or
    /// while waiting) and `ClientError::Connect` if a new underlying
    /// connection cannot be established.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection, ClientError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed);
        }

        // Closing the semaphore wakes all waiters with an error
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ClientError::Closed)?;

        let reused = self.pop_idle();
        let handle = match reused {
            Some(handle) => {
                debug!(
                    connection = %handle.id(),
                    destination = %self.destination,
                    "Reusing idle connection"
                );
                handle
            }
            None => {
                let conn = self
                    .transport
                    .connect(&self.destination)
                    .await
                    .map_err(|source| {
                        // Permit drops here, freeing the capacity we held
                        ClientError::Connect {
                            destination: self.destination.clone(),
                            source,
                        }
                    })?;
                self.created.fetch_add(1, Ordering::SeqCst);
                let handle = ConnectionHandle::new(self.destination.clone(), conn);
                debug!(
                    connection = %handle.id(),
                    destination = %self.destination,
                    "Created new pooled connection"
                );
                handle
            }
        };

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(PooledConnection {
            pool: Arc::clone(self),
            handle: Some(handle),
            _permit: permit,
        })
    }

    /// Close the pool: refuse new checkouts, wake waiters with an error
    /// and destroy all idle connections. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.permits.close();

        let drained: Vec<ConnectionHandle> = {
            let mut idle = self
                .idle
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            idle.drain(..).collect()
        };
        let count = drained.len();
        for mut handle in drained {
            handle.close().await;
        }
        debug!(
            destination = %self.destination,
            closed_idle = count,
            "Destination pool closed"
        );
    }

    /// Point-in-time diagnostics
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let available = self
            .idle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len();
        PoolStatus {
            available: AvailableConnections::new(available),
            in_flight: InFlightRequests::new(self.in_flight.load(Ordering::SeqCst)),
            max_size: MaxPoolSize::new(self.max_size.get()),
            created: CreatedConnections::new(self.created.load(Ordering::SeqCst)),
        }
    }

    /// Number of checkouts currently outstanding
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Whether the identified connection is currently in the idle set
    ///
    /// Diagnostic used by eviction/reuse tests.
    #[must_use]
    pub fn is_idle(&self, id: ConnectionId) -> bool {
        self.idle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .any(|handle| handle.id() == id)
    }

    fn pop_idle(&self) -> Option<ConnectionHandle> {
        self.idle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
    }

    fn push_idle(&self, handle: ConnectionHandle) {
        self.idle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(handle);
    }
}

/// An exclusive checkout of one connection from a [`DestinationPool`]
///
/// Must end in exactly one of [`PooledConnection::release`] (healthy,
/// back to the idle set) or [`PooledConnection::evict`] (destroyed).
/// Dropping the checkout without either counts as an eviction, so a
/// panicking task cannot leak a corrupted connection back into the pool.
pub struct PooledConnection {
    pool: Arc<DestinationPool>,
    handle: Option<ConnectionHandle>,
    /// Held for the whole checkout; dropping it frees pool capacity
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("handle", &self.handle)
            .finish()
    }
}

impl PooledConnection {
    /// The pool this checkout came from
    #[must_use]
    pub fn pool(&self) -> &Arc<DestinationPool> {
        &self.pool
    }

    /// Return a healthy connection to the idle set
    ///
    /// If the pool closed while the request was in flight, the connection
    /// is destroyed instead of parked.
    pub async fn release(mut self) {
        let mut handle = self.handle.take().expect("checkout already finished");
        self.pool.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.pool.closed.load(Ordering::Acquire) {
            handle.close().await;
            return;
        }
        debug!(
            connection = %handle.id(),
            destination = %self.pool.destination,
            "Returning connection to idle set"
        );
        self.pool.push_idle(handle);
        // Permit drops when self drops, resuming the oldest waiter
    }

    /// Permanently remove the connection from the pool and close it
    pub async fn evict(mut self) {
        let mut handle = self.handle.take().expect("checkout already finished");
        self.pool.in_flight.fetch_sub(1, Ordering::SeqCst);
        debug!(
            connection = %handle.id(),
            destination = %self.pool.destination,
            "Evicting connection"
        );
        handle.close().await;
    }
}

impl std::ops::Deref for PooledConnection {
    type Target = ConnectionHandle;

    fn deref(&self) -> &Self::Target {
        self.handle.as_ref().expect("checkout already finished")
    }
}

impl std::ops::DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.handle.as_mut().expect("checkout already finished")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        // Normal paths take the handle in release()/evict(); reaching here
        // with it still present means the owning task unwound. Treat as
        // eviction: the transport closes when the handle drops.
        if let Some(handle) = self.handle.take() {
            warn!(
                connection = %handle.id(),
                destination = %self.pool.destination,
                "Checkout dropped without release or evict; discarding connection"
            );
            self.pool.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
