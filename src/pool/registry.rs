//! Concurrency-safe mapping from destination to its connection pool
//!
//! Pools are created lazily on first acquire for a destination and live
//! until the registry is shut down; they are never removed during normal
//! operation. Concurrent callers racing to create the pool for a new
//! destination all observe the same instance.

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

use super::destination_pool::DestinationPool;
use crate::error::ClientError;
use crate::transport::Transport;
use crate::types::{Destination, MaxConnections};

/// Registry of per-destination connection pools
pub struct PoolRegistry {
    pools: DashMap<Destination, Arc<DestinationPool>>,
    transport: Arc<dyn Transport>,
    max_per_destination: MaxConnections,
    closed: AtomicBool,
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("pools", &self.pools.len())
            .field("max_per_destination", &self.max_per_destination)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl PoolRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, max_per_destination: MaxConnections) -> Self {
        Self {
            pools: DashMap::new(),
            transport,
            max_per_destination,
            closed: AtomicBool::new(false),
        }
    }

    /// Get the pool for a destination, creating it on first use
    ///
    /// Idempotent per distinct destination: the map's entry API makes the
    /// first writer win, so two racing callers never construct two pools
    /// for the same key.
    ///
    /// # Errors
    /// Fails with `ClientError::Closed` after [`PoolRegistry::shutdown`].
    pub async fn pool(
        &self,
        destination: &Destination,
    ) -> Result<Arc<DestinationPool>, ClientError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed);
        }

        let pool = self
            .pools
            .entry(destination.clone())
            .or_insert_with(|| {
                info!(destination = %destination, "Creating connection pool");
                DestinationPool::new(
                    destination.clone(),
                    Arc::clone(&self.transport),
                    self.max_per_destination,
                )
            })
            .clone();

        // Re-check after the insert: a shutdown that raced the creation
        // above may have finished its teardown loop before this pool was in
        // the map, in which case it is ours to tear down.
        if self.closed.load(Ordering::Acquire) {
            self.pools.remove(destination);
            pool.close().await;
            return Err(ClientError::Closed);
        }
        Ok(pool)
    }

    /// Number of pools currently registered
    #[must_use]
    pub fn total_pools(&self) -> usize {
        self.pools.len()
    }

    /// Checked-out connection count for one destination (0 if no pool)
    #[must_use]
    pub fn in_flight(&self, destination: &Destination) -> usize {
        self.pools
            .get(destination)
            .map_or(0, |pool| pool.in_flight())
    }

    /// Close every pool and refuse further use; idempotent
    ///
    /// The closed flag is set before any pool is torn down, so no new pool
    /// can appear while the teardown loop runs.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let pools: Vec<Arc<DestinationPool>> = self
            .pools
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        info!(pools = pools.len(), "Shutting down pool registry");
        for pool in pools {
            pool.close().await;
        }
    }

    /// Whether the registry has been shut down
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
