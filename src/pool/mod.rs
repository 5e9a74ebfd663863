//! Connection pooling: per-destination bounded pools and the registry
//! that maps destinations to them

pub mod connection;
pub mod destination_pool;
pub mod registry;

pub use connection::ConnectionHandle;
pub use destination_pool::{DestinationPool, PooledConnection};
pub use registry::PoolRegistry;

use crate::types::{AvailableConnections, CreatedConnections, InFlightRequests, MaxPoolSize};

/// Point-in-time pool diagnostics
#[derive(Debug, Clone)]
pub struct PoolStatus {
    /// Idle connections ready for checkout
    pub available: AvailableConnections,
    /// Connections currently checked out
    pub in_flight: InFlightRequests,
    /// Configured capacity
    pub max_size: MaxPoolSize,
    /// Connections created over the pool's lifetime
    pub created: CreatedConnections,
}
