//! Error types for the pooled HTTP client
//!
//! Every request failure surfaces to the caller through its completion
//! handle as one of these variants; nothing is thrown across task
//! boundaries and nothing is silently dropped.

use std::fmt;
use std::time::Duration;

use crate::types::Destination;

/// Errors delivered through a request's completion handle
#[derive(Debug)]
#[non_exhaustive]
pub enum ClientError {
    /// The client or registry has been shut down; acquisition failed
    /// before any connection was touched
    Closed,

    /// Establishing a new transport connection failed
    Connect {
        destination: Destination,
        source: std::io::Error,
    },

    /// The transport failed while a request was in flight; the connection
    /// has been evicted
    Transport {
        destination: Destination,
        reason: String,
    },

    /// No terminal event arrived within the configured duration; the
    /// connection has been evicted
    Timeout {
        destination: Destination,
        elapsed: Duration,
    },

    /// Inbound events arrived out of the expected order (likely a peer or
    /// codec bug); the connection has been evicted
    Protocol {
        destination: Destination,
        detail: String,
    },

    /// The request could not be constructed (bad URL, unsupported scheme)
    InvalidRequest { detail: String },

    /// Internal bookkeeping failure; indicates a bug in the client itself
    Internal { detail: String },
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "Client is closed"),
            Self::Connect {
                destination,
                source,
            } => {
                write!(f, "Failed to connect to {}: {}", destination, source)
            }
            Self::Transport {
                destination,
                reason,
            } => {
                write!(f, "Transport error on {}: {}", destination, reason)
            }
            Self::Timeout {
                destination,
                elapsed,
            } => {
                write!(
                    f,
                    "Request to {} timed out after {:?}",
                    destination, elapsed
                )
            }
            Self::Protocol {
                destination,
                detail,
            } => {
                write!(f, "Protocol violation from {}: {}", destination, detail)
            }
            Self::InvalidRequest { detail } => write!(f, "Invalid request: {}", detail),
            Self::Internal { detail } => write!(f, "Internal client error: {}", detail),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connect { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl ClientError {
    /// Check if this is a timeout failure
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this failure evicted the connection it used
    ///
    /// Acquisition and request-construction failures never touch a connection;
    /// everything that happened on a live connection destroys it.
    #[must_use]
    pub const fn evicts_connection(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Timeout { .. } | Self::Protocol { .. }
        )
    }

    /// Check if this error indicates the client was shut down
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Get the appropriate log level for this error
    #[must_use]
    pub fn log_level(&self) -> tracing::Level {
        match self {
            // Protocol violations indicate a collaborator bug
            Self::Protocol { .. } | Self::Internal { .. } => tracing::Level::ERROR,
            // Closed-client failures during shutdown are expected
            Self::Closed => tracing::Level::DEBUG,
            // Everything else might be transient
            _ => tracing::Level::WARN,
        }
    }
}
