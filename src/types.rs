//! Core types for destinations, identities and validated configuration values
//!
//! This module provides the pooling key (`Destination`), validated NonZero
//! wrappers for configuration, and newtypes for pool diagnostics so that the
//! different counters cannot be mixed up accidentally.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::{NonZeroU16, NonZeroUsize};
use uuid::Uuid;

/// Errors produced when validating typed configuration values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Port number was zero
    #[error("port cannot be 0")]
    InvalidPort,
    /// Connection limit was zero
    #[error("max connections cannot be 0")]
    InvalidMaxConnections,
    /// Worker thread count was zero
    #[error("thread count cannot be 0")]
    InvalidThreadCount,
    /// Host component was empty
    #[error("host cannot be empty")]
    EmptyHost,
}

/// A validated network port number that cannot be zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Port(NonZeroU16);

impl Port {
    /// Create a new Port from a u16, returning None if port is 0
    #[must_use]
    pub const fn new(port: u16) -> Option<Self> {
        match NonZeroU16::new(port) {
            Some(nz) => Some(Self(nz)),
            None => None,
        }
    }

    /// Get the port number as u16
    #[must_use]
    #[inline]
    pub const fn get(&self) -> u16 {
        self.0.get()
    }

    /// Default HTTP port (80)
    pub const HTTP: Self = Self(NonZeroU16::new(80).unwrap());
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

impl TryFrom<u16> for Port {
    type Error = ValidationError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(ValidationError::InvalidPort)
    }
}

impl From<Port> for u16 {
    fn from(port: Port) -> Self {
        port.get()
    }
}

impl Serialize for Port {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u16(self.get())
    }
}

impl<'de> Deserialize<'de> for Port {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let port = u16::deserialize(deserializer)?;
        Self::new(port).ok_or_else(|| serde::de::Error::custom("port cannot be 0"))
    }
}

/// A (host, port) pair identifying one pooling domain
///
/// Two destinations are equal iff host and port match exactly; there is no
/// DNS resolution folding, so `example.com:80` and its IP address pool
/// separately.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    host: String,
    port: Port,
}

impl Destination {
    /// Create a destination from a host and port
    ///
    /// # Errors
    /// Returns `ValidationError::EmptyHost` if the host is empty
    pub fn new(host: impl Into<String>, port: Port) -> Result<Self, ValidationError> {
        let host = host.into();
        if host.is_empty() {
            return Err(ValidationError::EmptyHost);
        }
        Ok(Self { host, port })
    }

    /// Get the host
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Get the port
    #[must_use]
    #[inline]
    pub const fn port(&self) -> Port {
        self.port
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A non-zero per-destination connection limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaxConnections(NonZeroUsize);

impl MaxConnections {
    /// Create a new MaxConnections, returning None if value is 0
    #[must_use]
    pub const fn new(value: usize) -> Option<Self> {
        match NonZeroUsize::new(value) {
            Some(nz) => Some(Self(nz)),
            None => None,
        }
    }

    /// Get the value as usize
    #[must_use]
    #[inline]
    pub const fn get(&self) -> usize {
        self.0.get()
    }

    /// Default maximum connections per destination
    pub const DEFAULT: Self = Self(NonZeroUsize::new(10).unwrap());
}

impl fmt::Display for MaxConnections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

impl From<MaxConnections> for usize {
    fn from(max: MaxConnections) -> Self {
        max.get()
    }
}

impl Serialize for MaxConnections {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.get() as u64)
    }
}

impl<'de> Deserialize<'de> for MaxConnections {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = usize::deserialize(deserializer)?;
        Self::new(value).ok_or_else(|| serde::de::Error::custom("max connections cannot be 0"))
    }
}

/// A non-zero worker thread count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadCount(NonZeroUsize);

impl ThreadCount {
    /// Create a new ThreadCount, returning None if value is 0
    #[must_use]
    pub const fn new(value: usize) -> Option<Self> {
        match NonZeroUsize::new(value) {
            Some(nz) => Some(Self(nz)),
            None => None,
        }
    }

    /// Get the value as usize
    #[must_use]
    #[inline]
    pub const fn get(&self) -> usize {
        self.0.get()
    }
}

impl fmt::Display for ThreadCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

impl std::str::FromStr for ThreadCount {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: usize = s
            .parse()
            .map_err(|_| ValidationError::InvalidThreadCount)?;
        Self::new(value).ok_or(ValidationError::InvalidThreadCount)
    }
}

impl Serialize for ThreadCount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.get() as u64)
    }
}

impl<'de> Deserialize<'de> for ThreadCount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = usize::deserialize(deserializer)?;
        Self::new(value).ok_or_else(|| serde::de::Error::custom("thread count cannot be 0"))
    }
}

/// Unique identifier for pooled connections
///
/// Used for logging correlation and for the identity-reuse checks in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a new unique connection ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of idle connections available in a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AvailableConnections(usize);

impl AvailableConnections {
    /// Create a new available connections count
    #[inline]
    #[must_use]
    pub const fn new(count: usize) -> Self {
        Self(count)
    }

    /// Get the raw value
    #[inline]
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for AvailableConnections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of connections currently checked out of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InFlightRequests(usize);

impl InFlightRequests {
    /// Create a new in-flight count
    #[inline]
    #[must_use]
    pub const fn new(count: usize) -> Self {
        Self(count)
    }

    /// Get the raw value
    #[inline]
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for InFlightRequests {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Configured maximum size of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MaxPoolSize(usize);

impl MaxPoolSize {
    /// Create a new maximum pool size
    #[inline]
    #[must_use]
    pub const fn new(size: usize) -> Self {
        Self(size)
    }

    /// Get the raw value
    #[inline]
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for MaxPoolSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Total connections created by a pool over its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CreatedConnections(usize);

impl CreatedConnections {
    /// Create a new created connections count
    #[inline]
    #[must_use]
    pub const fn new(count: usize) -> Self {
        Self(count)
    }

    /// Get the raw value
    #[inline]
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for CreatedConnections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
