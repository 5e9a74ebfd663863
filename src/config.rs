//! Client configuration
//!
//! Configuration is fixed for the lifetime of a client instance. It can be
//! built programmatically through [`ClientConfig::builder`] or loaded from a
//! TOML file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::types::{MaxConnections, ThreadCount};

/// Default per-request timeout in milliseconds
const fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_max_connections() -> MaxConnections {
    MaxConnections::DEFAULT
}

fn default_worker_threads() -> ThreadCount {
    ThreadCount::new(1).unwrap()
}

/// Configuration for a [`PooledClient`](crate::client::PooledClient)
///
/// # Examples
///
/// ```
/// use http_pool::config::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::builder()
///     .max_connections_per_destination(20)
///     .request_timeout(Duration::from_secs(5))
///     .build()
///     .unwrap();
/// assert_eq!(config.max_connections_per_destination().get(), 20);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Maximum connections kept per (host, port) destination
    #[serde(default = "default_max_connections")]
    max_connections_per_destination: MaxConnections,

    /// Worker threads for the runtime built by [`crate::runtime`]
    #[serde(default = "default_worker_threads")]
    worker_threads: ThreadCount,

    /// Per-request timeout in milliseconds; 0 disables the timeout entirely
    #[serde(default = "default_request_timeout_ms")]
    request_timeout_ms: u64,
}

impl ClientConfig {
    /// Create a builder with default values
    #[must_use]
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Maximum connections per destination
    #[must_use]
    #[inline]
    pub const fn max_connections_per_destination(&self) -> MaxConnections {
        self.max_connections_per_destination
    }

    /// Worker thread count
    #[must_use]
    #[inline]
    pub const fn worker_threads(&self) -> ThreadCount {
        self.worker_threads
    }

    /// Per-request timeout
    ///
    /// `Duration::ZERO` means the timeout is disabled; a request to a
    /// destination that never responds will then hang until the caller
    /// drops the completion handle. This is documented caller
    /// responsibility, not a defect.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Check whether the per-request timeout is enabled
    #[must_use]
    pub const fn timeout_enabled(&self) -> bool {
        self.request_timeout_ms > 0
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Builder::default().build().expect("default config is valid")
    }
}

/// Builder for [`ClientConfig`]
#[derive(Debug, Clone)]
pub struct Builder {
    max_connections_per_destination: usize,
    worker_threads: usize,
    request_timeout: Duration,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            max_connections_per_destination: MaxConnections::DEFAULT.get(),
            worker_threads: 1,
            request_timeout: Duration::from_millis(default_request_timeout_ms()),
        }
    }
}

impl Builder {
    /// Set the maximum number of pooled connections per destination
    #[must_use]
    pub fn max_connections_per_destination(mut self, max: usize) -> Self {
        self.max_connections_per_destination = max;
        self
    }

    /// Set the number of worker threads
    #[must_use]
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Set the per-request timeout (`Duration::ZERO` disables it)
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// Returns an error if the connection limit or thread count is zero
    pub fn build(self) -> Result<ClientConfig> {
        let max_connections_per_destination =
            MaxConnections::new(self.max_connections_per_destination)
                .context("max connections per destination must be at least 1")?;
        let worker_threads =
            ThreadCount::new(self.worker_threads).context("worker threads must be at least 1")?;

        Ok(ClientConfig {
            max_connections_per_destination,
            worker_threads,
            request_timeout_ms: self.request_timeout.as_millis() as u64,
        })
    }
}
