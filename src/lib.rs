//! Asynchronous connection-pooled HTTP/1.1 client
//!
//! Connections are pooled per destination (host and port), bounded by a
//! configurable capacity, created lazily and reused across requests. Each
//! send returns a [`CompletionHandle`] immediately; the exchange runs on
//! its own task and resolves the handle exactly once with the assembled
//! response or a failure. A per-request timeout bounds how long a caller
//! waits and evicts the stalled connection from its pool.
//!
//! ```no_run
//! use http_pool::{ClientConfig, PooledClient};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), http_pool::ClientError> {
//! let config = ClientConfig::builder()
//!     .max_connections_per_destination(10)
//!     .request_timeout(Duration::from_secs(5))
//!     .build()
//!     .expect("valid config");
//! let client = PooledClient::new(&config);
//!
//! let response = client
//!     .send_get_with_params("http://example.com/search", &[("q", "rust")])
//!     .await?;
//! println!("{}: {}", response.status(), response.body_text());
//!
//! client.close().await;
//! # Ok(())
//! # }
//! ```

mod assembler;
pub mod client;
pub mod codec;
pub mod completion;
pub mod config;
pub mod error;
pub mod logging;
pub mod pool;
pub mod response;
pub mod runtime;
pub mod timer;
pub mod transport;
pub mod types;

pub use client::PooledClient;
pub use completion::{CompletionHandle, RequestResult};
pub use config::ClientConfig;
pub use error::ClientError;
pub use response::Response;
pub use types::{Destination, MaxConnections, Port};
