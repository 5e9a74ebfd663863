//! Tokio runtime configuration for binary targets
//!
//! The client library itself runs on whatever runtime the caller provides;
//! this module builds one from the configured worker thread count for the
//! demo binary and other standalone tools.

use anyhow::Result;

use crate::types::ThreadCount;

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of worker threads
    worker_threads: usize,
}

impl RuntimeConfig {
    /// Create runtime config from a thread count
    #[must_use]
    pub const fn new(threads: ThreadCount) -> Self {
        Self {
            worker_threads: threads.get(),
        }
    }

    /// Get number of worker threads
    #[must_use]
    pub const fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    /// Check if single-threaded
    #[must_use]
    pub const fn is_single_threaded(&self) -> bool {
        self.worker_threads == 1
    }

    /// Build the tokio runtime
    ///
    /// Creates either a current-thread or multi-threaded runtime based on
    /// the configured worker thread count.
    ///
    /// # Errors
    /// Returns error if runtime creation fails
    pub fn build_runtime(self) -> Result<tokio::runtime::Runtime> {
        let rt = if self.is_single_threaded() {
            tracing::info!("Starting with single-threaded runtime");
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?
        } else {
            tracing::info!(
                worker_threads = self.worker_threads,
                "Starting with multi-threaded runtime"
            );
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(self.worker_threads)
                .enable_all()
                .build()?
        };
        Ok(rt)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { worker_threads: 1 }
    }
}

/// Wait for an interrupt: Ctrl+C, or SIGTERM on Unix
///
/// Used by the demo binary to abandon an in-progress batch and still run
/// the client's orderly close.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        signal(SignalKind::terminate())
            .expect("SIGTERM handler installation failed")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Ctrl+C handler installation failed");
            }
        }
        () = terminate => {}
    }
    tracing::info!("Shutdown signal received");
}
