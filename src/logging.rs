//! Logging setup: stdout plus a persistent log file

use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Log file written when no explicit name is configured
pub const DEFAULT_LOG_FILE: &str = "debug.log";

/// Level filter from `RUST_LOG`, defaulting to "info" when unset
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize logging with dual output: stdout and `log_file`
///
/// Both outputs honor `RUST_LOG`. The file output is non-blocking and
/// ANSI-free; its appender guard is forgotten to keep it alive for the
/// program lifetime.
pub fn init_dual_logging(log_file: &str) {
    let file_appender = tracing_appender::rolling::never(".", log_file.to_owned());
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(env_filter()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(env_filter()),
        )
        .init();

    std::mem::forget(guard);
}
