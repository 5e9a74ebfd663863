//! Load-test demo: fire a batch of concurrent GET requests through one
//! pooled client and report the outcome.

use anyhow::Result;
use clap::Parser;
use std::time::Instant;
use tracing::{error, info, warn};

use http_pool::config::ClientConfig;
use http_pool::runtime::{RuntimeConfig, shutdown_signal};
use http_pool::types::{Destination, Port};
use http_pool::{PooledClient, logging};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Target URL
    #[arg(short, long, default_value = "http://127.0.0.1:8080/")]
    url: String,

    /// Number of concurrent requests to fire
    #[arg(short = 'n', long, default_value = "500")]
    requests: usize,

    /// Configuration file path (defaults used when the file is absent)
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log file written alongside stdout output
    #[arg(long, default_value = logging::DEFAULT_LOG_FILE)]
    log_file: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_dual_logging(&args.log_file);

    let config = if std::path::Path::new(&args.config).exists() {
        ClientConfig::from_file(&args.config)?
    } else {
        warn!(path = %args.config, "Config file not found, using defaults");
        ClientConfig::default()
    };

    let runtime = RuntimeConfig::new(config.worker_threads()).build_runtime()?;
    runtime.block_on(run(args, config))
}

async fn run(args: Args, config: ClientConfig) -> Result<()> {
    let client = PooledClient::new(&config);

    info!(
        url = %args.url,
        requests = args.requests,
        max_connections = config.max_connections_per_destination().get(),
        "Starting request batch"
    );

    let start = Instant::now();

    // Every handle comes back immediately; the exchanges run concurrently,
    // queueing on the destination pool beyond its capacity.
    let handles: Vec<_> = (0..args.requests)
        .map(|_| client.send_get(&args.url))
        .collect();

    let batch = async {
        let mut succeeded = 0usize;
        let mut failed = 0usize;
        for handle in handles {
            match handle.await {
                Ok(response) if response.is_success() => succeeded += 1,
                Ok(response) => {
                    warn!(status = response.status(), "Non-success response");
                    failed += 1;
                }
                Err(e) => {
                    error!(error = %e, "Request failed");
                    failed += 1;
                }
            }
        }
        (succeeded, failed)
    };

    tokio::select! {
        (succeeded, failed) = batch => {
            let elapsed = start.elapsed();
            info!(
                requests = args.requests,
                succeeded,
                failed,
                elapsed_ms = elapsed.as_millis() as u64,
                pools = client.total_pools(),
                "Request batch complete"
            );
        }
        () = shutdown_signal() => {
            warn!("Interrupted; abandoning outstanding requests");
        }
    }

    if let Ok(destination) = demo_destination(&args.url) {
        info!(
            destination = %destination,
            in_flight = client.in_flight(&destination),
            "Pool state before shutdown"
        );
    }

    client.close().await;
    info!("Client closed");
    Ok(())
}

/// Best-effort destination extraction for the final diagnostics line
fn demo_destination(url: &str) -> Result<Destination> {
    let parsed = url::Url::parse(url)?;
    let host = parsed.host_str().unwrap_or_default();
    let port = match parsed.port() {
        Some(raw) => Port::try_from(raw)?,
        None => Port::HTTP,
    };
    Ok(Destination::new(host, port)?)
}
