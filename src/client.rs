//! The asynchronous pooled HTTP client facade
//!
//! [`PooledClient`] is cheap to clone and safe to share across tasks. Each
//! send returns a [`CompletionHandle`] immediately; the exchange itself
//! (pool checkout, transmission, response assembly, timeout) runs on a
//! spawned task and delivers its single outcome through the handle.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::assembler;
use crate::codec::Request;
use crate::completion::{CompletionHandle, CompletionSlot};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::pool::PoolRegistry;
use crate::transport::{TcpTransport, Transport};
use crate::types::{Destination, Port};

/// A connection-pooled HTTP/1.1 client
///
/// Connections are pooled per destination (host and port), at most
/// `max_connections_per_destination` each, created lazily and reused across
/// requests. Requests beyond a destination's capacity queue in arrival
/// order for the next free connection.
#[derive(Debug, Clone)]
pub struct PooledClient {
    registry: Arc<PoolRegistry>,
    request_timeout: Duration,
}

impl PooledClient {
    /// Create a client over real TCP connections
    #[must_use]
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_transport(config, Arc::new(TcpTransport::new()))
    }

    /// Create a client over a caller-supplied transport
    pub fn with_transport(config: &ClientConfig, transport: Arc<dyn Transport>) -> Self {
        info!(
            max_connections = config.max_connections_per_destination().get(),
            timeout = ?config.request_timeout(),
            "Creating pooled HTTP client"
        );
        Self {
            registry: Arc::new(PoolRegistry::new(
                transport,
                config.max_connections_per_destination(),
            )),
            request_timeout: config.request_timeout(),
        }
    }

    /// Send a GET request
    ///
    /// Returns immediately; await the handle for the outcome. A malformed
    /// URL resolves the handle with `ClientError::InvalidRequest`.
    pub fn send_get(&self, url: &str) -> CompletionHandle {
        self.send_get_with_params(url, &[])
    }

    /// Send a GET request with extra query parameters
    ///
    /// The parameters are percent-encoded and appended to any query string
    /// already present on the URL.
    pub fn send_get_with_params(&self, url: &str, params: &[(&str, &str)]) -> CompletionHandle {
        self.submit(url, |parsed| Request::get(parsed, params))
    }

    /// Send a POST request with a form-urlencoded body
    pub fn send_post(&self, url: &str, form: &[(&str, &str)]) -> CompletionHandle {
        self.submit(url, |parsed| Request::post_form(parsed, form))
    }

    /// Close the client: tear down every pool and refuse further requests
    ///
    /// Idempotent. Requests already in flight run to completion; their
    /// connections are destroyed on release instead of rejoining a pool.
    /// New sends resolve with an acquisition error.
    pub async fn close(&self) {
        self.registry.shutdown().await;
    }

    /// Whether [`PooledClient::close`] has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.registry.is_closed()
    }

    /// Number of destination pools created so far
    #[must_use]
    pub fn total_pools(&self) -> usize {
        self.registry.total_pools()
    }

    /// Requests currently in flight to one destination
    #[must_use]
    pub fn in_flight(&self, destination: &Destination) -> usize {
        self.registry.in_flight(destination)
    }

    /// Parse the URL, build the wire payload and hand the exchange to a
    /// dispatch task
    fn submit(&self, url: &str, build: impl FnOnce(&Url) -> Request) -> CompletionHandle {
        let (slot, handle) = CompletionSlot::channel();

        let (destination, payload) = match parse_destination(url) {
            Ok((parsed, destination)) => (destination, build(&parsed).encode()),
            Err(e) => {
                slot.fail(e);
                return handle;
            }
        };

        let registry = Arc::clone(&self.registry);
        let timeout = self.request_timeout;
        tokio::spawn(async move {
            dispatch(registry, destination, payload, slot, timeout).await;
        });
        handle
    }
}

/// Check out a connection and run the exchange, funnelling acquisition
/// failures into the completion slot
async fn dispatch(
    registry: Arc<PoolRegistry>,
    destination: Destination,
    payload: Vec<u8>,
    slot: CompletionSlot,
    timeout: Duration,
) {
    let pool = match registry.pool(&destination).await {
        Ok(pool) => pool,
        Err(e) => {
            slot.fail(e);
            return;
        }
    };

    let conn = match pool.acquire().await {
        Ok(conn) => conn,
        Err(e) => {
            debug!(destination = %destination, error = %e, "Connection acquisition failed");
            slot.fail(e);
            return;
        }
    };

    assembler::run_exchange(conn, slot, payload, timeout).await;
}

/// Resolve a URL string to a destination, validating the scheme
fn parse_destination(url: &str) -> Result<(Url, Destination), ClientError> {
    let parsed = Url::parse(url).map_err(|e| ClientError::InvalidRequest {
        detail: format!("invalid url {}: {}", url, e),
    })?;

    if parsed.scheme() != "http" {
        return Err(ClientError::InvalidRequest {
            detail: format!("unsupported scheme {}", parsed.scheme()),
        });
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| ClientError::InvalidRequest {
            detail: format!("url {} has no host", url),
        })?;
    let port = match parsed.port() {
        Some(raw) => Port::new(raw).ok_or_else(|| ClientError::InvalidRequest {
            detail: format!("url {} has an invalid port", url),
        })?,
        None => Port::HTTP,
    };
    let destination =
        Destination::new(host, port).map_err(|e| ClientError::InvalidRequest {
            detail: e.to_string(),
        })?;
    Ok((parsed, destination))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{Script, ScriptedTransport, ok_events};
    use crate::transport::Event;
    use bytes::Bytes;

    fn config(max: usize, timeout: Duration) -> ClientConfig {
        ClientConfig::builder()
            .max_connections_per_destination(max)
            .request_timeout(timeout)
            .build()
            .unwrap()
    }

    fn client_over(transport: ScriptedTransport, max: usize) -> PooledClient {
        PooledClient::with_transport(&config(max, Duration::ZERO), Arc::new(transport))
    }

    #[test]
    fn test_parse_destination_defaults_port_80() {
        let (_, destination) = parse_destination("http://example.com/path").unwrap();
        assert_eq!(destination.to_string(), "example.com:80");
    }

    #[test]
    fn test_parse_destination_explicit_port() {
        let (_, destination) = parse_destination("http://example.com:8080/").unwrap();
        assert_eq!(destination.to_string(), "example.com:8080");
    }

    #[test]
    fn test_parse_destination_rejects_https() {
        let err = parse_destination("https://example.com/").unwrap_err();
        assert!(matches!(err, ClientError::InvalidRequest { .. }));
    }

    #[test]
    fn test_parse_destination_rejects_garbage() {
        assert!(parse_destination("not a url").is_err());
        assert!(parse_destination("http://").is_err());
    }

    #[tokio::test]
    async fn test_get_resolves_with_response() {
        let client = client_over(ScriptedTransport::always_ok(b"hello"), 2);

        let response = client.send_get("http://example.com/path").await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.body_text(), "hello");
    }

    #[tokio::test]
    async fn test_post_resolves_with_response() {
        let client = client_over(ScriptedTransport::always_ok(b"created"), 2);

        let response = client
            .send_post("http://example.com/submit", &[("name", "x")])
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.body(), b"created");
    }

    #[tokio::test]
    async fn test_invalid_url_fails_through_handle() {
        let client = client_over(ScriptedTransport::always_ok(b"ok"), 2);

        let err = client.send_get("https://secure.example.com/").await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidRequest { .. }));

        // Nothing was dispatched
        assert_eq!(client.total_pools(), 0);
    }

    #[tokio::test]
    async fn test_distinct_destinations_distinct_pools() {
        let client = client_over(ScriptedTransport::always_ok(b"ok"), 2);

        client.send_get("http://a.example.com/").await.unwrap();
        client.send_get("http://b.example.com/").await.unwrap();
        client.send_get("http://a.example.com:8080/").await.unwrap();
        assert_eq!(client.total_pools(), 3);
    }

    #[tokio::test]
    async fn test_connect_failure_resolves_handle() {
        // Empty script list makes every connect fail
        let client = client_over(ScriptedTransport::refuse_connections(), 2);

        let err = client.send_get("http://down.example.com/").await.unwrap_err();
        assert!(matches!(err, ClientError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_transport_error_resolves_handle() {
        let transport = ScriptedTransport::new(vec![Script::Events(vec![
            Event::StatusReceived(200),
            Event::BodyFragment(Bytes::from_static(b"partial")),
            Event::TransportError("connection reset".to_string()),
        ])]);
        let client = client_over(transport, 1);

        let err = client.send_get("http://example.com/").await.unwrap_err();
        assert!(matches!(err, ClientError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_close_rejects_new_requests() {
        let client = client_over(ScriptedTransport::always_ok(b"ok"), 2);
        client.send_get("http://example.com/").await.unwrap();

        client.close().await;
        assert!(client.is_closed());

        let err = client.send_get("http://example.com/").await.unwrap_err();
        assert!(err.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_request_completes_through_close() {
        let transport = Arc::new(ScriptedTransport::new(vec![Script::DelayedEvents(
            Duration::from_millis(50),
            ok_events(b"late"),
        )]));
        let client = PooledClient::with_transport(
            &config(1, Duration::ZERO),
            Arc::clone(&transport) as Arc<dyn Transport>,
        );

        let pending = client.send_get("http://example.com/");
        // Let the dispatch task check the connection out before closing
        tokio::time::sleep(Duration::from_millis(10)).await;
        client.close().await;

        let response = pending.await.unwrap();
        assert_eq!(response.body(), b"late");

        // Released into a closed pool, the connection is destroyed rather
        // than parked in the idle set
        assert_eq!(transport.live_count(), 0);
        assert_eq!(client.in_flight(&Destination::new("example.com", Port::HTTP).unwrap()), 0);
    }

    #[tokio::test]
    async fn test_close_idempotent() {
        let client = client_over(ScriptedTransport::always_ok(b"ok"), 2);
        client.close().await;
        client.close().await;
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_pool() {
        let transport = ScriptedTransport::new(vec![
            Script::Events(ok_events(b"one")),
            Script::Events(ok_events(b"two")),
        ]);
        let client = client_over(transport, 2);

        let first = client.send_get("http://example.com/one");
        let second = client.send_get("http://example.com/two");

        let (a, b) = tokio::join!(first, second);
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(client.total_pools(), 1);
    }

    #[tokio::test]
    async fn test_capacity_one_serializes_two_requests_on_one_connection() {
        let transport = Arc::new(ScriptedTransport::always_ok(b"ok"));
        let client = PooledClient::with_transport(
            &config(1, Duration::ZERO),
            Arc::clone(&transport) as Arc<dyn Transport>,
        );

        let first = client.send_get("http://example.com/first");
        let second = client.send_get("http://example.com/second");

        let (a, b) = tokio::join!(first, second);
        assert_eq!(a.unwrap().status(), 200);
        assert_eq!(b.unwrap().status(), 200);

        // The second request waited for the first's release and reused the
        // same pooled connection.
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_request_times_out() {
        let transport = ScriptedTransport::new(vec![Script::Stall]);
        let client = PooledClient::with_transport(
            &config(1, Duration::from_millis(100)),
            Arc::new(transport),
        );

        let err = client.send_get("http://slow.example.com/").await.unwrap_err();
        assert!(err.is_timeout());
    }
}
