//! Per-request timeout behavior over real connections


use std::time::{Duration, Instant};
use test_helpers::{MockHttpServer, ServerBehavior};

use http_pool::config::ClientConfig;
use http_pool::PooledClient;

fn client_with_timeout(timeout: Duration) -> PooledClient {
    let config = ClientConfig::builder()
        .max_connections_per_destination(2)
        .request_timeout(timeout)
        .build()
        .unwrap();
    PooledClient::new(&config)
}

#[tokio::test]
async fn test_stalled_server_times_out() {
    let server = MockHttpServer::spawn(ServerBehavior::Stall).await;
    let client = client_with_timeout(Duration::from_millis(200));

    let start = Instant::now();
    let err = client.send_get(&server.url("/")).await.unwrap_err();
    let elapsed = start.elapsed();

    assert!(err.is_timeout(), "expected timeout, got {}", err);
    assert!(
        elapsed >= Duration::from_millis(200),
        "timed out early at {:?}",
        elapsed
    );
    assert!(
        elapsed < Duration::from_secs(2),
        "timeout fired late at {:?}",
        elapsed
    );

    client.close().await;
}

#[tokio::test]
async fn test_timed_out_connection_not_reused() {
    let server = MockHttpServer::spawn(ServerBehavior::Stall).await;
    let client = client_with_timeout(Duration::from_millis(150));
    let url = server.url("/");

    client.send_get(&url).await.unwrap_err();
    client.send_get(&url).await.unwrap_err();

    // The first connection was evicted, so the second request dialed anew
    assert_eq!(server.connections_accepted(), 2);

    client.close().await;
}

#[tokio::test]
async fn test_slow_response_within_timeout_succeeds() {
    let server = MockHttpServer::spawn(ServerBehavior::Slow(
        Duration::from_millis(100),
        "worth the wait".to_string(),
    ))
    .await;
    let client = client_with_timeout(Duration::from_secs(5));

    let response = client.send_get(&server.url("/")).await.unwrap();
    assert_eq!(response.body_text(), "worth the wait");

    client.close().await;
}

#[tokio::test]
async fn test_zero_timeout_waits_indefinitely() {
    let server = MockHttpServer::spawn(ServerBehavior::Slow(
        Duration::from_millis(300),
        "eventually".to_string(),
    ))
    .await;
    let client = client_with_timeout(Duration::ZERO);

    let response = client.send_get(&server.url("/")).await.unwrap();
    assert_eq!(response.body_text(), "eventually");

    client.close().await;
}

#[tokio::test]
async fn test_timeout_frees_pool_capacity() {
    let server = MockHttpServer::spawn(ServerBehavior::Stall).await;
    let config = ClientConfig::builder()
        .max_connections_per_destination(1)
        .request_timeout(Duration::from_millis(150))
        .build()
        .unwrap();
    let client = PooledClient::new(&config);
    let url = server.url("/");

    // With capacity 1, the second request can only proceed if the first
    // timeout released the (evicted) connection's capacity.
    let first = client.send_get(&url);
    let second = client.send_get(&url);

    let (a, b) = tokio::join!(first, second);
    assert!(a.unwrap_err().is_timeout());
    assert!(b.unwrap_err().is_timeout());

    client.close().await;
}
