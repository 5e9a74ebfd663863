//! Response assembly: drives one request/response exchange on a checked-out
//! connection
//!
//! A single task owns the connection for the whole exchange, so inbound
//! events are handled strictly in arrival order. The task races the
//! connection's timeout guard for the request's completion slot; whichever
//! side claims the slot first delivers the outcome, and the loser's path
//! degrades to a no-op on the slot. The connection is returned to its pool
//! or evicted exactly once, always from this task.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use crate::completion::CompletionSlot;
use crate::error::ClientError;
use crate::pool::PooledConnection;
use crate::response::ResponseBuilder;
use crate::transport::Event;

/// Per-exchange response state
enum ExchangeState {
    /// Request sent, status line not yet seen
    AwaitingStatus,
    /// Status seen, accumulating body fragments
    AccumulatingBody(ResponseBuilder),
}

impl ExchangeState {
    const fn name(&self) -> &'static str {
        match self {
            Self::AwaitingStatus => "awaiting-status",
            Self::AccumulatingBody(_) => "accumulating-body",
        }
    }
}

/// Run one exchange to completion
///
/// Attaches the completion slot to the connection, arms the timeout,
/// transmits the request and consumes inbound events until a terminal
/// condition. Exactly one of success, transport error, protocol violation
/// or timeout resolves the slot; the connection is then released (healthy
/// success) or evicted (everything else).
pub(crate) async fn run_exchange(
    mut conn: PooledConnection,
    slot: CompletionSlot,
    payload: Vec<u8>,
    timeout: Duration,
) {
    let destination = conn.destination().clone();

    if let Err(e) = conn.attach_completion(slot.clone()) {
        // Client bug: the connection came out of the pool dirty
        slot.fail(e);
        conn.evict().await;
        return;
    }

    // The guard claims the slot itself on fire; the notify only tells this
    // task to stop reading and evict. It is signalled solely by a winning
    // claim, so a timeout that loses the race stays silent.
    let timed_out = Arc::new(Notify::new());
    {
        let slot = slot.clone();
        let timed_out = timed_out.clone();
        let destination = destination.clone();
        conn.timeout_guard().enable(timeout, move || {
            let claimed = slot.fail(ClientError::Timeout {
                destination: destination.clone(),
                elapsed: timeout,
            });
            if claimed {
                warn!(destination = %destination, ?timeout, "Request timed out");
                timed_out.notify_one();
            } else {
                debug!(
                    destination = %destination,
                    "Timeout fired after resolution; ignoring"
                );
            }
        });
    }

    if let Err(e) = conn.send(&payload).await {
        // A write failure takes the same path as an inbound transport error
        finish_failure(
            conn,
            &slot,
            ClientError::Transport {
                destination,
                reason: format!("write failed: {}", e),
            },
        )
        .await;
        return;
    }

    let mut state = ExchangeState::AwaitingStatus;
    loop {
        let event = tokio::select! {
            // Biased so a terminal event already queued beats the eviction
            // signal; the slot claim has already settled who won.
            biased;
            event = conn.next_event() => event,
            () = timed_out.notified() => {
                conn.take_completion();
                conn.evict().await;
                return;
            }
        };

        match (event, &mut state) {
            (Event::StatusReceived(code), ExchangeState::AwaitingStatus) => {
                debug!(destination = %destination, status = code, "Response headers received");
                state = ExchangeState::AccumulatingBody(ResponseBuilder::new(code));
            }
            (Event::BodyFragment(fragment), ExchangeState::AccumulatingBody(builder)) => {
                builder.append_fragment(&fragment);
            }
            (Event::MessageComplete, ExchangeState::AccumulatingBody(_)) => {
                let ExchangeState::AccumulatingBody(builder) =
                    std::mem::replace(&mut state, ExchangeState::AwaitingStatus)
                else {
                    unreachable!();
                };
                finish_success(conn, &slot, builder).await;
                return;
            }
            (Event::TransportError(reason), _) => {
                finish_failure(
                    conn,
                    &slot,
                    ClientError::Transport {
                        destination,
                        reason,
                    },
                )
                .await;
                return;
            }
            // Everything else is an ordering violation from the peer/codec
            (event, state) => {
                let detail = format!("unexpected {:?} in state {}", event, state.name());
                finish_failure(
                    conn,
                    &slot,
                    ClientError::Protocol {
                        destination,
                        detail,
                    },
                )
                .await;
                return;
            }
        }
    }
}

/// Terminal success path: disarm, claim-resolve, release or evict
async fn finish_success(mut conn: PooledConnection, slot: &CompletionSlot, builder: ResponseBuilder) {
    conn.timeout_guard().disable();
    conn.take_completion();

    if !slot.resolve(builder.finish()) {
        // The timeout claimed the slot in the same instant the terminal
        // event arrived; the loser must not reuse the connection.
        debug!(
            connection = %conn.id(),
            "Response completed after timeout claimed the request; evicting"
        );
        conn.evict().await;
        return;
    }

    if conn.is_reusable() {
        conn.release().await;
    } else {
        debug!(connection = %conn.id(), "Connection not reusable after exchange; evicting");
        conn.evict().await;
    }
}

/// Terminal failure path: disarm, claim-fail, always evict
///
/// A connection that failed or timed out is in an unknown framing state
/// and must never rejoin the idle set.
async fn finish_failure(mut conn: PooledConnection, slot: &CompletionSlot, err: ClientError) {
    conn.timeout_guard().disable();
    conn.take_completion();

    match err.log_level() {
        tracing::Level::ERROR => error!(connection = %conn.id(), error = %err, "Request failed"),
        tracing::Level::DEBUG => debug!(connection = %conn.id(), error = %err, "Request failed"),
        _ => warn!(connection = %conn.id(), error = %err, "Request failed"),
    }

    if !slot.fail(err) {
        debug!(connection = %conn.id(), "Failure path lost the resolution race");
    }
    conn.evict().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::DestinationPool;
    use crate::transport::mock::{Script, ScriptedTransport, ok_events};
    use crate::types::{Destination, MaxConnections, Port};
    use bytes::Bytes;

    fn dest() -> Destination {
        Destination::new("asm.example.com", Port::HTTP).unwrap()
    }

    fn pool_over(transport: ScriptedTransport, max: usize) -> Arc<DestinationPool> {
        DestinationPool::new(
            dest(),
            Arc::new(transport),
            MaxConnections::new(max).unwrap(),
        )
    }

    async fn exchange(
        pool: &Arc<DestinationPool>,
        timeout: Duration,
    ) -> crate::completion::RequestResult {
        let conn = pool.acquire().await.unwrap();
        let (slot, handle) = CompletionSlot::channel();
        tokio::spawn(run_exchange(conn, slot, b"GET / HTTP/1.1\r\n\r\n".to_vec(), timeout));
        handle.await
    }

    #[tokio::test]
    async fn test_successful_exchange_resolves_and_releases() {
        let pool = pool_over(ScriptedTransport::always_ok(b"hello"), 2);

        let response = exchange(&pool, Duration::ZERO).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.body(), b"hello");

        // Released, not evicted
        assert_eq!(pool.status().available.get(), 1);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_body_fragments_reassembled_in_order() {
        let transport = ScriptedTransport::new(vec![Script::Events(vec![
            Event::StatusReceived(200),
            Event::BodyFragment(Bytes::from_static(b"ab")),
            Event::BodyFragment(Bytes::from_static(b"cd")),
            Event::BodyFragment(Bytes::from_static(b"ef")),
            Event::MessageComplete,
        ])]);
        let pool = pool_over(transport, 1);

        let response = exchange(&pool, Duration::ZERO).await.unwrap();
        assert_eq!(response.body(), b"abcdef");
    }

    #[tokio::test]
    async fn test_empty_body_success() {
        let transport = ScriptedTransport::new(vec![Script::Events(vec![
            Event::StatusReceived(204),
            Event::MessageComplete,
        ])]);
        let pool = pool_over(transport, 1);

        let response = exchange(&pool, Duration::ZERO).await.unwrap();
        assert_eq!(response.status(), 204);
        assert!(response.body().is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_fails_and_evicts() {
        let transport = ScriptedTransport::new(vec![Script::Events(vec![
            Event::StatusReceived(200),
            Event::TransportError("connection reset".to_string()),
        ])]);
        let pool = pool_over(transport, 1);

        let conn = pool.acquire().await.unwrap();
        let id = conn.id();
        let (slot, handle) = CompletionSlot::channel();
        tokio::spawn(run_exchange(
            conn,
            slot,
            b"GET / HTTP/1.1\r\n\r\n".to_vec(),
            Duration::ZERO,
        ));
        let err = handle.await.unwrap_err();
        assert!(matches!(err, ClientError::Transport { .. }));

        // The failed connection must never rejoin the idle set
        assert!(!pool.is_idle(id));
        assert_eq!(pool.status().available.get(), 0);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_write_failure_takes_transport_error_path() {
        let transport = ScriptedTransport::new(vec![Script::FailSend]);
        let pool = pool_over(transport, 1);

        let err = exchange(&pool, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, ClientError::Transport { .. }));
        assert_eq!(pool.status().available.get(), 0);
    }

    #[tokio::test]
    async fn test_body_before_status_is_protocol_violation() {
        let transport = ScriptedTransport::new(vec![Script::Events(vec![
            Event::BodyFragment(Bytes::from_static(b"rogue")),
        ])]);
        let pool = pool_over(transport, 1);

        let err = exchange(&pool, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, ClientError::Protocol { .. }));
        assert_eq!(pool.status().available.get(), 0);
    }

    #[tokio::test]
    async fn test_double_status_is_protocol_violation() {
        let transport = ScriptedTransport::new(vec![Script::Events(vec![
            Event::StatusReceived(200),
            Event::StatusReceived(200),
        ])]);
        let pool = pool_over(transport, 1);

        let err = exchange(&pool, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, ClientError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_complete_before_status_is_protocol_violation() {
        let transport =
            ScriptedTransport::new(vec![Script::Events(vec![Event::MessageComplete])]);
        let pool = pool_over(transport, 1);

        let err = exchange(&pool, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, ClientError::Protocol { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_connection_times_out_and_evicts() {
        let transport = ScriptedTransport::new(vec![Script::Stall]);
        let pool = pool_over(transport, 1);

        let start = tokio::time::Instant::now();
        let err = exchange(&pool, Duration::from_millis(100)).await.unwrap_err();
        let elapsed = start.elapsed();

        assert!(err.is_timeout());
        assert!(
            elapsed >= Duration::from_millis(100) && elapsed <= Duration::from_millis(150),
            "timeout resolved at {:?}",
            elapsed
        );

        // Timed-out connection must never rejoin the idle set
        assert_eq!(pool.status().available.get(), 0);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_disables_guard() {
        let transport = ScriptedTransport::new(vec![Script::DelayedEvents(
            Duration::from_secs(3600),
            ok_events(b"slow"),
        )]);
        let pool = pool_over(transport, 1);

        // With the timeout disabled the exchange waits out a very slow peer
        let response = exchange(&pool, Duration::ZERO).await.unwrap();
        assert_eq!(response.body(), b"slow");
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_racing_timeout_resolves_exactly_once() {
        // Terminal event lands exactly when the timeout fires
        let transport = ScriptedTransport::new(vec![Script::DelayedEvents(
            Duration::from_millis(100),
            ok_events(b"photo-finish"),
        )]);
        let pool = pool_over(transport, 1);

        let result = exchange(&pool, Duration::from_millis(100)).await;

        // Either side may win, but exactly one outcome is observed and the
        // pool bookkeeping balances.
        match result {
            Ok(response) => assert_eq!(response.status(), 200),
            Err(err) => assert!(err.is_timeout()),
        }
        assert_eq!(pool.in_flight(), 0);
        assert!(pool.status().available.get() <= 1);
    }

    #[tokio::test]
    async fn test_successful_exchange_reuses_connection_identity() {
        let pool = pool_over(ScriptedTransport::always_ok(b"ok"), 1);

        let conn = pool.acquire().await.unwrap();
        let first_id = conn.id();
        let (slot, handle) = CompletionSlot::channel();
        tokio::spawn(run_exchange(
            conn,
            slot,
            b"GET / HTTP/1.1\r\n\r\n".to_vec(),
            Duration::ZERO,
        ));
        handle.await.unwrap();

        assert!(pool.is_idle(first_id));
        let again = pool.acquire().await.unwrap();
        assert_eq!(again.id(), first_id);
        again.release().await;
    }
}
