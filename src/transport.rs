//! Transport abstraction and the TCP implementation
//!
//! The pool and assembler only see the [`Transport`] and [`Connection`]
//! traits, which makes them easy to exercise with scripted test doubles
//! (see [`mock`]) without real network connections.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::codec::{DecodedEvent, ResponseDecoder};
use crate::types::Destination;

/// Read buffer size for inbound data
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// One staged inbound event for a connection
///
/// For a single connection, events arrive strictly in protocol order:
/// status, then body fragments, then message-complete. A transport error is
/// terminal for the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Status line and headers arrived
    StatusReceived(u16),
    /// One body fragment arrived
    BodyFragment(Bytes),
    /// The current message is complete
    MessageComplete,
    /// The transport failed; the connection is unusable
    TransportError(String),
}

/// Factory for transport connections to arbitrary destinations
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish a new connection to the destination
    async fn connect(&self, destination: &Destination)
        -> std::io::Result<Box<dyn Connection>>;
}

/// One transport connection
///
/// Exclusively owned by at most one in-flight request at a time; the pool's
/// checkout discipline enforces this. Inbound events are delivered strictly
/// sequentially through [`Connection::next_event`].
#[async_trait]
pub trait Connection: Send {
    /// Transmit raw request bytes
    async fn send(&mut self, payload: &[u8]) -> std::io::Result<()>;

    /// Wait for the next inbound event
    async fn next_event(&mut self) -> Event;

    /// Whether the connection can serve another request
    ///
    /// Consulted after a successful exchange; a `false` answer means the
    /// connection must be evicted even though the request succeeded.
    fn is_reusable(&self) -> bool;

    /// Close the underlying transport
    async fn close(&mut self);
}

/// Plain TCP transport with the built-in HTTP/1.1 codec
#[derive(Debug, Default, Clone)]
pub struct TcpTransport;

impl TcpTransport {
    /// Create a new TCP transport
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(
        &self,
        destination: &Destination,
    ) -> std::io::Result<Box<dyn Connection>> {
        let addr = format!("{}:{}", destination.host(), destination.port());
        let stream = TcpStream::connect(&addr).await?;
        stream.set_nodelay(true)?;
        debug!(destination = %destination, "Established TCP connection");

        Ok(Box::new(TcpConnection {
            stream,
            decoder: ResponseDecoder::new(),
            pending: VecDeque::new(),
            eof: false,
        }))
    }
}

/// A TCP connection that decodes inbound bytes into [`Event`]s
struct TcpConnection {
    stream: TcpStream,
    decoder: ResponseDecoder,
    pending: VecDeque<Event>,
    eof: bool,
}

impl TcpConnection {
    fn queue_decoded(&mut self, events: Vec<DecodedEvent>) {
        for event in events {
            self.pending.push_back(match event {
                DecodedEvent::Status(code) => Event::StatusReceived(code),
                DecodedEvent::BodyFragment(bytes) => Event::BodyFragment(bytes),
                DecodedEvent::MessageComplete => Event::MessageComplete,
            });
        }
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn send(&mut self, payload: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(payload).await?;
        self.stream.flush().await
    }

    async fn next_event(&mut self) -> Event {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return event;
            }
            if self.eof {
                return Event::TransportError("connection closed".to_string());
            }

            let mut buffer = [0u8; READ_BUFFER_SIZE];
            match self.stream.read(&mut buffer).await {
                Ok(0) => {
                    self.eof = true;
                    let mut decoded = Vec::new();
                    match self.decoder.finish(&mut decoded) {
                        Ok(()) => self.queue_decoded(decoded),
                        Err(e) => return Event::TransportError(e.to_string()),
                    }
                }
                Ok(n) => {
                    trace!(bytes = n, "Read inbound data");
                    let mut decoded = Vec::new();
                    match self.decoder.feed(&buffer[..n], &mut decoded) {
                        Ok(()) => self.queue_decoded(decoded),
                        Err(e) => return Event::TransportError(e.to_string()),
                    }
                }
                Err(e) => return Event::TransportError(e.to_string()),
            }
        }
    }

    fn is_reusable(&self) -> bool {
        !self.eof && self.decoder.is_reusable()
    }

    async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

/// Scripted transport doubles for tests
///
/// [`mock::ScriptedTransport`] hands out connections that replay a fixed
/// event script, letting tests drive the pool, assembler and timeout paths
/// deterministically without sockets.
pub mod mock {
    use super::{Connection, Event, Transport};
    use crate::types::Destination;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// A scripted reply for one request on a mock connection
    #[derive(Debug, Clone)]
    pub enum Script {
        /// Deliver these events in order, then (if the script says so)
        /// stay reusable for the next request
        Events(Vec<Event>),
        /// Never deliver a terminal event (for timeout tests)
        Stall,
        /// Delay, then deliver the events
        DelayedEvents(Duration, Vec<Event>),
        /// Fail the write itself
        FailSend,
    }

    /// Transport that hands out [`ScriptedConnection`]s
    ///
    /// Every connection created replays the same script list, one script
    /// entry per request. Connection counts are tracked for reuse
    /// assertions.
    pub struct ScriptedTransport {
        scripts: Vec<Script>,
        refuse: bool,
        connects: Arc<AtomicUsize>,
        live: Arc<AtomicUsize>,
    }

    impl ScriptedTransport {
        /// Create a transport whose connections replay `scripts`
        #[must_use]
        pub fn new(scripts: Vec<Script>) -> Self {
            Self {
                scripts,
                refuse: false,
                connects: Arc::new(AtomicUsize::new(0)),
                live: Arc::new(AtomicUsize::new(0)),
            }
        }

        /// Shortcut: every request gets a complete 200 response with `body`
        #[must_use]
        pub fn always_ok(body: &[u8]) -> Self {
            Self::new(vec![Script::Events(ok_events(body))])
        }

        /// Transport on which every connect attempt fails
        #[must_use]
        pub fn refuse_connections() -> Self {
            let mut transport = Self::new(Vec::new());
            transport.refuse = true;
            transport
        }

        /// Total connections ever created
        #[must_use]
        pub fn connect_count(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        /// Connections currently not closed
        #[must_use]
        pub fn live_count(&self) -> usize {
            self.live.load(Ordering::SeqCst)
        }
    }

    /// Events for a complete 200 exchange with the given body
    #[must_use]
    pub fn ok_events(body: &[u8]) -> Vec<Event> {
        vec![
            Event::StatusReceived(200),
            Event::BodyFragment(bytes::Bytes::copy_from_slice(body)),
            Event::MessageComplete,
        ]
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn connect(
            &self,
            _destination: &Destination,
        ) -> std::io::Result<Box<dyn Connection>> {
            if self.refuse {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "scripted connect refusal",
                ));
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedConnection {
                scripts: self.scripts.clone(),
                request_index: 0,
                queued: Vec::new(),
                live: self.live.clone(),
                closed: false,
            }))
        }
    }

    /// Connection that replays scripted events, one script per request
    pub struct ScriptedConnection {
        scripts: Vec<Script>,
        request_index: usize,
        queued: Vec<Event>,
        live: Arc<AtomicUsize>,
        closed: bool,
    }

    #[async_trait]
    impl Connection for ScriptedConnection {
        async fn send(&mut self, _payload: &[u8]) -> std::io::Result<()> {
            // Past the end of the script list, the last entry repeats
            let index = self.request_index.min(self.scripts.len().saturating_sub(1));
            let script = self
                .scripts
                .get(index)
                .cloned()
                .unwrap_or(Script::Stall);
            self.request_index += 1;

            match script {
                Script::FailSend => Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "scripted write failure",
                )),
                Script::Events(events) => {
                    self.queued = events;
                    Ok(())
                }
                Script::DelayedEvents(delay, events) => {
                    tokio::time::sleep(delay).await;
                    self.queued = events;
                    Ok(())
                }
                Script::Stall => {
                    self.queued = Vec::new();
                    Ok(())
                }
            }
        }

        async fn next_event(&mut self) -> Event {
            if self.queued.is_empty() {
                // Stalled: never produce a terminal event
                std::future::pending::<()>().await;
                unreachable!();
            }
            self.queued.remove(0)
        }

        fn is_reusable(&self) -> bool {
            !self.closed
        }

        async fn close(&mut self) {
            if !self.closed {
                self.closed = true;
                self.live.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{Script, ScriptedTransport, ok_events};
    use super::*;
    use crate::types::Port;

    fn dest() -> Destination {
        Destination::new("mock.example.com", Port::HTTP).unwrap()
    }

    #[tokio::test]
    async fn test_scripted_connection_replays_events() {
        let transport = ScriptedTransport::always_ok(b"hello");
        let mut conn = transport.connect(&dest()).await.unwrap();
        conn.send(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

        assert_eq!(conn.next_event().await, Event::StatusReceived(200));
        assert_eq!(
            conn.next_event().await,
            Event::BodyFragment(Bytes::from_static(b"hello"))
        );
        assert_eq!(conn.next_event().await, Event::MessageComplete);
    }

    #[tokio::test]
    async fn test_scripted_transport_counts_connects() {
        let transport = ScriptedTransport::always_ok(b"x");
        assert_eq!(transport.connect_count(), 0);

        let mut a = transport.connect(&dest()).await.unwrap();
        let _b = transport.connect(&dest()).await.unwrap();
        assert_eq!(transport.connect_count(), 2);
        assert_eq!(transport.live_count(), 2);

        a.close().await;
        assert_eq!(transport.live_count(), 1);
        // Double close is a no-op
        a.close().await;
        assert_eq!(transport.live_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_send_failure() {
        let transport = ScriptedTransport::new(vec![Script::FailSend]);
        let mut conn = transport.connect(&dest()).await.unwrap();
        let err = conn.send(b"GET / HTTP/1.1\r\n\r\n").await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_scripted_multiple_requests_consume_scripts_in_order() {
        let transport = ScriptedTransport::new(vec![
            Script::Events(ok_events(b"first")),
            Script::Events(vec![
                Event::StatusReceived(404),
                Event::MessageComplete,
            ]),
        ]);
        let mut conn = transport.connect(&dest()).await.unwrap();

        conn.send(b"req1").await.unwrap();
        assert_eq!(conn.next_event().await, Event::StatusReceived(200));

        // Drain the rest of request one
        let _ = conn.next_event().await;
        let _ = conn.next_event().await;

        conn.send(b"req2").await.unwrap();
        assert_eq!(conn.next_event().await, Event::StatusReceived(404));
    }
}
