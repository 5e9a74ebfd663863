//! HTTP/1.1 wire format: request serialization and incremental response
//! decoding
//!
//! The decoder turns raw inbound bytes into the staged event stream the
//! assembler consumes: one status event, zero or more body fragments, then
//! message-complete. It understands `Content-Length` and chunked bodies;
//! responses with neither are read to EOF and mark the connection
//! non-reusable.

use bytes::{Bytes, BytesMut};
use url::Url;
use url::form_urlencoded;

/// Maximum number of response headers we parse
const MAX_HEADERS: usize = 64;

/// HTTP request methods supported by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// A logical HTTP request, ready to be serialized to wire bytes
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    /// Path plus query string
    target: String,
    host: String,
    body: Option<Vec<u8>>,
    content_type: Option<&'static str>,
}

impl Request {
    /// Build a GET request from a URL and additional query parameters
    ///
    /// Parameters are appended to any query string already present on the
    /// URL, percent-encoded.
    #[must_use]
    pub fn get(url: &Url, params: &[(&str, &str)]) -> Self {
        let mut target = url.path().to_string();
        let mut query = form_urlencoded::Serializer::new(String::new());
        if let Some(existing) = url.query() {
            query.extend_pairs(form_urlencoded::parse(existing.as_bytes()));
        }
        for (key, value) in params {
            query.append_pair(key, value);
        }
        let query = query.finish();
        if !query.is_empty() {
            target.push('?');
            target.push_str(&query);
        }

        Self {
            method: Method::Get,
            target,
            host: host_header(url),
            body: None,
            content_type: None,
        }
    }

    /// Build a POST request with a form-urlencoded body
    #[must_use]
    pub fn post_form(url: &Url, form: &[(&str, &str)]) -> Self {
        let mut body = form_urlencoded::Serializer::new(String::new());
        for (key, value) in form {
            body.append_pair(key, value);
        }

        Self {
            method: Method::Post,
            target: url.path().to_string(),
            host: host_header(url),
            body: Some(body.finish().into_bytes()),
            content_type: Some("application/x-www-form-urlencoded"),
        }
    }

    /// Request method
    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Serialize to HTTP/1.1 wire bytes
    ///
    /// Connection defaults to keep-alive so the transport connection can be
    /// returned to its pool after the exchange.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut wire = Vec::with_capacity(256);
        wire.extend_from_slice(self.method.as_str().as_bytes());
        wire.push(b' ');
        wire.extend_from_slice(self.target.as_bytes());
        wire.extend_from_slice(b" HTTP/1.1\r\n");
        wire.extend_from_slice(b"host: ");
        wire.extend_from_slice(self.host.as_bytes());
        wire.extend_from_slice(b"\r\n");

        if let Some(content_type) = self.content_type {
            wire.extend_from_slice(b"content-type: ");
            wire.extend_from_slice(content_type.as_bytes());
            wire.extend_from_slice(b"\r\n");
        }
        if let Some(body) = &self.body {
            wire.extend_from_slice(b"content-length: ");
            wire.extend_from_slice(body.len().to_string().as_bytes());
            wire.extend_from_slice(b"\r\n");
        }

        wire.extend_from_slice(b"\r\n");

        if let Some(body) = &self.body {
            wire.extend_from_slice(body);
        }
        wire
    }
}

/// Host header value: host plus the port when it is not the scheme default
fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// One staged event decoded from the inbound byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    /// Status line and headers arrived
    Status(u16),
    /// One body fragment arrived
    BodyFragment(Bytes),
    /// The message is complete
    MessageComplete,
}

/// Errors from malformed inbound data
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed response head: {0}")]
    MalformedHead(String),
    #[error("malformed chunked encoding: {0}")]
    MalformedChunk(String),
    #[error("connection closed mid-response")]
    TruncatedResponse,
}

#[derive(Debug)]
enum DecodeState {
    /// Accumulating the status line and headers
    Head,
    /// Reading a Content-Length delimited body
    FixedBody { remaining: usize },
    /// Reading a chunked body
    Chunked(ChunkState),
    /// Reading until EOF (no framing headers)
    ToEof,
    /// Between responses
    Idle,
}

#[derive(Debug)]
enum ChunkState {
    /// Expecting a chunk-size line
    SizeLine,
    /// Reading chunk data
    Data { remaining: usize },
    /// Expecting the CRLF that terminates a chunk's data
    DataCrlf,
    /// Expecting trailers, terminated by an empty line
    Trailers,
}

/// Incremental HTTP/1.1 response decoder
///
/// Feed it raw bytes as they arrive; it emits [`DecodedEvent`]s in protocol
/// order. After `MessageComplete` it resets itself for the next exchange on
/// the same connection.
#[derive(Debug)]
pub struct ResponseDecoder {
    state: DecodeState,
    buf: BytesMut,
    /// Cleared when the response forbids reuse (close-delimited body or an
    /// explicit `Connection: close`)
    reusable: bool,
}

impl Default for ResponseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseDecoder {
    /// Create a decoder expecting a fresh response
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: DecodeState::Idle,
            buf: BytesMut::new(),
            reusable: true,
        }
    }

    /// Whether the connection can serve another request after the current
    /// message completes
    #[must_use]
    pub const fn is_reusable(&self) -> bool {
        self.reusable
    }

    /// Feed inbound bytes, appending decoded events to `out`
    ///
    /// # Errors
    /// Returns an error when the peer sends data that cannot be parsed;
    /// the connection must then be discarded.
    pub fn feed(&mut self, data: &[u8], out: &mut Vec<DecodedEvent>) -> Result<(), DecodeError> {
        self.buf.extend_from_slice(data);
        self.advance(out)
    }

    /// Signal end of stream
    ///
    /// Completes a close-delimited body; anywhere else mid-response it is a
    /// truncation error. EOF between responses is fine (the peer closed an
    /// idle connection).
    pub fn finish(&mut self, out: &mut Vec<DecodedEvent>) -> Result<(), DecodeError> {
        match self.state {
            DecodeState::ToEof => {
                self.state = DecodeState::Idle;
                out.push(DecodedEvent::MessageComplete);
                Ok(())
            }
            DecodeState::Idle => {
                self.reusable = false;
                Ok(())
            }
            _ => Err(DecodeError::TruncatedResponse),
        }
    }

    fn advance(&mut self, out: &mut Vec<DecodedEvent>) -> Result<(), DecodeError> {
        loop {
            match &mut self.state {
                DecodeState::Idle => {
                    if self.buf.is_empty() {
                        return Ok(());
                    }
                    self.state = DecodeState::Head;
                }
                DecodeState::Head => {
                    if !self.try_parse_head(out)? {
                        return Ok(());
                    }
                }
                DecodeState::FixedBody { remaining } => {
                    if self.buf.is_empty() {
                        return Ok(());
                    }
                    let take = (*remaining).min(self.buf.len());
                    let fragment = self.buf.split_to(take).freeze();
                    *remaining -= take;
                    let done = *remaining == 0;
                    out.push(DecodedEvent::BodyFragment(fragment));
                    if done {
                        self.state = DecodeState::Idle;
                        out.push(DecodedEvent::MessageComplete);
                    }
                }
                DecodeState::ToEof => {
                    if self.buf.is_empty() {
                        return Ok(());
                    }
                    let fragment = self.buf.split().freeze();
                    out.push(DecodedEvent::BodyFragment(fragment));
                }
                DecodeState::Chunked(_) => {
                    if !self.advance_chunked(out)? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Try to parse the response head from the accumulated buffer
    ///
    /// Returns `false` when more data is needed.
    fn try_parse_head(&mut self, out: &mut Vec<DecodedEvent>) -> Result<bool, DecodeError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Response::new(&mut headers);

        let head_len = match parsed.parse(&self.buf) {
            Ok(httparse::Status::Complete(n)) => n,
            Ok(httparse::Status::Partial) => return Ok(false),
            Err(e) => return Err(DecodeError::MalformedHead(e.to_string())),
        };

        let status = parsed
            .code
            .ok_or_else(|| DecodeError::MalformedHead("missing status code".to_string()))?;

        let mut content_length: Option<usize> = None;
        let mut chunked = false;
        for header in parsed.headers.iter() {
            if header.name.eq_ignore_ascii_case("content-length") {
                let text = std::str::from_utf8(header.value)
                    .map_err(|_| DecodeError::MalformedHead("bad content-length".to_string()))?;
                content_length = Some(text.trim().parse().map_err(|_| {
                    DecodeError::MalformedHead("bad content-length".to_string())
                })?);
            } else if header.name.eq_ignore_ascii_case("transfer-encoding") {
                chunked = std::str::from_utf8(header.value)
                    .unwrap_or_default()
                    .to_ascii_lowercase()
                    .contains("chunked");
            } else if header.name.eq_ignore_ascii_case("connection")
                && std::str::from_utf8(header.value)
                    .unwrap_or_default()
                    .eq_ignore_ascii_case("close")
            {
                self.reusable = false;
            }
        }

        let _ = self.buf.split_to(head_len);
        out.push(DecodedEvent::Status(status));

        // 1xx/204/304 never carry a body regardless of headers
        let bodyless = status < 200 || status == 204 || status == 304;
        self.state = if bodyless || content_length == Some(0) {
            out.push(DecodedEvent::MessageComplete);
            DecodeState::Idle
        } else if chunked {
            DecodeState::Chunked(ChunkState::SizeLine)
        } else if let Some(length) = content_length {
            DecodeState::FixedBody { remaining: length }
        } else {
            // No framing: body runs to connection close
            self.reusable = false;
            DecodeState::ToEof
        };
        Ok(true)
    }

    /// Advance the chunked-body state machine
    ///
    /// Returns `false` when more data is needed.
    fn advance_chunked(&mut self, out: &mut Vec<DecodedEvent>) -> Result<bool, DecodeError> {
        let DecodeState::Chunked(chunk_state) = &mut self.state else {
            unreachable!("advance_chunked outside chunked state");
        };

        match chunk_state {
            ChunkState::SizeLine => {
                let Some(line_end) = find_crlf(&self.buf) else {
                    return Ok(false);
                };
                let line = self.buf.split_to(line_end + 2);
                let size_text = std::str::from_utf8(&line[..line_end])
                    .map_err(|_| DecodeError::MalformedChunk("non-ASCII size line".to_string()))?;
                // Chunk extensions after ';' are ignored
                let size_text = size_text.split(';').next().unwrap_or("").trim();
                let size = usize::from_str_radix(size_text, 16).map_err(|_| {
                    DecodeError::MalformedChunk(format!("bad chunk size {:?}", size_text))
                })?;

                *chunk_state = if size == 0 {
                    ChunkState::Trailers
                } else {
                    ChunkState::Data { remaining: size }
                };
                Ok(true)
            }
            ChunkState::Data { remaining } => {
                if self.buf.is_empty() {
                    return Ok(false);
                }
                let take = (*remaining).min(self.buf.len());
                let fragment = self.buf.split_to(take).freeze();
                *remaining -= take;
                if *remaining == 0 {
                    *chunk_state = ChunkState::DataCrlf;
                }
                out.push(DecodedEvent::BodyFragment(fragment));
                Ok(true)
            }
            ChunkState::DataCrlf => {
                if self.buf.len() < 2 {
                    return Ok(false);
                }
                let crlf = self.buf.split_to(2);
                if &crlf[..] != b"\r\n" {
                    return Err(DecodeError::MalformedChunk(
                        "missing CRLF after chunk data".to_string(),
                    ));
                }
                *chunk_state = ChunkState::SizeLine;
                Ok(true)
            }
            ChunkState::Trailers => {
                let Some(line_end) = find_crlf(&self.buf) else {
                    return Ok(false);
                };
                let line = self.buf.split_to(line_end + 2);
                if line_end == 0 {
                    // Empty line ends the trailers and the message
                    self.state = DecodeState::Idle;
                    out.push(DecodedEvent::MessageComplete);
                } else {
                    tracing::debug!(trailer = ?&line[..line_end], "Ignoring chunked trailer");
                }
                Ok(true)
            }
        }
    }
}

/// Find the first CRLF in `data`, returning the index of the `\r`
fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|window| window == b"\r\n")
}
