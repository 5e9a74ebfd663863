//! The logical HTTP response delivered to callers
//!
//! A response is assembled incrementally from the inbound event stream:
//! the status line creates it, body fragments append to it in arrival
//! order, and it becomes immutable once its completion handle resolves.

use bytes::{Bytes, BytesMut};
use std::fmt;

/// An assembled HTTP response: status code plus accumulated body
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    body: Bytes,
}

impl Response {
    /// HTTP status code
    #[must_use]
    #[inline]
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// Response body bytes
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Response body decoded as UTF-8 (lossy)
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Check for a 2xx status
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP {} ({} body bytes)", self.status, self.body.len())
    }
}

/// In-progress response accumulator used by the assembler
///
/// Created when the status event arrives; body fragments are appended in
/// arrival order with no reordering or deduplication.
#[derive(Debug)]
pub(crate) struct ResponseBuilder {
    status: u16,
    body: BytesMut,
}

impl ResponseBuilder {
    pub(crate) fn new(status: u16) -> Self {
        Self {
            status,
            body: BytesMut::new(),
        }
    }

    pub(crate) fn append_fragment(&mut self, fragment: &[u8]) {
        self.body.extend_from_slice(fragment);
    }

    pub(crate) fn finish(self) -> Response {
        Response {
            status: self.status,
            body: self.body.freeze(),
        }
    }
}
