//! Response sink capability
//!
//! The abstract "place to write an HTTP response": a live header set,
//! a status line, and a body byte stream. The broadcaster implements
//! this trait itself so the downstream handler never needs to know
//! whether it is writing to one connection or to many.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

use super::headers::Headers;

/// Abstract response writer capability
///
/// Methods take `&self`: a sink is shared between the handler task and
/// the broadcaster, so implementations use interior mutability.
pub trait ResponseSink: Send + Sync {
    /// Live, mutable header set of this sink
    fn headers(&self) -> Headers;

    /// Write a status code (1xx codes may be written repeatedly before
    /// the final code)
    fn write_status(&self, code: u16);

    /// Write body bytes, returning how many were accepted
    fn write(&self, buf: &[u8]) -> io::Result<usize>;
}

/// Shared handle to a response sink
pub type SinkHandle = Arc<dyn ResponseSink>;

/// In-memory sink that records everything written to it
///
/// Useful for tests and for embedders that buffer a response before
/// flushing it to a transport.
#[derive(Debug, Default)]
pub struct BufferSink {
    headers: Headers,
    recorded: Mutex<Recorded>,
}

#[derive(Debug, Default)]
struct Recorded {
    statuses: Vec<u16>,
    body: Vec<u8>,
}

impl BufferSink {
    /// Create an empty buffer sink
    pub fn new() -> Self {
        Self::default()
    }

    fn recorded(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every status code written, in order (1xx included)
    pub fn statuses(&self) -> Vec<u16> {
        self.recorded().statuses.clone()
    }

    /// The final (non-informational) status code, if one was written
    pub fn final_status(&self) -> Option<u16> {
        self.recorded()
            .statuses
            .iter()
            .copied()
            .find(|&code| code >= 200)
    }

    /// Accumulated body bytes
    pub fn body(&self) -> Bytes {
        Bytes::from(self.recorded().body.clone())
    }
}

impl ResponseSink for BufferSink {
    fn headers(&self) -> Headers {
        self.headers.clone()
    }

    fn write_status(&self, code: u16) {
        self.recorded().statuses.push(code);
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.recorded().body.extend_from_slice(buf);
        Ok(buf.len())
    }
}
