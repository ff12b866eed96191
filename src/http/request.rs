//! Abstract inbound request
//!
//! A library-level view of an HTTP request: method, URL pieces, header
//! set, and a body that can be made re-readable. The key pipeline
//! consumes the body once for fingerprinting and buffers it so the
//! same bytes remain available to the downstream handler.

use std::fmt;
use std::io::{self, Read};

use bytes::Bytes;

use super::headers::{HeaderSnapshot, Headers};

/// URL pieces consumed by the key derivers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestUrl {
    /// Scheme, e.g. "http"
    pub scheme: String,
    /// Host name
    pub host: String,
    /// Explicit port, if any
    pub port: Option<u16>,
    /// Escaped path
    pub path: String,
    /// Raw query string, if any
    pub query: Option<String>,
}

impl RequestUrl {
    /// Create a URL from its required pieces
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            port: None,
            path: path.into(),
            query: None,
        }
    }

    /// Set the port
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the query string
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }
}

impl fmt::Display for RequestUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        write!(f, "{}", self.path)?;
        if let Some(ref query) = self.query {
            write!(f, "?{}", query)?;
        }
        Ok(())
    }
}

/// Request body
///
/// A `Stream` body can be read once; `read_all` buffers it in place so
/// every later read sees the same bytes.
pub enum Body {
    /// Fully buffered, rewindable body
    Buffered(Bytes),
    /// Unread byte stream, consumable once
    Stream(Box<dyn Read + Send>),
}

impl Body {
    /// Empty body
    pub fn empty() -> Self {
        Body::Buffered(Bytes::new())
    }

    /// Buffered body from bytes
    pub fn buffered(bytes: impl Into<Bytes>) -> Self {
        Body::Buffered(bytes.into())
    }

    /// Streaming body from a reader
    pub fn stream(reader: impl Read + Send + 'static) -> Self {
        Body::Stream(Box::new(reader))
    }

    /// Read the whole body, buffering a stream in place
    ///
    /// After this returns the body is `Buffered` and can be read any
    /// number of times.
    pub fn read_all(&mut self) -> io::Result<Bytes> {
        match self {
            Body::Buffered(bytes) => Ok(bytes.clone()),
            Body::Stream(reader) => {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf)?;
                let bytes = Bytes::from(buf);
                *self = Body::Buffered(bytes.clone());
                Ok(bytes)
            }
        }
    }

    /// Buffered bytes, if already buffered
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Body::Buffered(bytes) => Some(bytes),
            Body::Stream(_) => None,
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Buffered(bytes) => write!(f, "Body::Buffered({} bytes)", bytes.len()),
            Body::Stream(_) => write!(f, "Body::Stream(..)"),
        }
    }
}

/// Abstract inbound request
#[derive(Debug)]
pub struct Request {
    /// Request method, e.g. "GET"
    pub method: String,
    /// URL pieces
    pub url: RequestUrl,
    /// Request headers
    pub headers: Headers,
    /// Request body
    pub body: Body,
}

impl Request {
    /// Create a request with an empty body
    pub fn new(method: impl Into<String>, url: RequestUrl) -> Self {
        Self {
            method: method.into(),
            url,
            headers: Headers::new(),
            body: Body::empty(),
        }
    }

    /// Set the body
    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Add a header
    pub fn with_header(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(key, value);
        self
    }

    /// Capture the request's headers and body bytes, leaving the body
    /// buffered and re-readable
    pub fn capture(&mut self) -> io::Result<RequestCopy> {
        Ok(RequestCopy {
            headers: self.headers.snapshot(),
            body: self.body.read_all()?,
        })
    }
}

/// Snapshot of a request taken by [`Request::capture`]
#[derive(Debug, Clone)]
pub struct RequestCopy {
    /// Header state at capture time
    pub headers: HeaderSnapshot,
    /// Full body bytes
    pub body: Bytes,
}
