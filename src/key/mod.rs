//! Fingerprint key derivation
//!
//! A [`KeyPolicy`] composes three independently pluggable sub-derivers
//! (URL, headers, body, concatenated in that order) into one request
//! fingerprint. Requests with equal fingerprints that are concurrently
//! in flight are collapsed by the pool.
//!
//! The body sub-deriver consumes the request body; the pipeline buffers
//! it first so the same bytes remain readable downstream on both the
//! driver and the rider path.

use std::fmt;
use std::io::{self, Read};

use sha2::{Digest, Sha256};

use crate::http::{Headers, Request, RequestUrl};

/// Error produced while deriving a fingerprint
///
/// The middleware treats any variant the same way: fail open and handle
/// the request without deduplication.
#[derive(Debug)]
pub enum KeyError {
    /// Reading the request body failed
    Io(io::Error),
    /// The body exceeds the configured buffering limit
    BodyTooLarge {
        /// Configured limit in bytes
        limit: usize,
    },
    /// A custom sub-deriver failed
    Deriver(String),
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyError::Io(err) => write!(f, "failed to read request body: {}", err),
            KeyError::BodyTooLarge { limit } => {
                write!(f, "request body exceeds key buffering limit of {} bytes", limit)
            }
            KeyError::Deriver(msg) => write!(f, "key deriver failed: {}", msg),
        }
    }
}

impl std::error::Error for KeyError {}

impl From<io::Error> for KeyError {
    fn from(err: io::Error) -> Self {
        KeyError::Io(err)
    }
}

type UrlDeriver = Box<dyn Fn(&RequestUrl) -> Result<String, KeyError> + Send + Sync>;
type HeaderDeriver = Box<dyn Fn(&Headers) -> Result<String, KeyError> + Send + Sync>;
type BodyDeriver = Box<dyn Fn(&mut dyn Read) -> Result<String, KeyError> + Send + Sync>;

/// Composable fingerprint policy
///
/// Absent sub-derivers contribute the empty string. The policy is an
/// explicit value threaded into the middleware; there is no process-wide
/// default.
pub struct KeyPolicy {
    url: Option<UrlDeriver>,
    header: Option<HeaderDeriver>,
    body: Option<BodyDeriver>,
    max_body: usize,
}

/// Default cap on how much body the pipeline buffers for fingerprinting
pub const DEFAULT_MAX_KEY_BODY: usize = 4 * 1024 * 1024;

impl KeyPolicy {
    /// Policy with no sub-derivers (every request maps to the empty key)
    pub fn none() -> Self {
        Self {
            url: None,
            header: None,
            body: None,
            max_body: DEFAULT_MAX_KEY_BODY,
        }
    }

    /// Default policy: scheme+host+port+path URL key, no header
    /// contribution, exact-byte-match body key
    pub fn exact() -> Self {
        Self::none().url(short_url_key).body(exact_body_key)
    }

    /// Lower-memory variant: same URL key, SHA-256 digest of the body
    pub fn digest() -> Self {
        Self::none().url(short_url_key).body(digest_body_key)
    }

    /// Replace the URL sub-deriver
    pub fn url<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestUrl) -> Result<String, KeyError> + Send + Sync + 'static,
    {
        self.url = Some(Box::new(f));
        self
    }

    /// Replace the header sub-deriver
    pub fn header<F>(mut self, f: F) -> Self
    where
        F: Fn(&Headers) -> Result<String, KeyError> + Send + Sync + 'static,
    {
        self.header = Some(Box::new(f));
        self
    }

    /// Replace the body sub-deriver
    pub fn body<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut dyn Read) -> Result<String, KeyError> + Send + Sync + 'static,
    {
        self.body = Some(Box::new(f));
        self
    }

    /// Set the body buffering limit
    pub fn max_body(mut self, limit: usize) -> Self {
        self.max_body = limit;
        self
    }

    /// Derive the fingerprint for a request
    ///
    /// Buffers the body in place when a body sub-deriver is configured,
    /// so the request stays fully usable by the caller afterwards.
    pub fn derive(&self, req: &mut Request) -> Result<String, KeyError> {
        let mut key = String::new();

        if let Some(ref url) = self.url {
            key.push_str(&url(&req.url)?);
        }
        if let Some(ref header) = self.header {
            key.push_str(&header(&req.headers)?);
        }
        if let Some(ref body) = self.body {
            let bytes = req.body.read_all()?;
            if bytes.len() > self.max_body {
                return Err(KeyError::BodyTooLarge {
                    limit: self.max_body,
                });
            }
            let mut reader: &[u8] = &bytes;
            key.push_str(&body(&mut reader)?);
        }

        Ok(key)
    }
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self::exact()
    }
}

impl fmt::Debug for KeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPolicy")
            .field("url", &self.url.is_some())
            .field("header", &self.header.is_some())
            .field("body", &self.body.is_some())
            .field("max_body", &self.max_body)
            .finish()
    }
}

/// URL key from scheme, host, port, and path (query excluded)
pub fn short_url_key(url: &RequestUrl) -> Result<String, KeyError> {
    let port = url.port.map(|p| p.to_string()).unwrap_or_default();
    Ok(format!("{}{}{}{}", url.scheme, url.host, port, url.path))
}

/// URL key including the query string
pub fn full_url_key(url: &RequestUrl) -> Result<String, KeyError> {
    Ok(url.to_string())
}

/// Exact-byte-match body key: a lossless printable encoding of the raw
/// body bytes, so distinct bodies always produce distinct keys
pub fn exact_body_key(body: &mut dyn Read) -> Result<String, KeyError> {
    let mut buf = Vec::new();
    body.read_to_end(&mut buf)?;
    Ok(buf.escape_ascii().to_string())
}

/// Content-hash body key: SHA-256 of the body bytes, hex encoded
pub fn digest_body_key(body: &mut dyn Read) -> Result<String, KeyError> {
    let mut hasher = Sha256::new();
    io::copy(body, &mut hasher)?;
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}
