//! In-flight HTTP request deduplication and response fan-out
//!
//! When multiple concurrent inbound requests are recognized as
//! logically identical (by a pluggable fingerprint of URL, headers,
//! and body), only one of them (the *driver*) invokes the downstream
//! handler. Every other caller (a *rider*) attaches to the driver's
//! broadcaster and receives an exact replay of the single real
//! response as it is produced: status line, headers, and body bytes,
//! including streaming writes.
//!
//! This is single-process, in-memory, best-effort collapsing of
//! requests that are concurrently in flight. It is not a response
//! cache: once the driver's first body byte is out, the attach window
//! closes and later identical requests run independently.
//!
//! # Architecture
//!
//! ```text
//!   request ──► DedupMiddleware ──► KeyPolicy::derive ──► fingerprint
//!                      │
//!                      ▼
//!            RequestPool::get_or_register
//!              │              │            │
//!            Drive          Ride         Bypass
//!              │              │            │
//!      handler runs with   await the   handler runs with
//!      the Broadcaster     driver's    the caller's own
//!      as its sink         completion  sink (window closed)
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use dedup_rs::{BufferSink, DedupMiddleware, Request, RequestUrl, ResponseSink, SinkHandle};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let middleware = DedupMiddleware::new(|sink: SinkHandle, _req: Request| async move {
//!     sink.write_status(200);
//!     let _ = sink.write(b"hello");
//! });
//!
//! let sink = Arc::new(BufferSink::new());
//! let req = Request::new("GET", RequestUrl::new("http", "example.com", "/hello"));
//! middleware.handle(sink.clone(), req).await;
//!
//! assert_eq!(sink.final_status(), Some(200));
//! assert_eq!(&sink.body()[..], b"hello");
//! # }
//! ```

pub mod config;
pub mod http;
pub mod key;
pub mod middleware;
pub mod pool;

pub use config::{BodyKeyMode, DedupConfig};
pub use http::{Body, BufferSink, Headers, Request, RequestUrl, ResponseSink, SinkHandle};
pub use key::{KeyError, KeyPolicy};
pub use middleware::{DedupMiddleware, Handler, HandlerFuture};
pub use pool::{Admission, BroadcastState, Broadcaster, PoolError, RelayError, RequestPool};
