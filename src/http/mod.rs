//! Abstract request/response capabilities
//!
//! The middleware does not parse or transport HTTP itself; it works
//! against these capabilities. A host server adapts its own connection
//! types to [`ResponseSink`] and [`Request`] and embeds the middleware
//! in front of its handler.

pub mod headers;
pub mod request;
pub mod sink;

pub use headers::{diff, HeaderDiff, HeaderSnapshot, Headers};
pub use request::{Body, Request, RequestCopy, RequestUrl};
pub use sink::{BufferSink, ResponseSink, SinkHandle};
