//! Single-flight registration pool and response broadcaster
//!
//! The pool collapses concurrently in-flight duplicate requests onto a
//! single handler execution and fans the response out to every caller.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<RequestPool>
//!                 ┌───────────────────────────┐
//!                 │ entries: HashMap<Key,     │
//!                 │   Arc<Broadcaster> {      │
//!                 │     driver sink,          │
//!                 │     riders + completions, │
//!                 │   }                       │
//!                 │ >                         │
//!                 └────────────┬──────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!   [Driver]              [Rider]               [Rider]
//!   handler writes        done.await            done.await
//!        │                     ▲                     ▲
//!        └──► broadcaster.write() ── fan-out ────────┘
//! ```
//!
//! The first body write closes the attach window: the broadcaster
//! removes its own key from the pool, reconciles headers against the
//! registration-time baseline, and from then on only mirrors bytes to
//! the already-attached sinks.

pub mod broadcaster;
pub mod error;
pub mod store;

pub use broadcaster::{BroadcastState, Broadcaster, Completion};
pub use error::{PoolError, RelayError};
pub use store::{Admission, RequestPool};
