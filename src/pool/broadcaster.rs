//! Response broadcaster
//!
//! One broadcaster exists per in-flight logical request. It is the sink
//! handed to the driver's handler, and it mirrors every header, status,
//! and body event to each attached rider sink. On the first body write
//! it deregisters its key from the pool, closing the attach window, and
//! reconciles headers so riders only ever see the driver's final header
//! state.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::http::{diff, HeaderSnapshot, Headers, ResponseSink, SinkHandle};

use super::error::{PoolError, RelayError};
use super::store::RequestPool;

/// Completion signal handed to a waiting rider
pub type Completion = oneshot::Receiver<Result<(), RelayError>>;

/// Broadcaster lifecycle state
///
/// The transition is one-way: once body output begins the broadcaster
/// never accepts another rider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastState {
    /// No body output yet; riders may attach
    Idle,
    /// First body byte sent; attach window closed
    Writing,
}

struct Rider {
    sink: SinkHandle,
    done: Option<oneshot::Sender<Result<(), RelayError>>>,
    evicted: bool,
}

struct Inner {
    state: BroadcastState,
    /// 1xx codes emitted so far, replayed to late-attaching riders
    informational: Vec<u16>,
    /// Final status code; 0 until set, then fixed. First
    /// non-informational code wins, later calls are no-ops.
    status: u16,
    riders: Vec<Rider>,
    finished: bool,
}

/// Multicast response sink for one in-flight logical request
pub struct Broadcaster {
    key: String,
    pool: Arc<RequestPool>,
    driver: SinkHandle,
    /// Driver header state at registration time, the reconciliation
    /// baseline
    baseline: HeaderSnapshot,
    inner: Mutex<Inner>,
}

impl Broadcaster {
    pub(super) fn new(key: String, driver: SinkHandle, pool: Arc<RequestPool>) -> Self {
        let baseline = driver.headers().snapshot();
        Self {
            key,
            pool,
            driver,
            baseline,
            inner: Mutex::new(Inner {
                state: BroadcastState::Idle,
                informational: Vec::new(),
                status: 0,
                riders: Vec::new(),
                finished: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The fingerprint key this broadcaster is registered under
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current lifecycle state
    pub fn state(&self) -> BroadcastState {
        self.lock().state
    }

    /// Number of attached riders (evicted riders included)
    pub fn rider_count(&self) -> usize {
        self.lock().riders.len()
    }

    /// Attach a rider sink, catching it up on already-emitted status
    /// codes
    ///
    /// Replay and registration happen under one exclusive section, so
    /// the rider observes every status event exactly once: the ones it
    /// missed by replay, the rest live.
    pub fn register_rider(&self, sink: SinkHandle) -> Result<Completion, PoolError> {
        let mut inner = self.lock();
        if inner.state == BroadcastState::Writing || inner.finished {
            return Err(PoolError::AlreadyWriting(self.key.clone()));
        }

        for &code in &inner.informational {
            sink.write_status(code);
        }
        if inner.status != 0 {
            sink.write_status(inner.status);
        }

        let (tx, rx) = oneshot::channel();
        inner.riders.push(Rider {
            sink,
            done: Some(tx),
            evicted: false,
        });
        tracing::debug!(key = %self.key, riders = inner.riders.len(), "Rider attached");
        Ok(rx)
    }

    /// Called when the driver's handler execution has returned
    ///
    /// Resolves every remaining rider's completion signal. If the
    /// handler produced no body output, the pool entry is removed here
    /// and headers are reconciled so riders still observe the final
    /// header state.
    pub fn finish(&self, outcome: Result<(), RelayError>) {
        let (was_idle, targets, completions) = {
            let mut inner = self.lock();
            if inner.finished {
                return;
            }
            inner.finished = true;
            let was_idle = inner.state == BroadcastState::Idle;
            if was_idle {
                inner.state = BroadcastState::Writing;
            }
            let targets = live_sinks(&inner);
            let completions: Vec<_> = inner
                .riders
                .iter_mut()
                .filter_map(|r| r.done.take())
                .collect();
            (was_idle, targets, completions)
        };

        if was_idle {
            self.pool.remove(&self.key);
            self.reconcile_headers(&targets);
        }

        if let Err(ref err) = outcome {
            tracing::warn!(key = %self.key, error = %err, riders = completions.len(), "Broadcast finished with error");
        }
        for tx in completions {
            let _ = tx.send(outcome.clone());
        }
    }

    /// Copy the baseline-to-final header delta onto every rider sink
    fn reconcile_headers(&self, targets: &[(usize, SinkHandle)]) {
        let current = self.driver.headers().snapshot();
        let delta = diff(&self.baseline, &current);
        if delta.is_empty() {
            return;
        }
        for (_, sink) in targets {
            sink.headers().apply(&delta);
        }
    }

    /// Evict a rider after its sink failed; the error surfaces only on
    /// that rider's own completion signal
    fn evict_rider(&self, index: usize, err: io::Error) {
        let mut inner = self.lock();
        let Some(rider) = inner.riders.get_mut(index) else {
            return;
        };
        if rider.evicted {
            return;
        }
        rider.evicted = true;
        tracing::warn!(key = %self.key, rider = index, error = %err, "Rider sink failed, evicting");
        if let Some(tx) = rider.done.take() {
            let _ = tx.send(Err(RelayError::Sink(err.to_string())));
        }
    }
}

fn live_sinks(inner: &Inner) -> Vec<(usize, SinkHandle)> {
    inner
        .riders
        .iter()
        .enumerate()
        .filter(|(_, r)| !r.evicted)
        .map(|(i, r)| (i, Arc::clone(&r.sink)))
        .collect()
}

impl ResponseSink for Broadcaster {
    /// The live, mutable header set of the driver's underlying sink.
    /// Riders receive the reconciled result when body output begins.
    fn headers(&self) -> Headers {
        self.driver.headers()
    }

    fn write_status(&self, code: u16) {
        let mut inner = self.lock();
        if inner.state == BroadcastState::Writing {
            // First body write froze the status line
            return;
        }
        if code < 200 {
            inner.informational.push(code);
        } else {
            if inner.status != 0 {
                return;
            }
            inner.status = code;
        }

        self.driver.write_status(code);
        for rider in inner.riders.iter().filter(|r| !r.evicted) {
            rider.sink.write_status(code);
        }
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let (first, targets) = {
            let mut inner = self.lock();
            let first = inner.state == BroadcastState::Idle;
            if first {
                inner.state = BroadcastState::Writing;
            }
            (first, live_sinks(&inner))
        };

        // Pool removal and byte forwarding happen outside the state
        // lock; the listener list was fixed above and only grows while
        // Idle, so indexes stay valid.
        if first {
            self.pool.remove(&self.key);
            self.reconcile_headers(&targets);
            tracing::debug!(key = %self.key, riders = targets.len(), "Body output started, attach window closed");
        }

        for (index, sink) in &targets {
            if let Err(err) = sink.write(buf) {
                self.evict_rider(*index, err);
            }
        }

        self.driver.write(buf)
    }
}
