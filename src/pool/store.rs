//! Registration pool
//!
//! A concurrent key -> broadcaster registry with atomic
//! create-if-absent / attach-else-bypass admission. Lookups take a
//! shared lock; mutation is exclusive.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::http::SinkHandle;

use super::broadcaster::{Broadcaster, Completion};
use super::error::PoolError;

/// Outcome of admitting a request under a fingerprint key
pub enum Admission {
    /// First request for this key: invoke the handler with this
    /// broadcaster as its sink
    Drive(Arc<Broadcaster>),
    /// Concurrent duplicate: await the completion signal instead of
    /// invoking the handler
    Ride(Completion),
    /// Attach window already closed: the caller proceeds as its own
    /// unlinked driver with its original sink (forward progress over
    /// collapsing)
    Bypass(SinkHandle),
}

/// Concurrent registry of in-flight broadcasters
pub struct RequestPool {
    entries: RwLock<HashMap<String, Arc<Broadcaster>>>,
}

impl RequestPool {
    /// Create an empty pool
    ///
    /// Returned in an `Arc` because every broadcaster keeps a
    /// back-reference for self-deregistration at its first body write.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
        })
    }

    fn entries(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Broadcaster>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn entries_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Broadcaster>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomic create-if-absent / attach-else-bypass
    ///
    /// Exactly one of the three admission outcomes is returned; a key
    /// can never gain a second driver while its broadcaster is
    /// registered.
    pub fn get_or_register(self: &Arc<Self>, key: &str, sink: SinkHandle) -> Admission {
        let mut entries = self.entries_mut();

        if let Some(existing) = entries.get(key) {
            return match existing.register_rider(Arc::clone(&sink)) {
                Ok(done) => Admission::Ride(done),
                Err(PoolError::AlreadyWriting(_)) => {
                    tracing::debug!(key = %key, "Attach window closed, bypassing");
                    Admission::Bypass(sink)
                }
            };
        }

        let broadcaster = Arc::new(Broadcaster::new(key.to_string(), sink, Arc::clone(self)));
        entries.insert(key.to_string(), Arc::clone(&broadcaster));
        tracing::debug!(key = %key, "Driver registered");
        Admission::Drive(broadcaster)
    }

    /// Lookup without attaching
    pub fn get(&self, key: &str) -> Option<Arc<Broadcaster>> {
        self.entries().get(key).cloned()
    }

    /// Delete a key unconditionally
    ///
    /// Called by a broadcaster exactly once, when its attach window
    /// closes.
    pub fn remove(&self, key: &str) {
        self.entries_mut().remove(key);
    }

    /// Number of in-flight keys
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether no request is currently registered
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
