//! Shared header set
//!
//! `Headers` is a cloneable handle to a key -> values mapping shared
//! between the handler task mutating the response headers and the
//! broadcaster snapshotting them for reconciliation. All clones of a
//! handle observe the same underlying map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Plain owned copy of a header set, used as a diff baseline.
pub type HeaderSnapshot = HashMap<String, Vec<String>>;

/// Shared, thread-safe header set handle
#[derive(Debug, Clone, Default)]
pub struct Headers {
    inner: Arc<Mutex<HeaderSnapshot>>,
}

impl Headers {
    /// Create an empty header set
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HeaderSnapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace all values for a key with a single value
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock().insert(key.into(), vec![value.into()]);
    }

    /// Append a value for a key
    pub fn add(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock().entry(key.into()).or_default().push(value.into());
    }

    /// Get all values for a key
    pub fn get(&self, key: &str) -> Option<Vec<String>> {
        self.lock().get(key).cloned()
    }

    /// Get the first value for a key
    pub fn get_first(&self, key: &str) -> Option<String> {
        self.lock().get(key).and_then(|v| v.first().cloned())
    }

    /// Remove a key
    pub fn remove(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Whether the key is present
    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Number of distinct header keys
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the set holds no headers
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Owned copy of the current state
    pub fn snapshot(&self) -> HeaderSnapshot {
        self.lock().clone()
    }

    /// Apply a reconciliation diff to this header set
    pub fn apply(&self, diff: &HeaderDiff) {
        let mut map = self.lock();
        for (key, values) in &diff.changed {
            map.insert(key.clone(), values.clone());
        }
        for key in &diff.removed {
            map.remove(key);
        }
    }
}

/// Difference between two header snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderDiff {
    /// Keys added or whose values changed, with their final values
    pub changed: Vec<(String, Vec<String>)>,
    /// Keys present in the baseline but absent in the final state
    pub removed: Vec<String>,
}

impl HeaderDiff {
    /// Whether the diff carries no changes
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Compute the symmetric difference between a baseline and a final header
/// snapshot. Keys whose values are byte-identical in both are omitted.
pub fn diff(baseline: &HeaderSnapshot, current: &HeaderSnapshot) -> HeaderDiff {
    let mut out = HeaderDiff::default();

    for (key, values) in current {
        match baseline.get(key) {
            Some(old) if old == values => {}
            _ => out.changed.push((key.clone(), values.clone())),
        }
    }
    for key in baseline.keys() {
        if !current.contains_key(key) {
            out.removed.push(key.clone());
        }
    }

    out
}
