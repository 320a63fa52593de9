//! Thread-safe string set with very limited functionality.
//!
//! Shared between the protocol command loop and the per-replica watch
//! routers. Writers are mutually exclusive; reads may proceed concurrently
//! with other reads. Snapshot order is unspecified — callers needing
//! determinism sort the result themselves.

use std::collections::HashSet;
use std::sync::RwLock;

/// Thread-safe unordered set of unique strings.
#[derive(Debug, Default)]
pub struct SyncSet {
    inner: RwLock<HashSet<String>>,
}

impl SyncSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert every given element.
    pub fn add<I, S>(&self, elements: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        for element in elements {
            guard.insert(element.into());
        }
    }

    /// Insert a single element. Returns `true` if it was not yet a member.
    pub fn insert(&self, element: impl Into<String>) -> bool {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(element.into())
    }

    /// Remove every given element; absent elements are ignored.
    pub fn remove<'a, I>(&self, elements: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        for element in elements {
            guard.remove(element);
        }
    }

    /// True only if **all** given elements are members. An empty element
    /// list is never considered contained.
    pub fn has<'a, I>(&self, elements: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut any = false;
        for element in elements {
            any = true;
            if !guard.contains(element) {
                return false;
            }
        }
        any
    }

    /// Single-element membership test.
    pub fn contains(&self, element: &str) -> bool {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        guard.contains(element)
    }

    /// Number of elements currently in the set.
    pub fn size(&self) -> usize {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Empty out the set.
    pub fn clear(&self) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        guard.clear();
    }

    /// Snapshot of the current members, in no particular order.
    pub fn to_vec(&self) -> Vec<String> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        guard.iter().cloned().collect()
    }

    /// Atomically take every member out of the set. Members inserted after
    /// the drain are unaffected and stay for the next drain.
    pub fn drain(&self) -> Vec<String> {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        guard.drain().collect()
    }
}
