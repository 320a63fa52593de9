//! Per-replica state registry.
//!
//! One entry per active replica, keyed by the caller-supplied replica name.
//! The outer map is only mutated by the command loop; router workers hold an
//! `Arc` of their entry and touch nothing but its internally synchronized
//! fields. An entry exists in the map if and only if its OS watch and router
//! worker are live.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use notify::RecommendedWatcher;
use tokio::sync::mpsc;

use fsmonitor_core::SyncSet;

/// State for one watched replica.
pub struct ReplicaEntry {
    root: PathBuf,
    /// Registered sub-paths, in registration order. Matching walks this in
    /// order and first match wins, so order must be preserved.
    paths: RwLock<Vec<String>>,
    /// Relative paths observed changed since the last report or reset.
    changes: SyncSet,
    /// One-shot termination signal for the router worker. Buffered so a send
    /// never blocks, even if the worker already exited.
    stop_tx: mpsc::Sender<()>,
    /// Live OS watch. Dropping the entry drops the watch. `None` only for
    /// entries built without a backing watch (tests).
    _watcher: Option<Mutex<RecommendedWatcher>>,
}

impl ReplicaEntry {
    pub fn new(
        root: PathBuf,
        watcher: Option<RecommendedWatcher>,
        stop_tx: mpsc::Sender<()>,
    ) -> Self {
        Self {
            root,
            paths: RwLock::new(Vec::new()),
            changes: SyncSet::new(),
            stop_tx,
            _watcher: watcher.map(Mutex::new),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Register a sub-path of interest. Duplicates are ignored; returns
    /// whether the path was newly added.
    pub fn register_path(&self, path: &str) -> bool {
        let mut paths = self.paths.write().unwrap_or_else(|e| e.into_inner());
        if paths.iter().any(|p| p == path) {
            return false;
        }
        paths.push(path.to_string());
        true
    }

    /// Snapshot of the registered sub-paths, in registration order.
    pub fn paths(&self) -> Vec<String> {
        let paths = self.paths.read().unwrap_or_else(|e| e.into_inner());
        paths.clone()
    }

    pub fn changes(&self) -> &SyncSet {
        &self.changes
    }

    /// Tell the router worker to stop. Never blocks: a full buffer means the
    /// signal is already pending, a closed channel means the worker is gone.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.try_send(());
    }
}

impl std::fmt::Debug for ReplicaEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaEntry")
            .field("root", &self.root)
            .field("paths", &self.paths())
            .field("changes", &self.changes.size())
            .finish()
    }
}

/// Outcome of a get-or-create start request.
pub enum StartOutcome<T> {
    /// The replica did not exist; `aux` carries whatever the builder produced
    /// alongside the entry (router channels, in practice).
    Created {
        entry: std::sync::Arc<ReplicaEntry>,
        aux: T,
    },
    /// The replica was already active; starting it again is a no-op beyond
    /// registering another sub-path.
    Existing(std::sync::Arc<ReplicaEntry>),
}

/// Replica-name → entry map shared between the command loop and routers.
#[derive(Default)]
pub struct ReplicaRegistry {
    entries: RwLock<HashMap<String, std::sync::Arc<ReplicaEntry>>>,
}

impl ReplicaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<std::sync::Arc<ReplicaEntry>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(name).cloned()
    }

    /// Atomic get-or-create: the builder runs under the map's write lock, so
    /// two starts for the same key can never race into two watches.
    pub fn get_or_insert_with<T, E>(
        &self,
        name: &str,
        make: impl FnOnce() -> Result<(ReplicaEntry, T), E>,
    ) -> Result<StartOutcome<T>, E> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get(name) {
            return Ok(StartOutcome::Existing(entry.clone()));
        }
        let (entry, aux) = make()?;
        let entry = std::sync::Arc::new(entry);
        entries.insert(name.to_string(), entry.clone());
        Ok(StartOutcome::Created { entry, aux })
    }

    /// Remove a replica and signal its router to stop. Safe against routers
    /// still draining in-flight events: late insertions land in the detached
    /// entry and are dropped with it.
    pub fn remove(&self, name: &str) -> Option<std::sync::Arc<ReplicaEntry>> {
        let entry = {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            entries.remove(name)
        };
        if let Some(entry) = &entry {
            entry.signal_stop();
        }
        entry
    }

    /// Stop every router and drop every entry. Used on daemon shutdown.
    pub fn shutdown(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        for entry in entries.values() {
            entry.signal_stop();
        }
        entries.clear();
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_entry(root: &str) -> (ReplicaEntry, mpsc::Receiver<()>) {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        (
            ReplicaEntry::new(PathBuf::from(root), None, stop_tx),
            stop_rx,
        )
    }

    #[test]
    fn second_start_for_same_key_reuses_the_entry() {
        let registry = ReplicaRegistry::new();
        let (entry, _stop_rx) = make_entry("/r");
        let outcome = registry
            .get_or_insert_with::<_, std::convert::Infallible>("rep", || Ok((entry, ())))
            .expect("insert");
        assert!(matches!(outcome, StartOutcome::Created { .. }));

        let outcome = registry
            .get_or_insert_with::<(), std::convert::Infallible>("rep", || {
                panic!("builder must not run for an existing replica")
            })
            .expect("lookup");
        assert!(matches!(outcome, StartOutcome::Existing(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_fires_the_stop_signal_once() {
        let registry = ReplicaRegistry::new();
        let (entry, mut stop_rx) = make_entry("/r");
        registry
            .get_or_insert_with::<_, std::convert::Infallible>("rep", || Ok((entry, ())))
            .expect("insert");

        let removed = registry.remove("rep").expect("entry existed");
        assert!(registry.get("rep").is_none());
        assert!(stop_rx.try_recv().is_ok());

        // Signaling again after the worker is gone must not panic or block.
        drop(stop_rx);
        removed.signal_stop();
    }

    #[test]
    fn remove_of_unknown_replica_is_distinguishable() {
        let registry = ReplicaRegistry::new();
        assert!(registry.remove("missing").is_none());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn register_path_preserves_order_and_dedups() {
        let (entry, _stop_rx) = make_entry("/r");
        assert!(entry.register_path("foo"));
        assert!(entry.register_path("bar"));
        assert!(!entry.register_path("foo"));
        assert_eq!(entry.paths(), vec!["foo".to_string(), "bar".to_string()]);
    }

    #[test]
    fn shutdown_signals_and_clears_everything() {
        let registry = ReplicaRegistry::new();
        let (a, mut a_rx) = make_entry("/a");
        let (b, mut b_rx) = make_entry("/b");
        registry
            .get_or_insert_with::<_, std::convert::Infallible>("a", || Ok((a, ())))
            .expect("insert a");
        registry
            .get_or_insert_with::<_, std::convert::Infallible>("b", || Ok((b, ())))
            .expect("insert b");

        registry.shutdown();
        assert!(registry.is_empty());
        assert!(a_rx.try_recv().is_ok());
        assert!(b_rx.try_recv().is_ok());
    }
}
