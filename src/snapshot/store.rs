//! A thread-safe in-memory store for the currently active snapshot.
//! [`SnapshotStore`] provides concurrent access for readers (flag
//! evaluation) and writers (the background synchronizer).
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::Namespace;

/// `SnapshotStore` is a thread-safe (`Sync`) map from namespace key to the
/// namespace's evaluation model.
///
/// A [`Namespace`] is immutable and can only be replaced completely: readers
/// receive an `Arc` snapshot that is unaffected by later writes, so one
/// evaluation always observes the fully-old or fully-new namespace, never a
/// mix.
#[derive(Default)]
pub struct SnapshotStore {
    namespaces: RwLock<HashMap<String, Arc<Namespace>>>,
}

impl SnapshotStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        SnapshotStore::default()
    }

    /// Get the currently active snapshot for a namespace. Returns `None` if
    /// no snapshot has been stored under the key yet.
    pub fn get(&self, namespace_key: &str) -> Option<Arc<Namespace>> {
        // A read() error is possible only if the lock is poisoned (a writer
        // panicked while holding it), which should never happen.
        let namespaces = self
            .namespaces
            .read()
            .expect("thread holding snapshot lock should not panic");

        namespaces.get(namespace_key).cloned()
    }

    /// Install every namespace from one refresh cycle under a single write
    /// lock acquisition. Namespaces absent from `update` keep their previous
    /// snapshot.
    pub fn apply(&self, update: impl IntoIterator<Item = Namespace>) {
        let mut namespaces = self
            .namespaces
            .write()
            .expect("thread holding snapshot lock should not panic");

        for namespace in update {
            namespaces.insert(namespace.key().to_owned(), Arc::new(namespace));
        }
    }

    /// Replace the whole store with the supplied namespaces; keys not present
    /// in `update` are removed.
    pub fn replace_all(&self, update: impl IntoIterator<Item = Namespace>) {
        let next: HashMap<_, _> = update
            .into_iter()
            .map(|namespace| (namespace.key().to_owned(), Arc::new(namespace)))
            .collect();

        let mut namespaces = self
            .namespaces
            .write()
            .expect("thread holding snapshot lock should not panic");

        *namespaces = next;
    }

    /// Drop all stored namespaces.
    pub fn clear(&self) {
        let mut namespaces = self
            .namespaces
            .write()
            .expect("thread holding snapshot lock should not panic");

        namespaces.clear();
    }

    /// Whether the store holds no namespaces.
    pub fn is_empty(&self) -> bool {
        self.namespaces
            .read()
            .expect("thread holding snapshot lock should not panic")
            .is_empty()
    }
}
