//! Path Registry
//!
//! The registry maps canonical path strings to the callbacks subscribed on
//! them and fans out change notifications.
//!
//! # How It Works
//!
//! 1. `observe` registers a callback under the canonical form of its path.
//!
//! 2. A write through a proxy produces one or more [`Change`]s.
//!
//! 3. For each change the registry:
//!    a. Snapshots the callbacks registered on the change's path
//!    b. Releases its lock
//!    c. Runs each callback in registration order, isolating failures
//!
//! Callbacks may subscribe, unsubscribe, or write to the state while being
//! notified; none of that affects the snapshot already taken.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::runtime::isolate::isolate;

use super::subscriber::{Change, ChangeCallback, SubscriptionId};

/// Path -> callbacks.
pub(crate) struct PathRegistry {
    paths: RwLock<HashMap<String, Vec<(SubscriptionId, ChangeCallback)>>>,
}

impl PathRegistry {
    pub(crate) fn new() -> Self {
        Self {
            paths: RwLock::new(HashMap::new()),
        }
    }

    /// Register a callback on a canonical path.
    pub(crate) fn add(&self, path: String, callback: ChangeCallback) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.paths.write().entry(path).or_default().push((id, callback));
        id
    }

    /// Remove exactly one registration.
    pub(crate) fn remove(&self, path: &str, id: SubscriptionId) -> bool {
        let mut paths = self.paths.write();
        let Some(subs) = paths.get_mut(path) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|(sub_id, _)| *sub_id != id);
        let removed = subs.len() != before;
        if subs.is_empty() {
            paths.remove(path);
        }
        removed
    }

    /// Number of callbacks registered on `path`.
    pub(crate) fn count(&self, path: &str) -> usize {
        self.paths.read().get(path).map_or(0, Vec::len)
    }

    /// Number of distinct observed paths.
    pub(crate) fn path_count(&self) -> usize {
        self.paths.read().len()
    }

    /// Deliver `change` to every callback registered on its path.
    pub(crate) fn notify(&self, change: &Change) {
        let callbacks: Vec<ChangeCallback> = {
            let paths = self.paths.read();
            match paths.get(&change.path) {
                Some(subs) => subs.iter().map(|(_, cb)| cb.clone()).collect(),
                None => return,
            }
        };

        tracing::trace!(
            path = %change.path,
            deep = change.deep,
            subscribers = callbacks.len(),
            "notifying path subscribers"
        );

        for callback in callbacks {
            isolate("path subscriber", || callback(change));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicI32>, ChangeCallback) {
        let count = Arc::new(AtomicI32::new(0));
        let c = count.clone();
        (
            count,
            Arc::new(move |_: &Change| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    fn change(path: &str) -> Change {
        Change::direct(path.to_string(), None, None)
    }

    #[test]
    fn registry_notifies_only_exact_path() {
        let registry = PathRegistry::new();
        let (a, cb_a) = counter();
        let (b, cb_b) = counter();
        registry.add("a".into(), cb_a);
        registry.add("a.b".into(), cb_b);

        registry.notify(&change("a"));

        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn registry_removes_exactly_one_registration() {
        let registry = PathRegistry::new();
        let (count, cb) = counter();
        let first = registry.add("x".into(), cb.clone());
        registry.add("x".into(), cb);

        assert!(registry.remove("x", first));
        assert!(!registry.remove("x", first));

        registry.notify(&change("x"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.count("x"), 1);
    }

    #[test]
    fn panicking_callback_does_not_block_others() {
        let registry = PathRegistry::new();
        let (count, cb) = counter();
        registry.add("x".into(), Arc::new(|_: &Change| panic!("subscriber failure")));
        registry.add("x".into(), cb);

        registry.notify(&change("x"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_paths_are_pruned() {
        let registry = PathRegistry::new();
        let (_, cb) = counter();
        let id = registry.add("x".into(), cb);
        assert_eq!(registry.path_count(), 1);
        registry.remove("x", id);
        assert_eq!(registry.path_count(), 0);
    }
}
