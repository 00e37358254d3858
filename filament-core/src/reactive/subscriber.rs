//! Subscriber types for the change registry.
//!
//! A subscription is one callback registered on one path. The same closure
//! registered twice is two subscriptions; unsubscribing removes exactly one.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use serde_json::Value;

use super::registry::PathRegistry;

/// Unique identifier for a subscription.
///
/// Each registration gets a fresh ID, so identical callbacks registered on
/// the same path remain individually removable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Generate a new unique subscription ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

/// A change notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Canonical path that was notified.
    pub path: String,
    /// The new value; `None` when the value was deleted.
    pub value: Option<Value>,
    /// The previous value; `None` when there was none.
    pub old: Option<Value>,
    /// Set on the notification a container receives when something below it
    /// changed. `value` and `old` are then both the container itself.
    pub deep: bool,
}

impl Change {
    pub(crate) fn direct(path: String, value: Option<Value>, old: Option<Value>) -> Self {
        Self {
            path,
            value,
            old,
            deep: false,
        }
    }

    pub(crate) fn deep(path: String, container: Value) -> Self {
        Self {
            path,
            value: Some(container.clone()),
            old: Some(container),
            deep: true,
        }
    }
}

/// Callback invoked with each change on a subscribed path.
pub type ChangeCallback = Arc<dyn Fn(&Change) + Send + Sync>;

/// Handle returned by `observe`.
///
/// Dropping the handle keeps the subscription alive; call
/// [`unsubscribe`](Subscription::unsubscribe) to remove it. Calling it more
/// than once is a no-op.
pub struct Subscription {
    id: SubscriptionId,
    path: String,
    registry: Weak<PathRegistry>,
    active: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(id: SubscriptionId, path: String, registry: &Arc<PathRegistry>) -> Self {
        Self {
            id,
            path,
            registry: Arc::downgrade(registry),
            active: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Canonical path this subscription listens on.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// False once unsubscribed.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Remove this registration. Safe to call repeatedly.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.path, self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subscription_ids_are_unique() {
        let id1 = SubscriptionId::new();
        let id2 = SubscriptionId::new();
        let id3 = SubscriptionId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn deep_changes_carry_the_container_twice() {
        let change = Change::deep("user".into(), json!({"name": "a"}));
        assert!(change.deep);
        assert_eq!(change.value, change.old);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let registry = Arc::new(PathRegistry::new());
        let id = registry.add("count".into(), Arc::new(|_: &Change| {}));
        let sub = Subscription::new(id, "count".into(), &registry);

        assert_eq!(registry.count("count"), 1);
        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        assert_eq!(registry.count("count"), 0);
    }
}
