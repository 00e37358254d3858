//! Event Registry
//!
//! Bookkeeping on top of native document listeners.
//!
//! - `on` attaches a listener and records it twice: per node (so `off` can
//!   find it by name or handler) and in a global index by event name.
//! - `delegate` attaches one listener to an ancestor and routes events to
//!   the nearest matching element between the event target and the
//!   ancestor.
//! - `trigger` dispatches a synthetic bubbling, cancelable event.
//! - `capture` observes every later attachment for an event name until it
//!   is released.
//!
//! Entries for nodes that no longer exist in the document are pruned
//! whenever a listener is attached or the index is queried.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;

use crate::dom::{Document, Event, EventCallback, ListenerId, ListenerOptions, NodeId, Selector};
use crate::error::{DomError, SelectorError};
use crate::runtime::isolate::isolate;

/// Handler for delegated events: the event and the element that matched.
pub type DelegateHandler = Arc<dyn Fn(&Event, NodeId) + Send + Sync>;

/// Callback observing listener attachments.
pub type CaptureCallback = Arc<dyn Fn(&Attachment) + Send + Sync>;

/// A listener attachment, as reported to capture callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub node: NodeId,
    pub event: String,
    pub listener: ListenerId,
    pub options: ListenerOptions,
}

#[derive(Clone)]
struct Binding {
    id: ListenerId,
    handler: EventCallback,
}

#[derive(Default)]
struct RegistryState {
    nodes: HashMap<NodeId, HashMap<String, Vec<Binding>>>,
    captures: HashMap<String, Vec<(u64, CaptureCallback)>>,
}

struct RegistryInner {
    document: Document,
    state: Mutex<RegistryState>,
    index: DashMap<String, Vec<(NodeId, ListenerId)>>,
}

/// Listener attachment, delegation and synthetic dispatch.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct EventRegistry {
    inner: Arc<RegistryInner>,
}

impl EventRegistry {
    pub fn new(document: Document) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                document,
                state: Mutex::new(RegistryState::default()),
                index: DashMap::new(),
            }),
        }
    }

    /// Attach `handler` for `event` on `node`.
    pub fn on(
        &self,
        node: NodeId,
        event: &str,
        handler: EventCallback,
        options: ListenerOptions,
    ) -> Result<Unregister, DomError> {
        self.prune();
        if options.once {
            return self.on_once(node, event, handler, options);
        }
        let id = self
            .inner
            .document
            .add_event_listener(node, event, handler.clone(), options)?;
        Ok(self.record(node, event, id, handler, options))
    }

    /// The document drops a `once` listener after it fires; the wrapper
    /// drops our bookkeeping for it as well.
    fn on_once(
        &self,
        node: NodeId,
        event: &str,
        handler: EventCallback,
        options: ListenerOptions,
    ) -> Result<Unregister, DomError> {
        let weak = Arc::downgrade(&self.inner);
        let name = event.to_string();
        let own_id: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
        let slot = own_id.clone();
        let inner_handler = handler.clone();

        let wrapper: EventCallback = Arc::new(move |e: &Event| {
            inner_handler(e);
            let id = *slot.lock();
            if let (Some(inner), Some(id)) = (weak.upgrade(), id) {
                EventRegistry { inner }.forget(node, &name, id);
            }
        });

        let id = self
            .inner
            .document
            .add_event_listener(node, event, wrapper, options)?;
        *own_id.lock() = Some(id);
        Ok(self.record(node, event, id, handler, options))
    }

    /// Remove `handler` (compared by identity) or, with `None`, every
    /// handler for `event` on `node`. Returns how many were removed.
    pub fn off(&self, node: NodeId, event: &str, handler: Option<&EventCallback>) -> usize {
        let removed: Vec<ListenerId> = {
            let mut state = self.inner.state.lock();
            let Some(by_name) = state.nodes.get_mut(&node) else {
                return 0;
            };
            let Some(bindings) = by_name.get_mut(event) else {
                return 0;
            };
            let mut removed = Vec::new();
            bindings.retain(|binding| {
                let matches = handler.map_or(true, |h| same_callback(h, &binding.handler));
                if matches {
                    removed.push(binding.id);
                }
                !matches
            });
            if bindings.is_empty() {
                by_name.remove(event);
            }
            if by_name.is_empty() {
                state.nodes.remove(&node);
            }
            removed
        };

        for id in &removed {
            self.inner.document.remove_event_listener(node, *id);
        }
        if let Some(mut entries) = self.inner.index.get_mut(event) {
            entries.retain(|(n, id)| !(*n == node && removed.contains(id)));
        }
        self.inner.index.remove_if(event, |_, entries| entries.is_empty());

        if !removed.is_empty() {
            tracing::trace!(node = %node, event, removed = removed.len(), "listeners removed");
        }
        removed.len()
    }

    /// Route `event` fired anywhere inside `ancestor` to `handler`, called
    /// with the nearest element matching `selector`. Events with no match
    /// are ignored.
    pub fn delegate<F>(&self, ancestor: NodeId, selector: &str, event: &str, handler: F) -> Result<Unregister, crate::Error>
    where
        F: Fn(&Event, NodeId) + Send + Sync + 'static,
    {
        let selector: Selector = selector.parse().map_err(|err: SelectorError| {
            tracing::warn!(selector = %err.selector, reason = %err.reason, "invalid delegation selector");
            err
        })?;
        let document = self.inner.document.clone();
        let handler: DelegateHandler = Arc::new(handler);

        let callback: EventCallback = Arc::new(move |e: &Event| {
            let Some(target) = e.target() else { return };
            let mut current = Some(target);
            while let Some(node) = current {
                if document.matches(node, &selector) {
                    handler(e, node);
                    return;
                }
                if node == ancestor {
                    return;
                }
                current = document.parent(node);
            }
        });

        Ok(self.on(ancestor, event, callback, ListenerOptions::default())?)
    }

    /// Dispatch a bubbling, cancelable `event` carrying `detail` at `node`.
    ///
    /// Returns `false` when a listener called `prevent_default`.
    pub fn trigger(&self, node: NodeId, event: &str, detail: Value) -> Result<bool, DomError> {
        self.inner
            .document
            .dispatch_event(node, &Event::custom(event, detail))
    }

    /// Report every later attachment for `event` to `callback` until the
    /// returned handle is released.
    pub fn capture<F>(&self, event: &str, callback: F) -> Uncapture
    where
        F: Fn(&Attachment) + Send + Sync + 'static,
    {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        let id = NEXT.fetch_add(1, Ordering::Relaxed);
        self.inner
            .state
            .lock()
            .captures
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(callback)));
        Uncapture {
            registry: Arc::downgrade(&self.inner),
            event: event.to_string(),
            id,
            active: AtomicBool::new(true),
        }
    }

    /// Every live listener for `event`, in attachment order.
    pub fn listeners(&self, event: &str) -> Vec<(NodeId, ListenerId)> {
        self.prune();
        self.inner
            .index
            .get(event)
            .map(|entries| entries.value().clone())
            .unwrap_or_default()
    }

    /// Listeners registered through this registry for `event` on `node`.
    pub fn listener_count(&self, node: NodeId, event: &str) -> usize {
        self.inner
            .state
            .lock()
            .nodes
            .get(&node)
            .and_then(|by_name| by_name.get(event))
            .map_or(0, Vec::len)
    }

    /// Drop bookkeeping for nodes that no longer exist. Returns the number
    /// of nodes forgotten.
    pub fn prune(&self) -> usize {
        let document = &self.inner.document;
        let dead: Vec<NodeId> = {
            let mut state = self.inner.state.lock();
            let dead: Vec<NodeId> = state
                .nodes
                .keys()
                .copied()
                .filter(|node| !document.exists(*node))
                .collect();
            for node in &dead {
                state.nodes.remove(node);
            }
            dead
        };
        if !dead.is_empty() {
            self.inner
                .index
                .retain(|_, entries| {
                    entries.retain(|(node, _)| !dead.contains(node));
                    !entries.is_empty()
                });
            tracing::debug!(nodes = dead.len(), "pruned listeners of removed nodes");
        }
        dead.len()
    }

    fn record(&self, node: NodeId, event: &str, id: ListenerId, handler: EventCallback, options: ListenerOptions) -> Unregister {
        let captures: Vec<CaptureCallback> = {
            let mut state = self.inner.state.lock();
            state
                .nodes
                .entry(node)
                .or_default()
                .entry(event.to_string())
                .or_default()
                .push(Binding { id, handler });
            state
                .captures
                .get(event)
                .map(|list| list.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default()
        };
        self.inner
            .index
            .entry(event.to_string())
            .or_default()
            .push((node, id));

        tracing::trace!(node = %node, event, "listener attached");

        if !captures.is_empty() {
            let attachment = Attachment {
                node,
                event: event.to_string(),
                listener: id,
                options,
            };
            for callback in captures {
                isolate("capture callback", || callback(&attachment));
            }
        }

        Unregister {
            registry: Arc::downgrade(&self.inner),
            node,
            event: event.to_string(),
            id,
            active: AtomicBool::new(true),
        }
    }

    /// Remove one listener by id.
    fn forget(&self, node: NodeId, event: &str, id: ListenerId) -> bool {
        let found = {
            let mut state = self.inner.state.lock();
            let Some(by_name) = state.nodes.get_mut(&node) else {
                return false;
            };
            let Some(bindings) = by_name.get_mut(event) else {
                return false;
            };
            let before = bindings.len();
            bindings.retain(|b| b.id != id);
            let found = bindings.len() != before;
            if bindings.is_empty() {
                by_name.remove(event);
            }
            if by_name.is_empty() {
                state.nodes.remove(&node);
            }
            found
        };

        self.inner.document.remove_event_listener(node, id);
        if let Some(mut entries) = self.inner.index.get_mut(event) {
            entries.retain(|entry| *entry != (node, id));
        }
        self.inner.index.remove_if(event, |_, entries| entries.is_empty());
        found
    }

    fn release_capture(&self, event: &str, id: u64) {
        let mut state = self.inner.state.lock();
        if let Some(list) = state.captures.get_mut(event) {
            list.retain(|(capture_id, _)| *capture_id != id);
            if list.is_empty() {
                state.captures.remove(event);
            }
        }
    }
}

fn same_callback(a: &EventCallback, b: &EventCallback) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Removes the listener returned by [`EventRegistry::on`]. Idempotent.
pub struct Unregister {
    registry: Weak<RegistryInner>,
    node: NodeId,
    event: String,
    id: ListenerId,
    active: AtomicBool,
}

impl Unregister {
    pub fn listener(&self) -> ListenerId {
        self.id
    }

    /// Remove the listener. Calling it again does nothing.
    pub fn unregister(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(inner) = self.registry.upgrade() {
            EventRegistry { inner }.forget(self.node, &self.event, self.id);
        }
    }
}

/// Stops a [`capture`](EventRegistry::capture). Idempotent.
pub struct Uncapture {
    registry: Weak<RegistryInner>,
    event: String,
    id: u64,
    active: AtomicBool,
}

impl Uncapture {
    pub fn release(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(inner) = self.registry.upgrade() {
            EventRegistry { inner }.release_capture(&self.event, self.id);
        }
    }
}
