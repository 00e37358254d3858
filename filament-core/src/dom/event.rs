//! Events
//!
//! Native event objects and listener bookkeeping for document dispatch.
//! Dispatch itself lives on [`Document`](super::Document): capture phase
//! from the root down, the target phase, then (for bubbling events) the
//! bubble phase back up to the root.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use super::NodeId;

/// Names of the semantic events the engine dispatches.
pub mod names {
    /// An observed attribute changed.
    pub const ATTRIBUTE_CHANGE: &str = "attribute-change";
    /// Character data inside an observed node changed.
    pub const CONTENT_CHANGE: &str = "content-change";
    /// A child was added to an observed node.
    pub const CHILD_ADDED: &str = "child-added";
    /// A child was removed from an observed node.
    pub const CHILD_REMOVED: &str = "child-removed";
    /// The observation layer drained its intent queue for this node.
    pub const UPDATE: &str = "update";
    /// The update scheduler applied a change set to this node.
    pub const UPDATED: &str = "updated";
}

/// Dispatch phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPhase {
    None,
    Capturing,
    AtTarget,
    Bubbling,
}

/// An event travelling through the document.
///
/// Listeners receive `&Event`; the cancellation and propagation flags use
/// interior mutability so any listener can flip them.
pub struct Event {
    name: String,
    detail: Value,
    bubbles: bool,
    cancelable: bool,
    target: Mutex<Option<NodeId>>,
    current_target: Mutex<Option<NodeId>>,
    phase: Mutex<EventPhase>,
    default_prevented: AtomicBool,
    propagation_stopped: AtomicBool,
    immediate_propagation_stopped: AtomicBool,
    in_passive_listener: AtomicBool,
}

impl Event {
    /// A non-bubbling, non-cancelable event with a `null` detail.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            detail: Value::Null,
            bubbles: false,
            cancelable: false,
            target: Mutex::new(None),
            current_target: Mutex::new(None),
            phase: Mutex::new(EventPhase::None),
            default_prevented: AtomicBool::new(false),
            propagation_stopped: AtomicBool::new(false),
            immediate_propagation_stopped: AtomicBool::new(false),
            in_passive_listener: AtomicBool::new(false),
        }
    }

    /// A bubbling, cancelable event carrying `detail`.
    pub fn custom(name: impl Into<String>, detail: Value) -> Self {
        Self::new(name).bubbles(true).cancelable(true).with_detail(detail)
    }

    pub fn bubbles(mut self, bubbles: bool) -> Self {
        self.bubbles = bubbles;
        self
    }

    pub fn cancelable(mut self, cancelable: bool) -> Self {
        self.cancelable = cancelable;
        self
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn detail(&self) -> &Value {
        &self.detail
    }

    pub fn does_bubble(&self) -> bool {
        self.bubbles
    }

    pub fn is_cancelable(&self) -> bool {
        self.cancelable
    }

    /// The node the event was dispatched on.
    pub fn target(&self) -> Option<NodeId> {
        *self.target.lock()
    }

    /// The node whose listener is currently running.
    pub fn current_target(&self) -> Option<NodeId> {
        *self.current_target.lock()
    }

    /// Phase of the listener currently running.
    pub fn phase(&self) -> EventPhase {
        *self.phase.lock()
    }

    /// Cancel the default action. Ignored for non-cancelable events and
    /// inside passive listeners.
    pub fn prevent_default(&self) {
        if self.cancelable && !self.in_passive_listener.load(Ordering::SeqCst) {
            self.default_prevented.store(true, Ordering::SeqCst);
        }
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented.load(Ordering::SeqCst)
    }

    /// Stop after the listeners of the current node have run.
    pub fn stop_propagation(&self) {
        self.propagation_stopped.store(true, Ordering::SeqCst);
    }

    /// Stop before the next listener runs.
    pub fn stop_immediate_propagation(&self) {
        self.propagation_stopped.store(true, Ordering::SeqCst);
        self.immediate_propagation_stopped.store(true, Ordering::SeqCst);
    }

    pub fn propagation_stopped(&self) -> bool {
        self.propagation_stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn immediate_propagation_stopped(&self) -> bool {
        self.immediate_propagation_stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn begin_dispatch(&self, target: NodeId) {
        *self.target.lock() = Some(target);
    }

    pub(crate) fn enter(&self, node: NodeId, phase: EventPhase) {
        *self.current_target.lock() = Some(node);
        *self.phase.lock() = phase;
    }

    pub(crate) fn set_passive(&self, passive: bool) {
        self.in_passive_listener.store(passive, Ordering::SeqCst);
    }

    pub(crate) fn finish_dispatch(&self) {
        *self.current_target.lock() = None;
        *self.phase.lock() = EventPhase::None;
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("detail", &self.detail)
            .field("target", &self.target())
            .field("bubbles", &self.bubbles)
            .field("default_prevented", &self.default_prevented())
            .finish()
    }
}

/// A native listener callback.
pub type EventCallback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Unique identifier for a native listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// Listener attachment options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerOptions {
    /// Run during the capture phase instead of the bubble phase.
    pub capture: bool,
    /// Remove the listener after it runs once.
    pub once: bool,
    /// `prevent_default` is ignored inside this listener.
    pub passive: bool,
}

impl ListenerOptions {
    pub fn capture(mut self, capture: bool) -> Self {
        self.capture = capture;
        self
    }

    pub fn once(mut self, once: bool) -> Self {
        self.once = once;
        self
    }

    pub fn passive(mut self, passive: bool) -> Self {
        self.passive = passive;
        self
    }
}

#[derive(Clone)]
pub(crate) struct NativeListener {
    pub(crate) id: ListenerId,
    pub(crate) event: String,
    pub(crate) callback: EventCallback,
    pub(crate) options: ListenerOptions,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn custom_events_bubble_and_cancel() {
        let event = Event::custom("ping", json!({"n": 1}));
        assert!(event.does_bubble());
        assert!(event.is_cancelable());
        assert_eq!(event.detail(), &json!({"n": 1}));

        event.prevent_default();
        assert!(event.default_prevented());
    }

    #[test]
    fn prevent_default_needs_cancelable() {
        let event = Event::new("plain");
        event.prevent_default();
        assert!(!event.default_prevented());
    }

    #[test]
    fn passive_listeners_cannot_prevent_default() {
        let event = Event::custom("scroll", Value::Null);
        event.set_passive(true);
        event.prevent_default();
        assert!(!event.default_prevented());
        event.set_passive(false);
        event.prevent_default();
        assert!(event.default_prevented());
    }

    #[test]
    fn immediate_stop_implies_stop() {
        let event = Event::new("x");
        event.stop_immediate_propagation();
        assert!(event.propagation_stopped());
        assert!(event.immediate_propagation_stopped());
    }
}
