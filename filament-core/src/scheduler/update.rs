//! Update Scheduler
//!
//! The scheduler decides when and in what order change sets are written to
//! the document.
//!
//! # Algorithm
//!
//! 1. `schedule_update` stores one pending task per node. A later request for
//!    the same node replaces the earlier one.
//! 2. Every request (re)schedules a single frame callback, so there is at
//!    most one flush per frame.
//! 3. The flush takes the whole pending map, stable-sorts it by
//!    `(priority rank, arrival)` and applies each task:
//!    - every registered handler whose selector matches the node runs,
//!    - if none matches, the default handler writes the change set,
//!    - an `updated` event is dispatched from the node.
//! 4. Requests made while flushing land in the pending map for the next
//!    frame.
//!
//! Batch mode defers requests until the outermost `end_batch`, then merges
//! them per node into one task each.
//!
//! # Feedback Guard
//!
//! Applying an update mutates the document, which the observation layer
//! reports back as `update` events, which commonly schedule another update
//! for the same node. Each node therefore carries a cascade depth. A request
//! made by the frame callback that last applied the node (from a handler, an
//! `updated` listener, or the microtask checkpoint that follows the
//! callback) deepens the cascade. Any other request, including one from a
//! later callback in the same frame, resets it. Requests beyond
//! `cascade_limit` are dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::config::SchedulerConfig;
use crate::dom::event::names;
use crate::dom::{Document, Event, NodeId, Selector};
use crate::error::{HandlerError, SelectorError};
use crate::runtime::isolate::isolate;
use crate::runtime::FrameId;

use super::change_set::ChangeSet;
use super::task::{Priority, UpdateTask};

/// A custom update handler.
pub type UpdateHandler = Arc<dyn Fn(&Document, NodeId, &ChangeSet) -> Result<(), HandlerError> + Send + Sync>;

/// Identifies a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl HandlerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy)]
struct Cascade {
    /// Frame callback that last applied the node.
    task: Option<u64>,
    depth: u32,
}

struct SchedulerState {
    pending: IndexMap<NodeId, UpdateTask>,
    batch_depth: usize,
    batch_queue: Vec<(NodeId, ChangeSet, Priority)>,
    frame: Option<FrameId>,
    handlers: Vec<(HandlerId, Selector, UpdateHandler)>,
    cascades: HashMap<NodeId, Cascade>,
    next_sequence: u64,
}

struct SchedulerInner {
    document: Document,
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
}

/// Coalesces, orders and applies document writes.
///
/// Cloning yields another handle to the same scheduler.
#[derive(Clone)]
pub struct UpdateScheduler {
    inner: Arc<SchedulerInner>,
}

impl UpdateScheduler {
    pub fn new(document: Document, config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                document,
                config,
                state: Mutex::new(SchedulerState {
                    pending: IndexMap::new(),
                    batch_depth: 0,
                    batch_queue: Vec::new(),
                    frame: None,
                    handlers: Vec::new(),
                    cascades: HashMap::new(),
                    next_sequence: 0,
                }),
            }),
        }
    }

    pub fn document(&self) -> &Document {
        &self.inner.document
    }

    /// Request `change_set` for `node` at `priority`.
    ///
    /// Returns `false` when the request was dropped by the feedback guard.
    pub fn schedule_update(&self, node: NodeId, change_set: ChangeSet, priority: Priority) -> bool {
        let task = self.inner.document.event_loop().current_task();
        let mut state = self.inner.state.lock();

        if let Some(cascade) = state.cascades.get_mut(&node) {
            if task.is_some() && cascade.task == task {
                cascade.depth += 1;
                if cascade.depth > self.inner.config.cascade_limit {
                    tracing::warn!(
                        node = %node,
                        depth = cascade.depth,
                        limit = self.inner.config.cascade_limit,
                        "update cascade limit exceeded; dropping request"
                    );
                    return false;
                }
            } else {
                cascade.depth = 0;
            }
        }

        if state.batch_depth > 0 {
            state.batch_queue.push((node, change_set, priority));
            return true;
        }

        Self::enqueue(&mut state, node, change_set, priority);
        tracing::debug!(node = %node, ?priority, pending = state.pending.len(), "update scheduled");
        drop(state);

        self.request_flush();
        true
    }

    /// Enter batch mode. Batches nest.
    pub fn start_batch(&self) {
        self.inner.state.lock().batch_depth += 1;
    }

    /// Leave batch mode. The outermost call merges the queued requests per
    /// node and schedules a flush.
    pub fn end_batch(&self) {
        let mut state = self.inner.state.lock();
        match state.batch_depth {
            0 => {
                tracing::warn!("end_batch called outside a batch");
                return;
            }
            1 => state.batch_depth = 0,
            _ => {
                state.batch_depth -= 1;
                return;
            }
        }

        let queued = std::mem::take(&mut state.batch_queue);
        if queued.is_empty() {
            return;
        }

        let mut grouped: IndexMap<NodeId, (ChangeSet, Priority)> = IndexMap::new();
        for (node, change_set, priority) in queued {
            match grouped.get_mut(&node) {
                Some((merged, merged_priority)) => {
                    merged.merge(change_set);
                    *merged_priority = merged_priority.most_urgent(priority);
                }
                None => {
                    grouped.insert(node, (change_set, priority));
                }
            }
        }

        tracing::debug!(nodes = grouped.len(), "batch closed");
        for (node, (change_set, priority)) in grouped {
            Self::enqueue(&mut state, node, change_set, priority);
        }
        drop(state);

        self.request_flush();
    }

    /// Run `f` inside a batch.
    pub fn batch<R>(&self, f: impl FnOnce(&UpdateScheduler) -> R) -> R {
        struct Guard<'a>(&'a UpdateScheduler);

        impl Drop for Guard<'_> {
            fn drop(&mut self) {
                self.0.end_batch();
            }
        }

        self.start_batch();
        let guard = Guard(self);
        f(guard.0)
    }

    /// Whether a batch is open.
    pub fn in_batch(&self) -> bool {
        self.inner.state.lock().batch_depth > 0
    }

    /// Apply `change_set` now, bypassing the pending map.
    pub fn update_immediate(&self, node: NodeId, change_set: ChangeSet) {
        self.apply_update(node, &change_set);
    }

    /// Apply every pending task in priority order. Returns the number of
    /// tasks taken from the pending map.
    pub fn flush(&self) -> usize {
        let (mut tasks, frame) = {
            let mut state = self.inner.state.lock();
            let tasks: Vec<UpdateTask> = std::mem::take(&mut state.pending).into_values().collect();
            (tasks, state.frame.take())
        };
        if let Some(frame) = frame {
            self.inner.document.event_loop().cancel_frame(frame);
        }
        if tasks.is_empty() {
            return 0;
        }

        tasks.sort_by_key(UpdateTask::order_key);
        tracing::debug!(tasks = tasks.len(), "flushing updates");

        for task in &tasks {
            self.apply_update(task.node, &task.change_set);
        }

        let document = &self.inner.document;
        self.inner
            .state
            .lock()
            .cascades
            .retain(|node, _| document.exists(*node));

        tasks.len()
    }

    /// Run the handlers for `node`, or the default handler if none match,
    /// then dispatch `updated` from the node.
    pub fn apply_update(&self, node: NodeId, change_set: &ChangeSet) {
        let document = &self.inner.document;
        if !document.exists(node) {
            tracing::debug!(node = %node, "skipping update for removed node");
            return;
        }

        let task = document.event_loop().current_task();
        let handlers: Vec<UpdateHandler> = {
            let mut state = self.inner.state.lock();
            state
                .cascades
                .entry(node)
                .and_modify(|c| c.task = task)
                .or_insert(Cascade { task, depth: 0 });
            state
                .handlers
                .iter()
                .filter(|(_, selector, _)| document.matches(node, selector))
                .map(|(_, _, handler)| handler.clone())
                .collect()
        };

        if handlers.is_empty() {
            if let Err(err) = change_set.apply(document, node) {
                tracing::error!(node = %node, error = %err, "default update handler failed");
            }
        } else {
            for handler in handlers {
                if let Some(Err(err)) = isolate("update handler", || handler(document, node, change_set)) {
                    tracing::error!(node = %node, error = %err, "update handler failed");
                }
            }
        }

        let detail = serde_json::to_value(change_set).unwrap_or_default();
        if let Err(err) = document.dispatch_event(node, &Event::custom(names::UPDATED, detail)) {
            tracing::debug!(node = %node, error = %err, "could not dispatch updated event");
        }
    }

    /// Register a handler for nodes matching `selector`.
    pub fn register_handler<F>(&self, selector: &str, handler: F) -> Result<HandlerId, SelectorError>
    where
        F: Fn(&Document, NodeId, &ChangeSet) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let selector = Selector::parse(selector)?;
        let id = HandlerId::new();
        self.inner
            .state
            .lock()
            .handlers
            .push((id, selector, Arc::new(handler)));
        Ok(id)
    }

    /// Remove a handler. Returns false if it was not registered.
    pub fn unregister_handler(&self, id: HandlerId) -> bool {
        let mut state = self.inner.state.lock();
        let before = state.handlers.len();
        state.handlers.retain(|(handler_id, _, _)| *handler_id != id);
        state.handlers.len() != before
    }

    /// Pending tasks in flush order.
    pub fn scheduled_updates(&self) -> Vec<UpdateTask> {
        let mut tasks: Vec<UpdateTask> = self.inner.state.lock().pending.values().cloned().collect();
        tasks.sort_by_key(UpdateTask::order_key);
        tasks
    }

    /// Number of nodes with a pending update.
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Drop every pending task and cancel the pending flush.
    pub fn clear_updates(&self) {
        let frame = {
            let mut state = self.inner.state.lock();
            state.pending.clear();
            state.batch_queue.clear();
            state.frame.take()
        };
        if let Some(frame) = frame {
            self.inner.document.event_loop().cancel_frame(frame);
        }
    }

    fn enqueue(state: &mut SchedulerState, node: NodeId, change_set: ChangeSet, priority: Priority) {
        state.next_sequence += 1;
        let task = UpdateTask {
            node,
            change_set,
            priority,
            timestamp: Instant::now(),
            sequence: state.next_sequence,
        };
        state.pending.shift_remove(&node);
        state.pending.insert(node, task);
    }

    /// Cancel any pending flush callback and request a new one.
    fn request_flush(&self) {
        let event_loop = self.inner.document.event_loop();
        let previous = self.inner.state.lock().frame.take();
        if let Some(previous) = previous {
            event_loop.cancel_frame(previous);
        }

        let weak: Weak<SchedulerInner> = Arc::downgrade(&self.inner);
        let id = event_loop.request_frame(move |time| {
            if let Some(inner) = weak.upgrade() {
                let scheduler = UpdateScheduler { inner };
                scheduler.inner.state.lock().frame = None;
                tracing::trace!(frame = time.frame, "scheduled flush");
                scheduler.flush();
            }
        });
        self.inner.state.lock().frame = Some(id);
    }
}

impl std::fmt::Debug for UpdateScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("UpdateScheduler")
            .field("pending", &state.pending.len())
            .field("handlers", &state.handlers.len())
            .field("batch_depth", &state.batch_depth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::EventLoop;
    use parking_lot::Mutex as PlMutex;

    fn setup() -> (EventLoop, Document, UpdateScheduler) {
        let event_loop = EventLoop::new();
        let document = Document::new(event_loop.clone());
        let scheduler = UpdateScheduler::new(document.clone(), SchedulerConfig::default());
        (event_loop, document, scheduler)
    }

    #[test]
    fn scheduled_update_applies_on_next_frame() {
        let (event_loop, doc, scheduler) = setup();
        let node = doc.create_element("span");

        scheduler.schedule_update(node, ChangeSet::new().text("hi"), Priority::Normal);
        assert_eq!(doc.text_content(node).unwrap(), "");
        assert_eq!(scheduler.pending_count(), 1);

        event_loop.run_frame();
        assert_eq!(doc.text_content(node).unwrap(), "hi");
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn later_request_replaces_earlier() {
        let (event_loop, doc, scheduler) = setup();
        let node = doc.create_element("span");

        scheduler.schedule_update(node, ChangeSet::new().text("a").class("x", true), Priority::Normal);
        scheduler.schedule_update(node, ChangeSet::new().text("b"), Priority::Normal);
        event_loop.run_frame();

        assert_eq!(doc.text_content(node).unwrap(), "b");
        assert!(!doc.has_class(node, "x").unwrap());
    }

    #[test]
    fn requests_coalesce_into_one_frame_callback() {
        let (event_loop, doc, scheduler) = setup();
        let a = doc.create_element("a");
        let b = doc.create_element("b");

        scheduler.schedule_update(a, ChangeSet::new().text("1"), Priority::Normal);
        scheduler.schedule_update(b, ChangeSet::new().text("2"), Priority::Normal);

        assert_eq!(event_loop.pending_frames(), 1);
        assert_eq!(event_loop.run_frame(), 1);
    }

    #[test]
    fn priority_orders_the_flush() {
        let (event_loop, doc, scheduler) = setup();
        let order = Arc::new(PlMutex::new(Vec::new()));
        let nodes: Vec<NodeId> = ["low", "normal", "critical", "high"]
            .iter()
            .map(|id| {
                let node = doc.create_element("div");
                doc.set_attribute(node, "id", id).unwrap();
                node
            })
            .collect();

        let sink = order.clone();
        scheduler
            .register_handler("div", move |doc, node, _| {
                sink.lock().push(doc.get_attribute(node, "id")?.unwrap_or_default());
                Ok(())
            })
            .unwrap();

        let priorities = [Priority::Low, Priority::Normal, Priority::Critical, Priority::High];
        for (node, priority) in nodes.iter().zip(priorities) {
            scheduler.schedule_update(*node, ChangeSet::new(), priority);
        }
        let planned: Vec<Priority> = scheduler.scheduled_updates().iter().map(|t| t.priority).collect();
        assert_eq!(planned, [Priority::Critical, Priority::High, Priority::Normal, Priority::Low]);

        event_loop.run_frame();
        assert_eq!(*order.lock(), ["critical", "high", "normal", "low"]);
    }

    #[test]
    fn batch_merges_per_node() {
        let (event_loop, doc, scheduler) = setup();
        let node = doc.create_element("div");
        let applied = Arc::new(PlMutex::new(Vec::new()));
        let sink = applied.clone();
        scheduler
            .register_handler("*", move |_, _, set| {
                sink.lock().push(set.clone());
                Ok(())
            })
            .unwrap();

        scheduler.batch(|s| {
            s.schedule_update(node, ChangeSet::new().text("a"), Priority::Low);
            s.schedule_update(node, ChangeSet::new().class("x", true), Priority::High);
            assert_eq!(s.pending_count(), 0);
        });

        let tasks = scheduler.scheduled_updates();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].priority, Priority::High);

        event_loop.run_frame();
        let applied = applied.lock();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0], ChangeSet::new().text("a").class("x", true));
    }

    #[test]
    fn nested_batches_flush_at_outermost_end() {
        let (_, doc, scheduler) = setup();
        let node = doc.create_element("div");

        scheduler.start_batch();
        scheduler.start_batch();
        scheduler.schedule_update(node, ChangeSet::new().text("x"), Priority::Normal);
        scheduler.end_batch();
        assert!(scheduler.in_batch());
        assert_eq!(scheduler.pending_count(), 0);
        scheduler.end_batch();
        assert_eq!(scheduler.pending_count(), 1);

        scheduler.end_batch();
        assert!(!scheduler.in_batch());
    }

    #[test]
    fn failing_handler_does_not_block_others() {
        let (event_loop, doc, scheduler) = setup();
        let first = doc.create_element("div");
        let second = doc.create_element("div");
        let seen = Arc::new(AtomicU64::new(0));

        scheduler
            .register_handler("div", |_, _, _| Err(HandlerError::new("nope")))
            .unwrap();
        scheduler
            .register_handler("div", |_, _, _| panic!("handler panic"))
            .unwrap();
        let counter = seen.clone();
        scheduler
            .register_handler("div", move |_, _, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        scheduler.schedule_update(first, ChangeSet::new(), Priority::Normal);
        scheduler.schedule_update(second, ChangeSet::new(), Priority::Normal);
        event_loop.run_frame();

        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unregistered_handler_falls_back_to_default() {
        let (_, doc, scheduler) = setup();
        let node = doc.create_element("p");
        let id = scheduler.register_handler("p", |_, _, _| Ok(())).unwrap();

        scheduler.update_immediate(node, ChangeSet::new().text("ignored"));
        assert_eq!(doc.text_content(node).unwrap(), "");

        assert!(scheduler.unregister_handler(id));
        assert!(!scheduler.unregister_handler(id));
        scheduler.update_immediate(node, ChangeSet::new().text("applied"));
        assert_eq!(doc.text_content(node).unwrap(), "applied");
    }

    #[test]
    fn updated_event_carries_the_change_set() {
        let (_, doc, scheduler) = setup();
        let node = doc.create_element("p");
        doc.append_child(doc.body(), node).unwrap();
        let details = Arc::new(PlMutex::new(Vec::new()));
        let sink = details.clone();
        doc.add_event_listener(
            doc.body(),
            names::UPDATED,
            Arc::new(move |event: &Event| sink.lock().push(event.detail().clone())),
            Default::default(),
        )
        .unwrap();

        scheduler.update_immediate(node, ChangeSet::new().text("x"));
        assert_eq!(*details.lock(), [serde_json::json!({"text": "x"})]);
    }

    #[test]
    fn clear_updates_cancels_the_flush() {
        let (event_loop, doc, scheduler) = setup();
        let node = doc.create_element("p");
        scheduler.schedule_update(node, ChangeSet::new().text("x"), Priority::Normal);

        scheduler.clear_updates();
        assert!(scheduler.scheduled_updates().is_empty());
        assert_eq!(event_loop.pending_frames(), 0);
        event_loop.run_frame();
        assert_eq!(doc.text_content(node).unwrap(), "");
    }

    #[test]
    fn requests_during_flush_go_to_next_frame() {
        let (event_loop, doc, scheduler) = setup();
        let a = doc.create_element("a");
        let b = doc.create_element("b");
        let handle = scheduler.clone();
        scheduler
            .register_handler("a", move |doc, node, set| {
                set.apply(doc, node)?;
                handle.schedule_update(b, ChangeSet::new().text("from a"), Priority::Normal);
                Ok(())
            })
            .unwrap();

        scheduler.schedule_update(a, ChangeSet::new().text("a"), Priority::Normal);
        event_loop.run_frame();
        assert_eq!(doc.text_content(b).unwrap(), "");
        assert_eq!(scheduler.pending_count(), 1);

        event_loop.run_frame();
        assert_eq!(doc.text_content(b).unwrap(), "from a");
    }

    #[test]
    fn cascade_guard_drops_echoes() {
        let event_loop = EventLoop::new();
        let doc = Document::new(event_loop.clone());
        let scheduler = UpdateScheduler::new(doc.clone(), SchedulerConfig { cascade_limit: 2 });
        let node = doc.create_element("p");

        let accepted = Arc::new(PlMutex::new(Vec::new()));
        let (handle, sink) = (scheduler.clone(), accepted.clone());
        scheduler
            .register_handler("p", move |_, node, _| {
                sink.lock()
                    .push(handle.schedule_update(node, ChangeSet::new(), Priority::Normal));
                Ok(())
            })
            .unwrap();

        scheduler.schedule_update(node, ChangeSet::new(), Priority::Normal);
        let frames = event_loop.run_until_idle(10);

        assert_eq!(*accepted.lock(), [true, true, false]);
        assert_eq!(frames, 3);

        // Requests from outside a frame start a fresh cascade.
        assert!(scheduler.schedule_update(node, ChangeSet::new(), Priority::Normal));
    }

    fn animate(event_loop: EventLoop, scheduler: UpdateScheduler, node: NodeId, log: Arc<PlMutex<Vec<bool>>>, remaining: usize) {
        if remaining == 0 {
            return;
        }
        let next_loop = event_loop.clone();
        event_loop.request_frame(move |time| {
            let text = ChangeSet::new().text(time.frame.to_string());
            log.lock().push(scheduler.schedule_update(node, text, Priority::Normal));
            animate(next_loop, scheduler, node, log, remaining - 1);
        });
    }

    #[test]
    fn per_frame_writers_are_never_throttled() {
        let (event_loop, doc, scheduler) = setup();
        let node = doc.create_element("p");
        let accepted = Arc::new(PlMutex::new(Vec::new()));

        animate(event_loop.clone(), scheduler.clone(), node, accepted.clone(), 30);
        event_loop.run_until_idle(100);

        let accepted = accepted.lock();
        assert_eq!(accepted.len(), 30);
        assert!(accepted.iter().all(|ok| *ok));
        assert_eq!(doc.text_content(node).unwrap(), "30");
    }

    #[test]
    fn removed_nodes_are_skipped() {
        let (event_loop, doc, scheduler) = setup();
        let node = doc.create_element("p");
        scheduler.schedule_update(node, ChangeSet::new().text("x"), Priority::Normal);
        doc.destroy(node).unwrap();

        assert_eq!(scheduler.flush(), 1);
        assert_eq!(event_loop.pending_frames(), 0);
    }

    #[test]
    fn invalid_handler_selector_is_rejected() {
        let (_, _, scheduler) = setup();
        assert!(scheduler.register_handler("div[", |_, _, _| Ok(())).is_err());
    }
}
