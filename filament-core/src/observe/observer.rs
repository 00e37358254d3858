//! Reactive Observer
//!
//! Watches document nodes for mutations and turns them into semantic events.
//!
//! # How It Works
//!
//! 1. `make_reactive` attaches one native observer per concern (attributes,
//!    content, children) and keeps the handles per node.
//!
//! 2. When the document delivers mutation records, the observer:
//!    a. Dispatches a semantic event from the owning node
//!       (`attribute-change`, `content-change`, `child-added`,
//!       `child-removed`)
//!    b. Adds the owning node to the intent queue
//!    c. Cleans up nodes reported as removed
//!
//! 3. The intent queue drains in a microtask. Each queued node receives one
//!    `update` event no matter how many records it produced.
//!
//! The observer never writes to the document itself.

use std::sync::{Arc, Weak};

use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use smallvec::SmallVec;

use crate::dom::event::names;
use crate::dom::{Document, Event, MutationKind, MutationRecord, NodeId, NodeKind, ObserverOptions};
use crate::error::DomError;

use super::handle::{Concern, ObservationHandle};

type Handles = SmallVec<[ObservationHandle; 4]>;

/// Which concerns `make_reactive` attaches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactiveOptions {
    pub attributes: bool,
    /// Only report these attribute names.
    pub attribute_filter: Option<Vec<String>>,
    pub content: bool,
    pub children: bool,
    /// Also report child-list changes below the node's direct children.
    pub deep_children: bool,
}

impl Default for ReactiveOptions {
    fn default() -> Self {
        Self {
            attributes: true,
            attribute_filter: None,
            content: true,
            children: true,
            deep_children: false,
        }
    }
}

impl ReactiveOptions {
    pub fn with_attribute_filter<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attribute_filter = Some(names.into_iter().map(Into::into).collect());
        self
    }
}

#[derive(Default)]
struct ObserverState {
    tracked: IndexMap<NodeId, Handles>,
    intents: IndexSet<NodeId>,
    drain_scheduled: bool,
}

struct ObserverInner {
    document: Document,
    state: Mutex<ObserverState>,
}

/// The document observation layer.
///
/// Cloning yields another handle to the same observer.
#[derive(Clone)]
pub struct ReactiveObserver {
    inner: Arc<ObserverInner>,
}

impl ReactiveObserver {
    pub fn new(document: Document) -> Self {
        Self {
            inner: Arc::new(ObserverInner {
                document,
                state: Mutex::new(ObserverState::default()),
            }),
        }
    }

    /// Start watching `node`. Calling this on a node that is already
    /// reactive does nothing.
    pub fn make_reactive(&self, node: NodeId, options: &ReactiveOptions) -> Result<(), DomError> {
        if self.is_reactive(node) {
            return Ok(());
        }
        self.inner.document.kind(node)?;

        let mut handles = Handles::new();
        if options.attributes {
            let native = ObserverOptions::attributes().with_attribute_filter(options.attribute_filter.clone());
            handles.push(self.attach(node, Concern::Attributes, native)?);
        }
        if options.content {
            handles.push(self.attach(node, Concern::Content, ObserverOptions::character_data().with_subtree(true))?);
        }
        if options.children {
            let native = ObserverOptions::child_list().with_subtree(options.deep_children);
            handles.push(self.attach(node, Concern::Children, native)?);
        }

        tracing::debug!(node = %node, handles = handles.len(), "node made reactive");
        self.inner.state.lock().tracked.insert(node, handles);
        Ok(())
    }

    /// Make `root` and every element below it reactive, and keep doing so
    /// for elements added later.
    pub fn make_reactive_subtree(&self, root: NodeId, options: &ReactiveOptions) -> Result<(), DomError> {
        self.make_reactive(root, options)?;
        for node in self.inner.document.descendants(root) {
            if self.inner.document.kind(node)? == NodeKind::Element {
                self.make_reactive(node, options)?;
            }
        }

        let weak = Arc::downgrade(&self.inner);
        let subtree_options = options.clone();
        let observer = self.inner.document.observe(
            root,
            ObserverOptions::child_list().with_subtree(true),
            move |records| {
                if let Some(observer) = upgrade(&weak) {
                    observer.adopt_added(records, &subtree_options);
                }
            },
        )?;
        let handle = ObservationHandle::new(self.inner.document.clone(), root, Concern::Descendants, observer);

        if let Some(handles) = self.inner.state.lock().tracked.get_mut(&root) {
            handles.push(handle);
        }
        Ok(())
    }

    /// Disconnect every handle of `node` and forget it. Returns `false` if
    /// the node was not reactive.
    pub fn cleanup_element(&self, node: NodeId) -> bool {
        let handles = {
            let mut state = self.inner.state.lock();
            state.intents.shift_remove(&node);
            state.tracked.shift_remove(&node)
        };
        match handles {
            Some(handles) => {
                tracing::debug!(node = %node, handles = handles.len(), "reactive node cleaned up");
                drop(handles);
                true
            }
            None => false,
        }
    }

    /// Clean up every tracked node.
    pub fn cleanup_all(&self) {
        let tracked = {
            let mut state = self.inner.state.lock();
            state.intents.clear();
            std::mem::take(&mut state.tracked)
        };
        tracing::debug!(nodes = tracked.len(), "all reactive nodes cleaned up");
        drop(tracked);
    }

    /// Whether `node` is being observed.
    pub fn is_reactive(&self, node: NodeId) -> bool {
        self.inner.state.lock().tracked.contains_key(&node)
    }

    /// Number of observed nodes.
    pub fn tracked_count(&self) -> usize {
        self.inner.state.lock().tracked.len()
    }

    /// Number of live handles on `node`.
    pub fn handle_count(&self, node: NodeId) -> usize {
        self.inner
            .state
            .lock()
            .tracked
            .get(&node)
            .map_or(0, |handles| handles.len())
    }

    /// Concerns currently watched on `node`.
    pub fn concerns(&self, node: NodeId) -> Vec<Concern> {
        self.inner
            .state
            .lock()
            .tracked
            .get(&node)
            .map(|handles| handles.iter().map(ObservationHandle::concern).collect())
            .unwrap_or_default()
    }

    /// Nodes waiting for their `update` event.
    pub fn pending_intents(&self) -> Vec<NodeId> {
        self.inner.state.lock().intents.iter().copied().collect()
    }

    fn attach(&self, node: NodeId, concern: Concern, native: ObserverOptions) -> Result<ObservationHandle, DomError> {
        let weak = Arc::downgrade(&self.inner);
        let id = self.inner.document.observe(node, native, move |records| {
            if let Some(observer) = upgrade(&weak) {
                observer.handle_records(node, concern, records);
            }
        })?;
        Ok(ObservationHandle::new(self.inner.document.clone(), node, concern, id))
    }

    fn handle_records(&self, owner: NodeId, concern: Concern, records: &[MutationRecord]) {
        let document = &self.inner.document;
        tracing::trace!(node = %owner, ?concern, records = records.len(), "mutation records received");

        for record in records {
            if !self.is_reactive(owner) {
                return;
            }

            match record.kind {
                MutationKind::Attributes => {
                    let Some(name) = record.attribute_name.as_deref() else {
                        continue;
                    };
                    let value = document.get_attribute(record.target, name).ok().flatten();
                    self.emit(
                        owner,
                        names::ATTRIBUTE_CHANGE,
                        json!({
                            "attribute": name,
                            "old_value": record.old_value,
                            "value": value,
                            "target": record.target.raw(),
                        }),
                    );
                }
                MutationKind::CharacterData => {
                    let value = document.text_content(record.target).ok();
                    self.emit(
                        owner,
                        names::CONTENT_CHANGE,
                        json!({
                            "old_value": record.old_value,
                            "value": value,
                            "target": record.target.raw(),
                        }),
                    );
                }
                MutationKind::ChildList => {
                    for child in &record.added_nodes {
                        self.emit(owner, names::CHILD_ADDED, json!({ "child": child.raw() }));
                    }
                    for child in &record.removed_nodes {
                        self.emit(owner, names::CHILD_REMOVED, json!({ "child": child.raw() }));
                        self.cleanup_removed(*child);
                    }
                }
            }

            if self.is_reactive(owner) {
                self.enqueue_intent(owner);
            }
        }
    }

    /// Clean up `removed` and every tracked node inside it.
    fn cleanup_removed(&self, removed: NodeId) {
        let document = &self.inner.document;
        let doomed: Vec<NodeId> = {
            let state = self.inner.state.lock();
            state
                .tracked
                .keys()
                .copied()
                .filter(|node| *node == removed || !document.exists(*node) || document.is_inclusive_ancestor(removed, *node))
                .collect()
        };
        for node in doomed {
            self.cleanup_element(node);
        }
    }

    fn adopt_added(&self, records: &[MutationRecord], options: &ReactiveOptions) {
        let document = &self.inner.document;
        for added in records.iter().flat_map(|r| r.added_nodes.iter().copied()) {
            let subtree = std::iter::once(added).chain(document.descendants(added));
            for node in subtree {
                if matches!(document.kind(node), Ok(NodeKind::Element)) {
                    if let Err(err) = self.make_reactive(node, options) {
                        tracing::debug!(node = %node, error = %err, "could not adopt added node");
                    }
                }
            }
        }
    }

    fn enqueue_intent(&self, node: NodeId) {
        let schedule = {
            let mut state = self.inner.state.lock();
            state.intents.insert(node);
            !std::mem::replace(&mut state.drain_scheduled, true)
        };
        if schedule {
            let weak = Arc::downgrade(&self.inner);
            self.inner.document.event_loop().queue_microtask(move || {
                if let Some(observer) = upgrade(&weak) {
                    observer.drain_intents();
                }
            });
        }
    }

    fn drain_intents(&self) {
        let nodes = {
            let mut state = self.inner.state.lock();
            state.drain_scheduled = false;
            std::mem::take(&mut state.intents)
        };
        tracing::debug!(nodes = nodes.len(), "draining update intents");

        for node in nodes {
            if self.is_reactive(node) && self.inner.document.exists(node) {
                self.emit(node, names::UPDATE, json!({ "node": node.raw() }));
            }
        }
    }

    fn emit(&self, node: NodeId, name: &str, detail: serde_json::Value) {
        if let Err(err) = self.inner.document.dispatch_event(node, &Event::custom(name, detail)) {
            tracing::debug!(node = %node, event = name, error = %err, "semantic event not dispatched");
        }
    }
}

fn upgrade(weak: &Weak<ObserverInner>) -> Option<ReactiveObserver> {
    weak.upgrade().map(|inner| ReactiveObserver { inner })
}

impl std::fmt::Debug for ReactiveObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ReactiveObserver")
            .field("tracked", &state.tracked.len())
            .field("intents", &state.intents.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::EventLoop;
    use serde_json::Value;

    struct Fixture {
        event_loop: EventLoop,
        doc: Document,
        observer: ReactiveObserver,
        events: Arc<Mutex<Vec<(String, Option<NodeId>, Value)>>>,
    }

    impl Fixture {
        fn new() -> Self {
            let event_loop = EventLoop::new();
            let doc = Document::new(event_loop.clone());
            let observer = ReactiveObserver::new(doc.clone());
            Self {
                event_loop,
                doc,
                observer,
                events: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn element(&self, tag: &str) -> NodeId {
            let node = self.doc.create_element(tag);
            self.doc.append_child(self.doc.body(), node).unwrap();
            node
        }

        fn record(&self, node: NodeId, names: &[&str]) {
            for name in names {
                let sink = self.events.clone();
                self.doc
                    .add_event_listener(
                        node,
                        name,
                        Arc::new(move |event: &Event| {
                            // Only the node's own events, not bubbled ones.
                            if event.current_target() == event.target() {
                                sink.lock()
                                    .push((event.name().to_string(), event.target(), event.detail().clone()));
                            }
                        }),
                        Default::default(),
                    )
                    .unwrap();
            }
        }

        fn names(&self) -> Vec<String> {
            self.events.lock().iter().map(|(n, _, _)| n.clone()).collect()
        }
    }

    const ALL: [&str; 5] = [
        names::ATTRIBUTE_CHANGE,
        names::CONTENT_CHANGE,
        names::CHILD_ADDED,
        names::CHILD_REMOVED,
        names::UPDATE,
    ];

    #[test]
    fn attribute_change_then_one_update() {
        let f = Fixture::new();
        let node = f.element("div");
        f.observer.make_reactive(node, &ReactiveOptions::default()).unwrap();
        f.record(node, &ALL);

        f.doc.set_attribute(node, "title", "a").unwrap();
        f.doc.set_attribute(node, "title", "b").unwrap();
        f.event_loop.run_microtasks();

        assert_eq!(f.names(), ["attribute-change", "attribute-change", "update"]);
        let events = f.events.lock();
        assert_eq!(
            events[1].2,
            json!({"attribute": "title", "old_value": "a", "value": "b", "target": node.raw()})
        );
    }

    #[test]
    fn attribute_filter_limits_reports() {
        let f = Fixture::new();
        let node = f.element("div");
        let options = ReactiveOptions::default().with_attribute_filter(["data-x"]);
        f.observer.make_reactive(node, &options).unwrap();
        f.record(node, &ALL);

        f.doc.set_attribute(node, "title", "ignored").unwrap();
        f.event_loop.run_microtasks();
        assert!(f.names().is_empty());

        f.doc.set_attribute(node, "data-x", "1").unwrap();
        f.event_loop.run_microtasks();
        assert_eq!(f.names(), ["attribute-change", "update"]);
    }

    #[test]
    fn content_change_reports_text() {
        let f = Fixture::new();
        let node = f.element("p");
        f.doc.set_text_content(node, "old").unwrap();
        f.event_loop.run_microtasks();
        f.observer.make_reactive(node, &ReactiveOptions::default()).unwrap();
        f.record(node, &ALL);

        f.doc.set_text_content(node, "new").unwrap();
        f.event_loop.run_microtasks();

        assert_eq!(f.names(), ["content-change", "update"]);
        let detail = &f.events.lock()[0].2;
        assert_eq!(detail["old_value"], json!("old"));
        assert_eq!(detail["value"], json!("new"));
    }

    #[test]
    fn removed_children_are_cleaned_up() {
        let f = Fixture::new();
        let list = f.element("ul");
        let item = f.doc.create_element("li");
        let inner = f.doc.create_element("span");
        f.doc.append_child(list, item).unwrap();
        f.doc.append_child(item, inner).unwrap();
        f.event_loop.run_microtasks();

        f.observer.make_reactive_subtree(list, &ReactiveOptions::default()).unwrap();
        assert_eq!(f.observer.tracked_count(), 3);
        f.record(list, &ALL);

        f.doc.remove_child(list, item).unwrap();
        f.event_loop.run_microtasks();

        assert!(!f.observer.is_reactive(item));
        assert!(!f.observer.is_reactive(inner));
        assert!(f.observer.is_reactive(list));
        assert_eq!(f.names(), ["child-removed", "update"]);
        assert_eq!(f.events.lock()[0].2, json!({"child": item.raw()}));
    }

    #[test]
    fn subtree_adopts_added_elements() {
        let f = Fixture::new();
        let root = f.element("section");
        f.observer.make_reactive_subtree(root, &ReactiveOptions::default()).unwrap();
        assert_eq!(f.observer.concerns(root).last(), Some(&Concern::Descendants));

        let wrapper = f.doc.create_element("div");
        let leaf = f.doc.create_element("em");
        f.doc.append_child(wrapper, leaf).unwrap();
        f.doc.append_child(root, wrapper).unwrap();
        f.event_loop.run_microtasks();

        assert!(f.observer.is_reactive(wrapper));
        assert!(f.observer.is_reactive(leaf));

        f.record(leaf, &ALL);
        f.doc.set_attribute(leaf, "class", "x").unwrap();
        f.event_loop.run_microtasks();
        assert_eq!(f.names(), ["attribute-change", "update"]);
    }

    #[test]
    fn no_events_after_cleanup() {
        let f = Fixture::new();
        let node = f.element("div");
        f.observer.make_reactive(node, &ReactiveOptions::default()).unwrap();
        f.record(node, &ALL);

        f.doc.set_attribute(node, "a", "1").unwrap();
        assert!(f.observer.cleanup_element(node));
        assert!(!f.observer.cleanup_element(node));
        f.doc.set_attribute(node, "a", "2").unwrap();
        f.event_loop.run_microtasks();

        assert!(f.names().is_empty());
        assert_eq!(f.doc.observer_count(), 0);
        assert_eq!(f.observer.handle_count(node), 0);
    }

    #[test]
    fn cleanup_during_delivery_suppresses_later_records() {
        let f = Fixture::new();
        let node = f.element("div");
        f.observer.make_reactive(node, &ReactiveOptions::default()).unwrap();
        f.record(node, &ALL);

        let observer = f.observer.clone();
        f.doc
            .add_event_listener(
                node,
                names::ATTRIBUTE_CHANGE,
                Arc::new(move |event: &Event| {
                    if let Some(target) = event.target() {
                        observer.cleanup_element(target);
                    }
                }),
                Default::default(),
            )
            .unwrap();

        f.doc.set_attribute(node, "a", "1").unwrap();
        f.doc.set_attribute(node, "b", "1").unwrap();
        f.event_loop.run_microtasks();

        assert_eq!(f.names(), ["attribute-change"]);
    }

    #[test]
    fn make_reactive_is_idempotent_and_counts_handles() {
        let f = Fixture::new();
        let node = f.element("div");
        let options = ReactiveOptions {
            content: false,
            ..ReactiveOptions::default()
        };
        f.observer.make_reactive(node, &options).unwrap();
        f.observer.make_reactive(node, &options).unwrap();

        assert_eq!(f.observer.handle_count(node), 2);
        assert_eq!(f.observer.concerns(node), [Concern::Attributes, Concern::Children]);
        assert_eq!(f.doc.observer_count(), 2);

        f.observer.cleanup_all();
        assert_eq!(f.observer.tracked_count(), 0);
        assert_eq!(f.doc.observer_count(), 0);
    }

    #[test]
    fn unknown_node_is_an_error() {
        let f = Fixture::new();
        let node = f.doc.create_element("div");
        f.doc.destroy(node).unwrap();
        assert!(f.observer.make_reactive(node, &ReactiveOptions::default()).is_err());
    }
}
