//! Document
//!
//! The document is the single shared mutable resource of the engine: the
//! update scheduler writes to it, the observation layer watches it, and the
//! event registry dispatches through it.
//!
//! # Layout
//!
//! Nodes live in an arena indexed by [`NodeId`]. Every document owns a root
//! `body` element; nodes created with `create_element`/`create_text` start
//! detached and become part of the tree once appended.
//!
//! A node taken out of the tree (removed, or replaced by `set_inner_html` or
//! `set_text_content`) is freed with its subtree once the records of that
//! turn have been delivered, unless it was inserted somewhere again first.
//! Nodes that were never attached stay until they are destroyed.
//!
//! # Mutation delivery
//!
//! Every structural, attribute, or character-data write produces a
//! [`MutationRecord`] for each interested observer. Records are queued per
//! observer and delivered in one microtask on the document's event loop, so
//! observers always see the effect of a mutation before they hear about it.
//!
//! # Locking
//!
//! All state sits behind one `parking_lot` mutex. The lock is never held
//! while user code (observer callbacks, event listeners) runs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::error::{DomError, SelectorError};
use crate::runtime::isolate::isolate;
use crate::runtime::EventLoop;

use super::event::{Event, EventCallback, EventPhase, ListenerId, ListenerOptions, NativeListener};
use super::html::{self, Fragment};
use super::mutation::{MutationCallback, MutationRecord, ObserverId, ObserverOptions, Registration};
use super::node::{self, Node, NodeData, NodeKind};
use super::selector::{Selector, SelectorContext};
use super::NodeId;

type DomResult<T> = Result<T, DomError>;

struct DocState {
    nodes: HashMap<NodeId, Node>,
    body: NodeId,
    observers: IndexMap<ObserverId, Registration>,
    next_observer: u64,
    delivery_scheduled: bool,
    listeners: HashMap<NodeId, Vec<NativeListener>>,
    next_listener: u64,
    /// Roots taken out of the tree since the last delivery.
    detached: Vec<NodeId>,
}

impl DocState {
    fn node(&self, id: NodeId) -> DomResult<&Node> {
        self.nodes.get(&id).ok_or(DomError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> DomResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(DomError::UnknownNode(id))
    }

    fn attribute_of(&self, id: NodeId, name: &str) -> DomResult<Option<&str>> {
        let node = self.node(id)?;
        let el = node.as_element().ok_or(DomError::NotAnElement(id))?;
        Ok(el.attributes.get(name).map(String::as_str))
    }

    fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes.get(&id).and_then(|n| n.parent);
        }
        false
    }

    fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self
            .nodes
            .get(&root)
            .map(|n| n.children.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(n) = self.nodes.get(&id) {
                stack.extend(n.children.iter().rev().copied());
            }
        }
        out
    }

    /// Detach `child` from its parent, returning the child-list record.
    fn detach(&mut self, child: NodeId) -> DomResult<Option<MutationRecord>> {
        let Some(parent) = self.node(child)?.parent else {
            return Ok(None);
        };
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.retain(|c| *c != child);
        }
        self.node_mut(child)?.parent = None;
        self.detached.push(child);
        Ok(Some(MutationRecord::child_list(parent, Vec::new(), vec![child])))
    }

    /// Remove `root` and its subtree from the arena, along with listeners
    /// and observers registered on them. Returns the freed ids.
    fn free_subtree(&mut self, root: NodeId) -> Vec<NodeId> {
        let mut doomed = self.descendants(root);
        doomed.push(root);
        for id in &doomed {
            self.nodes.remove(id);
            self.listeners.remove(id);
        }
        let set: HashSet<NodeId> = doomed.iter().copied().collect();
        self.observers.retain(|_, reg| !set.contains(&reg.target));
        doomed
    }

    /// Free every root in `detached` that is still out of the tree.
    fn sweep(&mut self, detached: &[NodeId]) -> usize {
        let mut freed = 0;
        for root in detached {
            let orphaned = *root != self.body && self.nodes.get(root).is_some_and(|n| n.parent.is_none());
            if orphaned {
                freed += self.free_subtree(*root).len();
            }
        }
        freed
    }

    /// Write an attribute without validation of the name.
    fn write_attribute(
        &mut self,
        id: NodeId,
        name: &str,
        value: Option<String>,
    ) -> DomResult<Option<MutationRecord>> {
        let node = self.node_mut(id)?;
        let el = node.as_element_mut().ok_or(DomError::NotAnElement(id))?;
        let old = match value {
            Some(value) => el.attributes.insert(name.to_string(), value),
            None => {
                let old = el.attributes.shift_remove(name);
                if old.is_none() {
                    return Ok(None);
                }
                old
            }
        };
        Ok(Some(MutationRecord::attribute(id, name, old)))
    }

    /// Replace every child of `parent` with `children` as one mutation.
    fn replace_children(&mut self, parent: NodeId, children: Vec<NodeId>) -> DomResult<MutationRecord> {
        let old = std::mem::take(&mut self.node_mut(parent)?.children);
        for child in &old {
            if let Some(n) = self.nodes.get_mut(child) {
                n.parent = None;
            }
        }
        self.detached.extend(old.iter().copied());
        for child in &children {
            self.node_mut(*child)?.parent = Some(parent);
        }
        self.node_mut(parent)?.children = children.clone();
        Ok(MutationRecord::child_list(parent, children, old))
    }

    fn build_fragment(&mut self, fragment: &Fragment) -> NodeId {
        match fragment {
            Fragment::Text(text) => {
                let node = Node::text(text);
                let id = node.id;
                self.nodes.insert(id, node);
                id
            }
            Fragment::Element {
                tag,
                attributes,
                children,
            } => {
                let mut node = Node::element(tag);
                let id = node.id;
                if let Some(el) = node.as_element_mut() {
                    el.attributes = attributes.iter().cloned().collect();
                }
                node.children = children.iter().map(|c| self.build_fragment(c)).collect();
                for child in &node.children {
                    if let Some(n) = self.nodes.get_mut(child) {
                        n.parent = Some(id);
                    }
                }
                self.nodes.insert(id, node);
                id
            }
        }
    }

    fn text_content(&self, id: NodeId) -> DomResult<String> {
        let node = self.node(id)?;
        Ok(match &node.data {
            NodeData::Text(text) => text.clone(),
            NodeData::Element(_) => self
                .descendants(id)
                .into_iter()
                .filter_map(|d| match &self.nodes.get(&d)?.data {
                    NodeData::Text(text) => Some(text.as_str()),
                    NodeData::Element(_) => None,
                })
                .collect(),
        })
    }

    fn serialize(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.nodes.get(&id) else { return };
        match &node.data {
            NodeData::Text(text) => out.push_str(&html::escape_text(text)),
            NodeData::Element(el) => {
                out.push('<');
                out.push_str(&el.tag);
                for (name, value) in &el.attributes {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&html::escape_attribute(value));
                    out.push('"');
                }
                out.push('>');
                if html::is_void(&el.tag) {
                    return;
                }
                for child in &node.children {
                    self.serialize(*child, out);
                }
                out.push_str("</");
                out.push_str(&el.tag);
                out.push('>');
            }
        }
    }

    /// Queue `record` on every interested observer. Returns whether a
    /// delivery microtask needs to be scheduled.
    fn enqueue(&mut self, record: MutationRecord) -> bool {
        let interested: Vec<ObserverId> = self
            .observers
            .iter()
            .filter(|(_, reg)| {
                let direct = reg.target == record.target;
                let related = direct || self.is_inclusive_ancestor(reg.target, record.target);
                related && reg.options.wants(&record, direct)
            })
            .map(|(id, _)| *id)
            .collect();

        if interested.is_empty() {
            return false;
        }
        for id in interested {
            if let Some(reg) = self.observers.get_mut(&id) {
                reg.queue.push(record.clone());
            }
        }
        if self.delivery_scheduled {
            false
        } else {
            self.delivery_scheduled = true;
            true
        }
    }

    fn matching_listeners(&self, node: NodeId, name: &str, phase: EventPhase) -> Vec<NativeListener> {
        self.listeners
            .get(&node)
            .map(|list| {
                list.iter()
                    .filter(|l| l.event == name)
                    .filter(|l| match phase {
                        EventPhase::Capturing => l.options.capture,
                        EventPhase::Bubbling => !l.options.capture,
                        _ => true,
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl SelectorContext for DocState {
    fn tag_name(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(&node)?.as_element().map(|el| el.tag.as_str())
    }

    fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        self.nodes
            .get(&node)?
            .as_element()?
            .attributes
            .get(name)
            .map(String::as_str)
    }

    fn parent_element(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(&node)?.parent
    }
}

struct DocumentInner {
    state: Mutex<DocState>,
    event_loop: EventLoop,
}

/// Handle to a shared document. Cloning yields another handle to the same
/// document.
#[derive(Clone)]
pub struct Document {
    inner: Arc<DocumentInner>,
}

impl Document {
    /// Create an empty document whose mutation records are delivered on
    /// `event_loop`.
    pub fn new(event_loop: EventLoop) -> Self {
        let body = Node::element("body");
        let body_id = body.id;
        let mut nodes = HashMap::new();
        nodes.insert(body_id, body);
        Self {
            inner: Arc::new(DocumentInner {
                state: Mutex::new(DocState {
                    nodes,
                    body: body_id,
                    observers: IndexMap::new(),
                    next_observer: 0,
                    delivery_scheduled: false,
                    listeners: HashMap::new(),
                    next_listener: 0,
                    detached: Vec::new(),
                }),
                event_loop,
            }),
        }
    }

    /// The event loop this document delivers records on.
    pub fn event_loop(&self) -> &EventLoop {
        &self.inner.event_loop
    }

    /// The root element.
    pub fn body(&self) -> NodeId {
        self.inner.state.lock().body
    }

    /// Number of live nodes, attached or not.
    pub fn len(&self) -> usize {
        self.inner.state.lock().nodes.len()
    }

    /// Always false: the root element always exists.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether the two handles refer to the same document.
    pub fn same_document(&self, other: &Document) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run a write against the state, then queue the records it produced.
    fn mutate<R>(
        &self,
        write: impl FnOnce(&mut DocState) -> DomResult<(R, Vec<MutationRecord>)>,
    ) -> DomResult<R> {
        let (result, schedule) = {
            let mut state = self.inner.state.lock();
            let (result, records) = write(&mut state)?;
            let mut schedule = false;
            for record in records {
                tracing::trace!(kind = ?record.kind, target = %record.target, "mutation");
                schedule |= state.enqueue(record);
            }
            if !state.detached.is_empty() && !state.delivery_scheduled {
                state.delivery_scheduled = true;
                schedule = true;
            }
            (result, schedule)
        };
        if schedule {
            let doc = self.clone();
            self.inner
                .event_loop
                .queue_microtask(move || doc.deliver_records());
        }
        Ok(result)
    }

    fn deliver_records(&self) {
        let (pending, detached): (Vec<ObserverId>, Vec<NodeId>) = {
            let mut state = self.inner.state.lock();
            state.delivery_scheduled = false;
            let pending = state
                .observers
                .iter()
                .filter(|(_, reg)| !reg.queue.is_empty())
                .map(|(id, _)| *id)
                .collect();
            (pending, std::mem::take(&mut state.detached))
        };

        for id in pending {
            // Taken one observer at a time: a callback may disconnect a later
            // observer, whose undelivered records must then be dropped.
            let batch: Option<(MutationCallback, Vec<MutationRecord>)> = {
                let mut state = self.inner.state.lock();
                state
                    .observers
                    .get_mut(&id)
                    .map(|reg| (reg.callback.clone(), std::mem::take(&mut reg.queue)))
            };
            if let Some((callback, records)) = batch {
                if !records.is_empty() {
                    isolate("mutation observer", || callback(&records));
                }
            }
        }

        if !detached.is_empty() {
            let freed = self.inner.state.lock().sweep(&detached);
            if freed > 0 {
                tracing::trace!(freed, "freed detached nodes");
            }
        }
    }

    // ------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------

    /// Create a detached element.
    pub fn create_element(&self, tag: &str) -> NodeId {
        let node = Node::element(tag);
        let id = node.id;
        self.inner.state.lock().nodes.insert(id, node);
        id
    }

    /// Create a detached text node.
    pub fn create_text(&self, data: &str) -> NodeId {
        let node = Node::text(data);
        let id = node.id;
        self.inner.state.lock().nodes.insert(id, node);
        id
    }

    /// Whether `node` exists in this document (attached or not).
    pub fn exists(&self, node: NodeId) -> bool {
        self.inner.state.lock().nodes.contains_key(&node)
    }

    /// Whether `node` is reachable from the root.
    pub fn is_connected(&self, node: NodeId) -> bool {
        let state = self.inner.state.lock();
        let body = state.body;
        state.is_inclusive_ancestor(body, node)
    }

    /// Whether `ancestor` is `node` or one of its ancestors.
    pub fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.inner.state.lock().is_inclusive_ancestor(ancestor, node)
    }

    /// Whether `node` is an element or a text node.
    pub fn kind(&self, node: NodeId) -> DomResult<NodeKind> {
        Ok(self.inner.state.lock().node(node)?.kind())
    }

    /// Lowercase tag of an element. `None` for text and missing nodes.
    pub fn tag_name(&self, node: NodeId) -> Option<String> {
        let state = self.inner.state.lock();
        state.tag_name(node).map(str::to_string)
    }

    /// Parent of `node`, if attached.
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.inner.state.lock().nodes.get(&node)?.parent
    }

    /// Children of `node` in order. Empty for missing nodes.
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.inner
            .state
            .lock()
            .nodes
            .get(&node)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    /// All descendants of `node` in document order, excluding `node`.
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        self.inner.state.lock().descendants(node)
    }

    /// Move `child` to the end of `parent`.
    pub fn append_child(&self, parent: NodeId, child: NodeId) -> DomResult<()> {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` into `parent` before `reference` (or at the end).
    ///
    /// A child that already has a parent is moved, producing a removal
    /// record on the old parent and an addition record on the new one.
    pub fn insert_before(&self, parent: NodeId, child: NodeId, reference: Option<NodeId>) -> DomResult<()> {
        self.mutate(|state| {
            if state.node(parent)?.as_element().is_none() {
                return Err(DomError::NotAnElement(parent));
            }
            state.node(child)?;
            if state.is_inclusive_ancestor(child, parent) {
                return Err(DomError::HierarchyRequest { parent, child });
            }

            // Inserting before itself means "where it already is".
            let mut reference = reference;
            if reference == Some(child) {
                let siblings = &state.node(parent)?.children;
                reference = siblings
                    .iter()
                    .position(|c| *c == child)
                    .and_then(|i| siblings.get(i + 1).copied());
            }
            if let Some(r) = reference {
                if state.node(r)?.parent != Some(parent) {
                    return Err(DomError::NotAChild { parent, reference: r });
                }
            }

            let mut records = Vec::new();
            if let Some(removed) = state.detach(child)? {
                records.push(removed);
            }
            let parent_node = state.node_mut(parent)?;
            let index = reference
                .and_then(|r| parent_node.children.iter().position(|c| *c == r))
                .unwrap_or(parent_node.children.len());
            parent_node.children.insert(index, child);
            state.node_mut(child)?.parent = Some(parent);
            records.push(MutationRecord::child_list(parent, vec![child], Vec::new()));
            Ok(((), records))
        })
    }

    /// Detach `child` from `parent`. Fails if `child` is not a child of `parent`.
    pub fn remove_child(&self, parent: NodeId, child: NodeId) -> DomResult<()> {
        self.mutate(|state| {
            if state.node(child)?.parent != Some(parent) {
                return Err(DomError::NotAChild { parent, reference: child });
            }
            let records = state.detach(child)?.into_iter().collect();
            Ok(((), records))
        })
    }

    /// Detach `node` from its parent, if it has one. It is freed after
    /// delivery unless re-inserted first.
    pub fn remove(&self, node: NodeId) -> DomResult<()> {
        self.mutate(|state| {
            let records = state.detach(node)?.into_iter().collect();
            Ok(((), records))
        })
    }

    /// Detach `node` and free it and its subtree.
    ///
    /// Listeners and observers registered on the freed nodes are dropped.
    pub fn destroy(&self, node: NodeId) -> DomResult<()> {
        self.mutate(|state| {
            if node == state.body {
                return Err(DomError::HierarchyRequest { parent: node, child: node });
            }
            let records: Vec<_> = state.detach(node)?.into_iter().collect();
            state.free_subtree(node);
            Ok(((), records))
        })
    }

    // ------------------------------------------------------------------
    // Attributes, classes, styles, dataset
    // ------------------------------------------------------------------

    /// Attribute value, if set.
    pub fn get_attribute(&self, node: NodeId, name: &str) -> DomResult<Option<String>> {
        let state = self.inner.state.lock();
        Ok(state.attribute_of(node, &name.to_ascii_lowercase())?.map(str::to_string))
    }

    pub fn has_attribute(&self, node: NodeId, name: &str) -> DomResult<bool> {
        Ok(self.get_attribute(node, name)?.is_some())
    }

    /// All attributes in insertion order.
    pub fn attributes(&self, node: NodeId) -> DomResult<Vec<(String, String)>> {
        let state = self.inner.state.lock();
        let el = state.node(node)?.as_element().ok_or(DomError::NotAnElement(node))?;
        Ok(el
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    /// Set an attribute. Writing the current value still records a mutation.
    pub fn set_attribute(&self, node: NodeId, name: &str, value: &str) -> DomResult<()> {
        let name = name.to_ascii_lowercase();
        self.mutate(|state| {
            let records = state
                .write_attribute(node, &name, Some(value.to_string()))?
                .into_iter()
                .collect();
            Ok(((), records))
        })
    }

    /// Remove an attribute. Returns whether it was present.
    pub fn remove_attribute(&self, node: NodeId, name: &str) -> DomResult<bool> {
        let name = name.to_ascii_lowercase();
        self.mutate(|state| {
            let record = state.write_attribute(node, &name, None)?;
            Ok((record.is_some(), record.into_iter().collect()))
        })
    }

    /// Classes in attribute order.
    pub fn class_list(&self, node: NodeId) -> DomResult<Vec<String>> {
        let state = self.inner.state.lock();
        Ok(state
            .attribute_of(node, "class")?
            .map(|v| node::class_tokens(v).map(str::to_string).collect())
            .unwrap_or_default())
    }

    pub fn has_class(&self, node: NodeId, class: &str) -> DomResult<bool> {
        Ok(self.class_list(node)?.iter().any(|c| c == class))
    }

    /// Add or remove one class token. Rewrites the `class` attribute.
    pub fn set_class(&self, node: NodeId, class: &str, present: bool) -> DomResult<()> {
        self.mutate(|state| {
            let mut tokens: Vec<String> = state
                .attribute_of(node, "class")?
                .map(|v| node::class_tokens(v).map(str::to_string).collect())
                .unwrap_or_default();
            tokens.dedup();
            let has = tokens.iter().any(|c| c == class);
            if present && !has {
                tokens.push(class.to_string());
            } else if !present && has {
                tokens.retain(|c| c != class);
            }
            let records = state
                .write_attribute(node, "class", Some(tokens.join(" ")))?
                .into_iter()
                .collect();
            Ok(((), records))
        })
    }

    /// Add `class` unless present.
    pub fn add_class(&self, node: NodeId, class: &str) -> DomResult<()> {
        self.set_class(node, class, true)
    }

    /// Remove every occurrence of `class`.
    pub fn remove_class(&self, node: NodeId, class: &str) -> DomResult<()> {
        self.set_class(node, class, false)
    }

    /// Toggle a class; `force` pins the outcome. Returns whether the class
    /// is present afterwards.
    pub fn toggle_class(&self, node: NodeId, class: &str, force: Option<bool>) -> DomResult<bool> {
        let present = force.unwrap_or(!self.has_class(node, class)?);
        self.set_class(node, class, present)?;
        Ok(present)
    }

    /// Inline style declarations in order.
    pub fn styles(&self, node: NodeId) -> DomResult<IndexMap<String, String>> {
        let state = self.inner.state.lock();
        Ok(state
            .attribute_of(node, "style")?
            .map(node::parse_style)
            .unwrap_or_default())
    }

    /// Inline style property value, if set.
    pub fn style(&self, node: NodeId, property: &str) -> DomResult<Option<String>> {
        Ok(self.styles(node)?.shift_remove(&property.to_ascii_lowercase()))
    }

    /// Set (`Some`) or remove (`None`) one inline style property.
    pub fn set_style(&self, node: NodeId, property: &str, value: Option<&str>) -> DomResult<()> {
        let property = property.trim().to_ascii_lowercase();
        self.mutate(|state| {
            let mut styles = state
                .attribute_of(node, "style")?
                .map(node::parse_style)
                .unwrap_or_default();
            match value.map(str::trim).filter(|v| !v.is_empty()) {
                Some(v) => {
                    styles.insert(property.clone(), v.to_string());
                }
                None => {
                    styles.shift_remove(&property);
                }
            }
            let serialized = (!styles.is_empty()).then(|| node::serialize_style(&styles));
            let records = state.write_attribute(node, "style", serialized)?.into_iter().collect();
            Ok(((), records))
        })
    }

    /// `data-*` attributes keyed by their camelCase names.
    pub fn dataset(&self, node: NodeId) -> DomResult<IndexMap<String, String>> {
        let state = self.inner.state.lock();
        let el = state.node(node)?.as_element().ok_or(DomError::NotAnElement(node))?;
        Ok(el
            .attributes
            .iter()
            .filter_map(|(k, v)| node::dataset_key(k).map(|key| (key, v.clone())))
            .collect())
    }

    /// Dataset value for `key` (read from `data-<key>`).
    pub fn data(&self, node: NodeId, key: &str) -> DomResult<Option<String>> {
        self.get_attribute(node, &node::dataset_attribute(key))
    }

    /// Set (`Some`) or remove (`None`) one `data-*` attribute.
    pub fn set_data(&self, node: NodeId, key: &str, value: Option<&str>) -> DomResult<()> {
        let name = node::dataset_attribute(key).to_ascii_lowercase();
        match value {
            Some(value) => self.set_attribute(node, &name, value),
            None => self.remove_attribute(node, &name).map(|_| ()),
        }
    }

    // ------------------------------------------------------------------
    // Content
    // ------------------------------------------------------------------

    /// Concatenated text of `node` and its descendants.
    pub fn text_content(&self, node: NodeId) -> DomResult<String> {
        self.inner.state.lock().text_content(node)
    }

    /// Replace the content of `node` with `text`.
    ///
    /// For a text node, or an element whose only child is a text node, the
    /// existing text node's data is rewritten (a character-data mutation).
    /// Otherwise the children are replaced by a single new text node (one
    /// child-list mutation). Replaced children are freed after delivery.
    pub fn set_text_content(&self, node: NodeId, text: &str) -> DomResult<()> {
        self.mutate(|state| {
            let target = {
                let n = state.node(node)?;
                match (&n.data, n.children.as_slice()) {
                    (NodeData::Text(_), _) => Some(node),
                    (NodeData::Element(_), [only])
                        if matches!(state.node(*only)?.data, NodeData::Text(_)) =>
                    {
                        Some(*only)
                    }
                    _ => None,
                }
            };

            let record = match target {
                Some(text_node) => {
                    let old = match &mut state.node_mut(text_node)?.data {
                        NodeData::Text(data) => std::mem::replace(data, text.to_string()),
                        NodeData::Element(_) => return Err(DomError::NotText(text_node)),
                    };
                    MutationRecord::character_data(text_node, old)
                }
                None => {
                    let children = if text.is_empty() {
                        Vec::new()
                    } else {
                        let t = Node::text(text);
                        let id = t.id;
                        state.nodes.insert(id, t);
                        vec![id]
                    };
                    state.replace_children(node, children)?
                }
            };
            Ok(((), vec![record]))
        })
    }

    /// Rewrite a text node's data.
    pub fn set_text_data(&self, node: NodeId, text: &str) -> DomResult<()> {
        self.mutate(|state| match &mut state.node_mut(node)?.data {
            NodeData::Text(data) => {
                let old = std::mem::replace(data, text.to_string());
                Ok(((), vec![MutationRecord::character_data(node, old)]))
            }
            NodeData::Element(_) => Err(DomError::NotText(node)),
        })
    }

    /// Serialized children of `node`.
    pub fn inner_html(&self, node: NodeId) -> DomResult<String> {
        let state = self.inner.state.lock();
        let n = state.node(node)?;
        let mut out = String::new();
        match &n.data {
            NodeData::Text(text) => out.push_str(&html::escape_text(text)),
            NodeData::Element(_) => {
                for child in &n.children {
                    state.serialize(*child, &mut out);
                }
            }
        }
        Ok(out)
    }

    /// Serialized `node` including its own tag.
    pub fn outer_html(&self, node: NodeId) -> DomResult<String> {
        let state = self.inner.state.lock();
        state.node(node)?;
        let mut out = String::new();
        state.serialize(node, &mut out);
        Ok(out)
    }

    /// Replace the children of `node` with the parsed fragment, as one
    /// child-list mutation.
    pub fn set_inner_html(&self, node: NodeId, markup: &str) -> DomResult<()> {
        let fragments = html::parse_fragment(markup);
        self.mutate(|state| {
            if state.node(node)?.as_element().is_none() {
                return Err(DomError::NotAnElement(node));
            }
            let children = fragments.iter().map(|f| state.build_fragment(f)).collect();
            let record = state.replace_children(node, children)?;
            Ok(((), vec![record]))
        })
    }

    // ------------------------------------------------------------------
    // Selectors
    // ------------------------------------------------------------------

    /// Whether `node` matches `selector`.
    pub fn matches(&self, node: NodeId, selector: &Selector) -> bool {
        selector.matches(&*self.inner.state.lock(), node)
    }

    /// Nearest inclusive ancestor of `node` matching `selector`.
    pub fn closest(&self, node: NodeId, selector: &Selector) -> Option<NodeId> {
        let state = self.inner.state.lock();
        let mut current = Some(node);
        while let Some(id) = current {
            if selector.matches(&*state, id) {
                return Some(id);
            }
            current = state.nodes.get(&id).and_then(|n| n.parent);
        }
        None
    }

    /// First descendant of `root` matching `selector`.
    pub fn query_selector(&self, root: NodeId, selector: &str) -> Result<Option<NodeId>, SelectorError> {
        let selector = Selector::parse(selector)?;
        let state = self.inner.state.lock();
        Ok(state
            .descendants(root)
            .into_iter()
            .find(|id| selector.matches(&*state, *id)))
    }

    /// Every descendant of `root` matching `selector`, in document order.
    pub fn query_selector_all(&self, root: NodeId, selector: &str) -> Result<Vec<NodeId>, SelectorError> {
        let selector = Selector::parse(selector)?;
        let state = self.inner.state.lock();
        Ok(state
            .descendants(root)
            .into_iter()
            .filter(|id| selector.matches(&*state, *id))
            .collect())
    }

    /// First node at or under the body, in document order, with this `id`.
    pub fn get_element_by_id(&self, id: &str) -> Option<NodeId> {
        let state = self.inner.state.lock();
        let body = state.body;
        std::iter::once(body)
            .chain(state.descendants(body))
            .find(|n| state.attribute(*n, "id") == Some(id))
    }

    // ------------------------------------------------------------------
    // Mutation observers
    // ------------------------------------------------------------------

    /// Observe mutations on `target` (and, with `subtree`, its descendants).
    pub fn observe<F>(&self, target: NodeId, options: ObserverOptions, callback: F) -> DomResult<ObserverId>
    where
        F: Fn(&[MutationRecord]) + Send + Sync + 'static,
    {
        let mut state = self.inner.state.lock();
        state.node(target)?;
        state.next_observer += 1;
        let id = ObserverId(state.next_observer);
        state.observers.insert(
            id,
            Registration {
                target,
                options,
                callback: Arc::new(callback),
                queue: Vec::new(),
            },
        );
        Ok(id)
    }

    /// Stop observing. Undelivered records are discarded. Returns `false`
    /// if the observer was already gone.
    pub fn disconnect(&self, id: ObserverId) -> bool {
        self.inner.state.lock().observers.shift_remove(&id).is_some()
    }

    /// Take the undelivered records of an observer.
    pub fn take_records(&self, id: ObserverId) -> Vec<MutationRecord> {
        self.inner
            .state
            .lock()
            .observers
            .get_mut(&id)
            .map(|reg| std::mem::take(&mut reg.queue))
            .unwrap_or_default()
    }

    /// Number of live mutation observers.
    pub fn observer_count(&self) -> usize {
        self.inner.state.lock().observers.len()
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Register `callback` for `event` on `node`. Returns an id for removal.
    pub fn add_event_listener(
        &self,
        node: NodeId,
        event: &str,
        callback: EventCallback,
        options: ListenerOptions,
    ) -> DomResult<ListenerId> {
        let mut state = self.inner.state.lock();
        state.node(node)?;
        state.next_listener += 1;
        let id = ListenerId(state.next_listener);
        state.listeners.entry(node).or_default().push(NativeListener {
            id,
            event: event.to_string(),
            callback,
            options,
        });
        Ok(id)
    }

    /// Returns `false` if the listener was already gone.
    pub fn remove_event_listener(&self, node: NodeId, id: ListenerId) -> bool {
        let mut state = self.inner.state.lock();
        let Some(list) = state.listeners.get_mut(&node) else {
            return false;
        };
        let before = list.len();
        list.retain(|l| l.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            state.listeners.remove(&node);
        }
        removed
    }

    /// Number of native listeners on `node`.
    pub fn listener_count(&self, node: NodeId) -> usize {
        self.inner
            .state
            .lock()
            .listeners
            .get(&node)
            .map_or(0, Vec::len)
    }

    /// Dispatch `event` at `target`.
    ///
    /// Returns `false` if a listener called `prevent_default`.
    pub fn dispatch_event(&self, target: NodeId, event: &Event) -> DomResult<bool> {
        let path: Vec<NodeId> = {
            let state = self.inner.state.lock();
            state.node(target)?;
            let mut path = vec![target];
            let mut current = state.nodes.get(&target).and_then(|n| n.parent);
            while let Some(id) = current {
                path.push(id);
                current = state.nodes.get(&id).and_then(|n| n.parent);
            }
            path
        };

        event.begin_dispatch(target);

        'dispatch: {
            for node in path[1..].iter().rev() {
                self.invoke_listeners(*node, event, EventPhase::Capturing);
                if event.propagation_stopped() {
                    break 'dispatch;
                }
            }

            self.invoke_listeners(target, event, EventPhase::AtTarget);
            if event.propagation_stopped() || !event.does_bubble() {
                break 'dispatch;
            }

            for node in &path[1..] {
                self.invoke_listeners(*node, event, EventPhase::Bubbling);
                if event.propagation_stopped() {
                    break 'dispatch;
                }
            }
        }

        event.finish_dispatch();
        Ok(!event.default_prevented())
    }

    fn invoke_listeners(&self, node: NodeId, event: &Event, phase: EventPhase) {
        let listeners = {
            let mut state = self.inner.state.lock();
            let matching = state.matching_listeners(node, event.name(), phase);
            let once: Vec<ListenerId> = matching
                .iter()
                .filter(|l| l.options.once)
                .map(|l| l.id)
                .collect();
            if !once.is_empty() {
                if let Some(list) = state.listeners.get_mut(&node) {
                    list.retain(|l| !once.contains(&l.id));
                }
            }
            matching
        };
        if listeners.is_empty() {
            return;
        }

        event.enter(node, phase);
        for listener in listeners {
            if event.immediate_propagation_stopped() {
                break;
            }
            // A listener removed by an earlier one in this pass is skipped.
            if !listener.options.once && !self.has_listener(node, listener.id) {
                continue;
            }
            event.set_passive(listener.options.passive);
            isolate("event listener", || (listener.callback)(event));
            event.set_passive(false);
        }
    }

    fn has_listener(&self, node: NodeId, id: ListenerId) -> bool {
        self.inner
            .state
            .lock()
            .listeners
            .get(&node)
            .is_some_and(|list| list.iter().any(|l| l.id == id))
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Document")
            .field("nodes", &state.nodes.len())
            .field("observers", &state.observers.len())
            .finish()
    }
}
