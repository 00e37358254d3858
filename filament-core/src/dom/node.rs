//! Document Nodes
//!
//! This module defines the node types that live in the document arena.

use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

/// Unique identifier for a node in a document.
///
/// Identifiers are never reused, so a stale id held after a node is
/// destroyed simply stops resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// An element: has a tag name, attributes and children.
    Element,

    /// A text node: character data, never has children.
    Text,
}

/// Element payload.
#[derive(Debug, Clone)]
pub(crate) struct ElementData {
    pub(crate) tag: String,
    /// Attributes in insertion order. `class` and `style` live here too; the
    /// class list and inline style are views over them.
    pub(crate) attributes: IndexMap<String, String>,
}

#[derive(Debug, Clone)]
pub(crate) enum NodeData {
    Element(ElementData),
    Text(String),
}

/// A node in the document arena.
#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) id: NodeId,
    pub(crate) data: NodeData,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

impl Node {
    /// Create a new element node. Tag names are stored lowercase.
    pub(crate) fn element(tag: &str) -> Self {
        Self {
            id: NodeId::new(),
            data: NodeData::Element(ElementData {
                tag: tag.to_ascii_lowercase(),
                attributes: IndexMap::new(),
            }),
            parent: None,
            children: Vec::new(),
        }
    }

    /// Create a new text node.
    pub(crate) fn text(data: &str) -> Self {
        Self {
            id: NodeId::new(),
            data: NodeData::Text(data.to_string()),
            parent: None,
            children: Vec::new(),
        }
    }

    pub(crate) fn kind(&self) -> NodeKind {
        match self.data {
            NodeData::Element(_) => NodeKind::Element,
            NodeData::Text(_) => NodeKind::Text,
        }
    }

    pub(crate) fn as_element(&self) -> Option<&ElementData> {
        match &self.data {
            NodeData::Element(el) => Some(el),
            NodeData::Text(_) => None,
        }
    }

    pub(crate) fn as_element_mut(&mut self) -> Option<&mut ElementData> {
        match &mut self.data {
            NodeData::Element(el) => Some(el),
            NodeData::Text(_) => None,
        }
    }
}

/// Split a `class` attribute into its tokens.
pub(crate) fn class_tokens(value: &str) -> impl Iterator<Item = &str> {
    value.split_ascii_whitespace()
}

/// Parse a `style` attribute into ordered `property -> value` pairs.
pub(crate) fn parse_style(value: &str) -> IndexMap<String, String> {
    value
        .split(';')
        .filter_map(|decl| {
            let (prop, val) = decl.split_once(':')?;
            let prop = prop.trim();
            let val = val.trim();
            if prop.is_empty() || val.is_empty() {
                return None;
            }
            Some((prop.to_ascii_lowercase(), val.to_string()))
        })
        .collect()
}

/// Serialize inline style declarations back into a `style` attribute.
pub(crate) fn serialize_style(styles: &IndexMap<String, String>) -> String {
    styles
        .iter()
        .map(|(prop, val)| format!("{prop}: {val};"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// `fooBar` -> `data-foo-bar`.
pub(crate) fn dataset_attribute(key: &str) -> String {
    let mut name = String::with_capacity(key.len() + 5);
    name.push_str("data-");
    for ch in key.chars() {
        if ch.is_ascii_uppercase() {
            name.push('-');
            name.push(ch.to_ascii_lowercase());
        } else {
            name.push(ch);
        }
    }
    name
}

/// `data-foo-bar` -> `fooBar`. Returns `None` for non-data attributes.
pub(crate) fn dataset_key(attribute: &str) -> Option<String> {
    let rest = attribute.strip_prefix("data-")?;
    let mut key = String::with_capacity(rest.len());
    let mut upper = false;
    for ch in rest.chars() {
        if ch == '-' {
            upper = true;
        } else if upper {
            key.push(ch.to_ascii_uppercase());
            upper = false;
        } else {
            key.push(ch);
        }
    }
    Some(key)
}
