//! Mutation observation.
//!
//! Native, low-level change observation on the document. An observer is
//! registered on a target node with a set of concerns; every matching
//! mutation produces a [`MutationRecord`] that is queued on the observer.
//! Queued records are delivered together in a single microtask, after the
//! mutation has taken effect. Disconnecting an observer discards records
//! that were queued but not yet delivered.

use std::sync::Arc;

use super::NodeId;

/// Unique identifier for a registered mutation observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) u64);

/// What changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Attributes,
    CharacterData,
    ChildList,
}

/// One low-level mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub kind: MutationKind,
    /// The element whose attribute changed, the text node whose data
    /// changed, or the parent whose child list changed.
    pub target: NodeId,
    pub attribute_name: Option<String>,
    /// Previous attribute value or character data.
    pub old_value: Option<String>,
    pub added_nodes: Vec<NodeId>,
    pub removed_nodes: Vec<NodeId>,
}

impl MutationRecord {
    pub(crate) fn attribute(target: NodeId, name: &str, old_value: Option<String>) -> Self {
        Self {
            kind: MutationKind::Attributes,
            target,
            attribute_name: Some(name.to_string()),
            old_value,
            added_nodes: Vec::new(),
            removed_nodes: Vec::new(),
        }
    }

    pub(crate) fn character_data(target: NodeId, old_value: String) -> Self {
        Self {
            kind: MutationKind::CharacterData,
            target,
            attribute_name: None,
            old_value: Some(old_value),
            added_nodes: Vec::new(),
            removed_nodes: Vec::new(),
        }
    }

    pub(crate) fn child_list(target: NodeId, added: Vec<NodeId>, removed: Vec<NodeId>) -> Self {
        Self {
            kind: MutationKind::ChildList,
            target,
            attribute_name: None,
            old_value: None,
            added_nodes: added,
            removed_nodes: removed,
        }
    }
}

/// Which mutations an observer wants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObserverOptions {
    pub attributes: bool,
    /// Restrict attribute records to these names.
    pub attribute_filter: Option<Vec<String>>,
    pub character_data: bool,
    pub child_list: bool,
    /// Also observe descendants of the target.
    pub subtree: bool,
}

impl ObserverOptions {
    pub fn attributes() -> Self {
        Self {
            attributes: true,
            ..Self::default()
        }
    }

    pub fn character_data() -> Self {
        Self {
            character_data: true,
            ..Self::default()
        }
    }

    pub fn child_list() -> Self {
        Self {
            child_list: true,
            ..Self::default()
        }
    }

    pub fn with_subtree(mut self, subtree: bool) -> Self {
        self.subtree = subtree;
        self
    }

    pub fn with_attribute_filter(mut self, filter: Option<Vec<String>>) -> Self {
        self.attribute_filter = filter;
        self
    }

    /// Whether this observer cares about `record`, given that the record's
    /// target is the observed node itself (`direct`) or a descendant.
    pub(crate) fn wants(&self, record: &MutationRecord, direct: bool) -> bool {
        if !direct && !self.subtree {
            return false;
        }
        match record.kind {
            MutationKind::Attributes => {
                self.attributes
                    && match (&self.attribute_filter, &record.attribute_name) {
                        (Some(filter), Some(name)) => filter.iter().any(|f| f == name),
                        _ => true,
                    }
            }
            MutationKind::CharacterData => self.character_data,
            MutationKind::ChildList => self.child_list,
        }
    }
}

/// Callback receiving a batch of records.
pub type MutationCallback = Arc<dyn Fn(&[MutationRecord]) + Send + Sync>;

pub(crate) struct Registration {
    pub(crate) target: NodeId,
    pub(crate) options: ObserverOptions,
    pub(crate) callback: MutationCallback,
    pub(crate) queue: Vec<MutationRecord>,
}
