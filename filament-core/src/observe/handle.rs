use std::sync::atomic::{AtomicBool, Ordering};

use crate::dom::{Document, NodeId, ObserverId};

/// What an [`ObservationHandle`] watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Concern {
    /// Attribute writes on the node.
    Attributes,
    /// Character data anywhere below the node.
    Content,
    /// The node's child list.
    Children,
    /// Nodes added anywhere below a subtree root, so they can be made
    /// reactive in turn.
    Descendants,
}

/// One native observer attached for one concern on one node.
///
/// The observer is disconnected exactly once: by [`disconnect`] or on drop,
/// whichever comes first.
///
/// [`disconnect`]: ObservationHandle::disconnect
pub struct ObservationHandle {
    node: NodeId,
    concern: Concern,
    observer: ObserverId,
    document: Document,
    connected: AtomicBool,
}

impl ObservationHandle {
    pub(crate) fn new(document: Document, node: NodeId, concern: Concern, observer: ObserverId) -> Self {
        Self {
            node,
            concern,
            observer,
            document,
            connected: AtomicBool::new(true),
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn concern(&self) -> Concern {
        self.concern
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Stop observing. Idempotent.
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.document.disconnect(self.observer);
        }
    }
}

impl Drop for ObservationHandle {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for ObservationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservationHandle")
            .field("node", &self.node)
            .field("concern", &self.concern)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::ObserverOptions;
    use crate::runtime::EventLoop;

    #[test]
    fn drop_disconnects_once() {
        let doc = Document::new(EventLoop::new());
        let node = doc.create_element("div");
        let id = doc.observe(node, ObserverOptions::attributes(), |_| {}).unwrap();
        let handle = ObservationHandle::new(doc.clone(), node, Concern::Attributes, id);
        assert_eq!(doc.observer_count(), 1);

        handle.disconnect();
        assert!(!handle.is_connected());
        assert_eq!(doc.observer_count(), 0);
        drop(handle);
        assert_eq!(doc.observer_count(), 0);
    }
}
