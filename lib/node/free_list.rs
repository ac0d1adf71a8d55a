//! Pool-wide list of idle nodes, oldest first.

use hashlink::LinkedHashMap;

use super::NodeAttrs;
use super::node::Node;
use crate::sync::Arc;

/// Idle nodes in release order. Each entry carries the node's last reference; membership is
/// mirrored in the node's `on_free_list` flag, which only this type writes.
pub(crate) struct FreeList<A: NodeAttrs> {
    nodes: LinkedHashMap<u32, Arc<Node<A>>>,
}

impl<A: NodeAttrs> Default for FreeList<A> {
    fn default() -> Self {
        Self {
            nodes: LinkedHashMap::new(),
        }
    }
}

impl<A: NodeAttrs> FreeList<A> {
    pub(crate) fn push_back(&mut self, node: Arc<Node<A>>) {
        debug_assert!(!node.on_free_list(), "node already on the free list");
        node.set_on_free_list(true);
        self.nodes.insert(node.slot(), node);
    }

    pub(crate) fn pop_front(&mut self) -> Option<Arc<Node<A>>> {
        let (_, node) = self.nodes.pop_front()?;
        node.set_on_free_list(false);
        Some(node)
    }

    /// Take `node` off the list. Returns `false` if it was not there.
    pub(crate) fn remove(&mut self, node: &Node<A>) -> bool {
        if self.nodes.remove(&node.slot()).is_some() {
            node.set_on_free_list(false);
            true
        } else {
            false
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<Node<A>>> {
        self.nodes.values().cloned().collect()
    }
}
