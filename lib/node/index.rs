//! Per-mount ordered path index.

use std::collections::BTreeMap;
use std::ops::Bound;

use super::NodeAttrs;
use super::node::{Node, NodeFlags};
use super::path::RemotePath;
use crate::sync::Arc;

/// Ordered map from remote path to node. Guarded by the owning mount's `RwLock`; a node is in the
/// map exactly when its `HASHED` flag is set.
pub(crate) struct PathIndex<A: NodeAttrs> {
    map: BTreeMap<RemotePath, Arc<Node<A>>>,
}

impl<A: NodeAttrs> Default for PathIndex<A> {
    fn default() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }
}

impl<A: NodeAttrs> PathIndex<A> {
    pub(crate) fn get(&self, path: &[u8]) -> Option<&Arc<Node<A>>> {
        self.map.get(path)
    }

    /// Link `node` under `path`. The caller has checked the path is absent.
    pub(crate) fn insert(&mut self, path: RemotePath, node: Arc<Node<A>>) {
        node.set_flags(NodeFlags::HASHED, true);
        let prev = self.map.insert(path, node);
        debug_assert!(prev.is_none(), "duplicate path in index");
    }

    /// Remove `node` from the index. A no-op if it is not linked.
    pub(crate) fn unlink(&mut self, node: &Node<A>) -> bool {
        let mut state = node.lock_state();
        if !state.flags.contains(NodeFlags::HASHED) {
            return false;
        }
        if let Some(path) = &state.path {
            let removed = self.map.remove(path.as_bytes());
            debug_assert!(
                removed.is_some_and(|n| n.slot() == node.slot()),
                "hashed node missing from index"
            );
        }
        state.flags.remove(NodeFlags::HASHED);
        true
    }

    /// Entries strictly after `top`, in order.
    pub(crate) fn after<'a>(
        &'a self,
        top: &'a [u8],
    ) -> impl Iterator<Item = (&'a RemotePath, &'a Arc<Node<A>>)> + 'a {
        self.map
            .range::<[u8], _>((Bound::Excluded(top), Bound::Unbounded))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&RemotePath, &Arc<Node<A>>)> {
        self.map.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    /// Empty the index, returning its old contents.
    pub(crate) fn take(&mut self) -> BTreeMap<RemotePath, Arc<Node<A>>> {
        std::mem::take(&mut self.map)
    }

    /// Re-link an entry drained by [`take`](Self::take). Flags are untouched.
    pub(crate) fn restore(&mut self, path: RemotePath, node: Arc<Node<A>>) {
        self.map.insert(path, node);
    }
}
