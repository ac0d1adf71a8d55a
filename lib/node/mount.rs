//! Per-mount view of the cache.

use tracing::{debug, instrument, trace};

use super::error::NodeCacheError;
use super::index::PathIndex;
use super::node::{Node, NodeFlags, NodeRef};
use super::path::{RemotePath, Separators};
use super::pool::PoolShared;
use super::{MountId, NodeAttrs};
use crate::sync::atomic::{AtomicBool, Ordering};
use crate::sync::{Arc, RwLock, lock, read, write};

/// What [`Mount::find_or_create`] should do about a path.
#[derive(Debug, Clone)]
pub enum Lookup<A> {
    /// Look up only; never create.
    Probe,
    /// Create the node if absent, leaving its attributes stale.
    Create,
    /// Create the node if absent and apply these attributes. An existing node first goes through
    /// the purge check.
    Apply(A),
}

pub(crate) struct MountShared<A: NodeAttrs> {
    id: MountId,
    separators: Separators,
    pub(crate) index: RwLock<PathIndex<A>>,
    unmounting: AtomicBool,
    pool: Arc<PoolShared<A>>,
}

impl<A: NodeAttrs> MountShared<A> {
    pub(crate) fn new(id: MountId, separators: Separators, pool: Arc<PoolShared<A>>) -> Self {
        Self {
            id,
            separators,
            index: RwLock::new(PathIndex::default()),
            unmounting: AtomicBool::new(false),
            pool,
        }
    }

    pub(crate) fn id(&self) -> MountId {
        self.id
    }

    pub(crate) fn separators(&self) -> Separators {
        self.separators
    }

    pub(crate) fn is_unmounting(&self) -> bool {
        self.unmounting.load(Ordering::Acquire)
    }

    pub(crate) fn pool(&self) -> &PoolShared<A> {
        &self.pool
    }

    /// Look up an indexed path, taking a reference on a hit.
    pub(crate) fn find(this: &Arc<Self>, path: &[u8]) -> Option<NodeRef<A>> {
        let index = read(&this.index);
        let node = this.pool.find_locked(&index, path)?;
        drop(index);
        trace!(mount = %this.id, slot = node.slot(), "lookup hit");
        Some(NodeRef::adopt(node, Arc::clone(this)))
    }

    /// Find or create `dir + sep? + name`, applying `attrs` when given. A new node starts with
    /// `flags`; an existing one gains them.
    pub(crate) fn create(
        this: &Arc<Self>,
        dir: &[u8],
        sep: Option<u8>,
        name: &[u8],
        attrs: Option<A>,
        flags: NodeFlags,
    ) -> Result<NodeRef<A>, NodeCacheError> {
        let path = RemotePath::join(dir, sep, name)?;
        let (node, created) = this.pool.make_node(this, &path, flags)?;
        if !created && !flags.is_empty() {
            node.set_flags(flags, true);
        }
        let node = NodeRef::adopt(node, Arc::clone(this));
        if let Some(attrs) = attrs {
            if !created {
                node.check_cache(&attrs);
            }
            node.set_attrs(attrs);
        }
        Ok(node)
    }

    /// Mark every node strictly below `top` stale. Returns how many were invalidated.
    pub(crate) fn prune(&self, top: &RemotePath) -> usize {
        let top = top.as_bytes();
        let index = read(&self.index);
        let mut invalidated = 0;
        for (path, node) in index.after(top) {
            if !path.as_bytes().starts_with(top) {
                break;
            }
            if path.is_below(top, self.separators) {
                node.lock_state().attrs = None;
                invalidated += 1;
            }
        }
        invalidated
    }

    pub(crate) fn unlink(&self, node: &Node<A>) {
        let mut index = write(&self.index);
        if index.unlink(node) {
            trace!(mount = %self.id, slot = node.slot(), "node unhashed");
        }
    }

    /// Destroy every idle node of this mount. Referenced nodes stay indexed.
    fn evict_all(&self) -> usize {
        let mut idle = Vec::new();
        {
            let mut index = write(&self.index);
            for (path, node) in index.take() {
                let was_idle = node.on_free_list() && lock(&self.pool.free).remove(&node);
                if was_idle {
                    node.set_flags(NodeFlags::HASHED, false);
                    idle.push(node);
                } else {
                    index.restore(path, node);
                }
            }
        }
        let evicted = idle.len();
        for node in idle {
            self.pool.add_free(node);
        }
        evicted
    }
}

impl<A: NodeAttrs> Drop for MountShared<A> {
    fn drop(&mut self) {
        drop(self.pool.mounts.remove_sync(&self.id));
        debug!(mount = %self.id, "mount released");
    }
}

/// One mounted remote tree.
///
/// Dropping the handle unmounts it. Nodes still referenced keep the mount's storage alive until
/// they are released.
pub struct Mount<A: NodeAttrs> {
    shared: Arc<MountShared<A>>,
}

impl<A: NodeAttrs> Mount<A> {
    pub(crate) fn new(shared: MountShared<A>) -> Self {
        Self {
            shared: Arc::new(shared),
        }
    }

    /// This mount's identifier.
    #[must_use]
    pub fn id(&self) -> MountId {
        self.shared.id
    }

    /// Separators used when naming children.
    #[must_use]
    pub fn separators(&self) -> Separators {
        self.shared.separators
    }

    /// Number of indexed nodes, active and idle.
    #[must_use]
    pub fn len(&self) -> usize {
        read(&self.shared.index).len()
    }

    /// Whether no node is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find the node for `dir + sep? + name`, creating it unless `lookup` is [`Lookup::Probe`].
    ///
    /// Returns `Ok(None)` only for a probe that missed. Races with other threads are resolved
    /// internally: two concurrent creators of the same path get the same node.
    pub fn find_or_create(
        &self,
        dir: &[u8],
        sep: Option<u8>,
        name: &[u8],
        lookup: Lookup<A>,
    ) -> Result<Option<NodeRef<A>>, NodeCacheError> {
        match lookup {
            Lookup::Probe => {
                let path = RemotePath::join(dir, sep, name)?;
                Ok(MountShared::find(&self.shared, path.as_bytes()))
            }
            Lookup::Create => {
                MountShared::create(&self.shared, dir, sep, name, None, NodeFlags::empty())
                    .map(Some)
            }
            Lookup::Apply(attrs) => {
                MountShared::create(&self.shared, dir, sep, name, Some(attrs), NodeFlags::empty())
                    .map(Some)
            }
        }
    }

    /// The mount root: the node with the empty path.
    pub fn root(&self) -> Result<NodeRef<A>, NodeCacheError> {
        MountShared::create(&self.shared, b"", None, b"", None, NodeFlags::empty())
    }

    /// Look up a full path without creating it.
    #[must_use]
    pub fn find_only(&self, path: &[u8]) -> Option<NodeRef<A>> {
        MountShared::find(&self.shared, path)
    }

    /// Mark the cached attributes of every node below `node` stale. Returns how many nodes were
    /// invalidated.
    ///
    /// Fails with [`NodeCacheError::ForeignNode`] if `node` belongs to another mount.
    pub fn invalidate_subtree(&self, node: &NodeRef<A>) -> Result<usize, NodeCacheError> {
        let owner = node.mount_id();
        if owner != self.shared.id {
            return Err(NodeCacheError::ForeignNode {
                owner,
                mount: self.shared.id,
            });
        }
        Ok(self.shared.prune(&node.path()))
    }

    /// Destroy every idle node of this mount and return how many were destroyed.
    ///
    /// Referenced nodes stay indexed and can still be looked up until their last release.
    #[instrument(name = "Mount::evict_all", skip(self), fields(mount = %self.shared.id))]
    pub fn evict_all(&self) -> usize {
        let evicted = self.shared.evict_all();
        debug!(evicted, remaining = self.len(), "mount evicted");
        evicted
    }

    /// Begin teardown: refuse new nodes, destroy released ones immediately, and evict every
    /// idle node. Returns how many nodes were evicted.
    pub fn unmount(&self) -> usize {
        self.shared.unmounting.store(true, Ordering::Release);
        self.evict_all()
    }

    /// Whether [`unmount`](Self::unmount) has run.
    #[must_use]
    pub fn is_unmounting(&self) -> bool {
        self.shared.is_unmounting()
    }

    /// Count nodes that would keep the mount busy: referenced, or holding unwritten data.
    /// `skip` (usually the root the caller itself holds) is not counted.
    pub fn check_busy(&self, skip: Option<&NodeRef<A>>) -> usize {
        let skip = skip.map(|n| n.node().slot());
        let index = read(&self.shared.index);
        let mut busy = 0;
        for (path, node) in index.iter() {
            if Some(node.slot()) == skip {
                continue;
            }
            let dirty = node.flags().contains(NodeFlags::DIRTY);
            if !node.on_free_list() || dirty {
                debug!(mount = %self.shared.id, %path, dirty, "busy node");
                busy += 1;
            }
        }
        busy
    }

    /// Check the index against node state. Meant for tests and soak runs.
    #[doc(hidden)]
    pub fn audit(&self) -> Result<(), String> {
        let index = read(&self.shared.index);
        let mut prev: Option<&RemotePath> = None;
        for (path, node) in index.iter() {
            if prev.is_some_and(|p| p >= path) {
                return Err(format!("index out of order at {path:?}"));
            }
            prev = Some(path);
            let state = node.lock_state();
            if !state.flags.contains(NodeFlags::HASHED) {
                return Err(format!("{path:?} indexed without the hashed flag"));
            }
            if state.path.as_ref() != Some(path) {
                return Err(format!("{path:?} indexed under the wrong key"));
            }
            if state.refs == 0 {
                return Err(format!("{path:?} indexed with no references"));
            }
            if node.on_free_list() && state.refs != 1 {
                return Err(format!("{path:?} idle with {} refs", state.refs));
            }
        }
        Ok(())
    }
}

impl<A: NodeAttrs> Drop for Mount<A> {
    fn drop(&mut self) {
        if !self.shared.is_unmounting() {
            self.unmount();
        }
    }
}

impl<A: NodeAttrs> std::fmt::Debug for Mount<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mount")
            .field("id", &self.shared.id)
            .field("unmounting", &self.is_unmounting())
            .finish_non_exhaustive()
    }
}
