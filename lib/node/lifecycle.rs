//! Node lifecycle: lookup-or-create, release, recycling and destruction.

use tracing::trace;

use super::error::NodeCacheError;
use super::index::PathIndex;
use super::mount::MountShared;
use super::node::{Node, NodeFlags};
use super::path::RemotePath;
use super::pool::PoolShared;
use super::NodeAttrs;
use crate::sync::atomic::Ordering;
use crate::sync::{Arc, lock, read, write};

/// Outcome of trying to take the oldest idle node for reuse.
enum Reclaim<A: NodeAttrs> {
    /// A retired node, owned by the caller with one reference.
    Victim(Arc<Node<A>>),
    /// Someone resurrected the candidate first.
    Raced,
    /// Nothing to reuse, or the pool is under its target.
    Empty,
}

impl<A: NodeAttrs> PoolShared<A> {
    /// Take a reference to the node at `path`, if indexed. The caller holds the index lock.
    ///
    /// An idle node is taken off the free list and inherits the list's reference.
    pub(crate) fn find_locked(&self, index: &PathIndex<A>, path: &[u8]) -> Option<Arc<Node<A>>> {
        let node = index.get(path)?;
        if node.on_free_list() {
            let mut free = lock(&self.free);
            if free.remove(node) {
                trace!(slot = node.slot(), "resurrected idle node");
                return Some(Arc::clone(node));
            }
        }
        node.hold();
        Some(Arc::clone(node))
    }

    /// Find the node for `path` under `mount`, creating it with `flags` if absent. Returns the
    /// node with one reference owned by the caller, and whether it was created by this call.
    pub(crate) fn make_node(
        &self,
        mount: &Arc<MountShared<A>>,
        path: &RemotePath,
        flags: NodeFlags,
    ) -> Result<(Arc<Node<A>>, bool), NodeCacheError> {
        let mut attempts = 0;
        loop {
            {
                let index = read(&mount.index);
                if let Some(node) = self.find_locked(&index, path.as_bytes()) {
                    return Ok((node, false));
                }
            }
            if mount.is_unmounting() {
                return Err(NodeCacheError::Unmounted(mount.id()));
            }

            let reclaimed = if attempts < self.reclaim_attempts {
                self.reclaim_idle()
            } else {
                Reclaim::Empty
            };
            let node = match reclaimed {
                Reclaim::Victim(node) => node,
                Reclaim::Raced => {
                    attempts += 1;
                    continue;
                }
                Reclaim::Empty => self.allocate()?,
            };
            node.prepare(mount, path, flags);

            let mut index = write(&mount.index);
            if mount.is_unmounting() {
                drop(index);
                self.add_free(node);
                return Err(NodeCacheError::Unmounted(mount.id()));
            }
            if let Some(winner) = self.find_locked(&index, path.as_bytes()) {
                drop(index);
                trace!(%path, "lost creation race");
                self.add_free(node);
                return Ok((winner, false));
            }
            index.insert(path.clone(), Arc::clone(&node));
            drop(index);
            trace!(%path, slot = node.slot(), "node created");
            return Ok((node, true));
        }
    }

    /// If the pool is at or over its target, pop the oldest idle node and retire it for reuse.
    /// The victim comes back vacant but still counted as allocated.
    fn reclaim_idle(&self) -> Reclaim<A> {
        let node = {
            let mut free = lock(&self.free);
            if free.is_empty() || self.allocated.load(Ordering::Acquire) < self.target() {
                return Reclaim::Empty;
            }
            match free.pop_front() {
                Some(node) => node,
                None => return Reclaim::Empty,
            }
        };
        if !self.unlink_if_idle(&node) {
            return Reclaim::Raced;
        }
        let id = node.id();
        node.inactivate();
        self.hooks().invalidate(id);
        let mount = node.retire();
        trace!(node = %id, "recycling idle node");
        drop(mount);
        Reclaim::Victim(node)
    }

    /// Unlink `node` from its index unless another reference appeared. The caller owns one
    /// reference; on `false` it has been given up.
    pub(crate) fn unlink_if_idle(&self, node: &Arc<Node<A>>) -> bool {
        let Some(mount) = node.hashed_mount() else {
            return !node.drop_if_shared();
        };
        let mut index = write(&mount.index);
        if node.drop_if_shared() {
            return false;
        }
        index.unlink(node);
        drop(index);
        drop(mount);
        true
    }

    /// Handle the release of a node's last reference.
    ///
    /// The node is destroyed if it is not indexed, carries an error, its mount is going away, or
    /// the pool is over its target. Otherwise it is parked at the tail of the free list, keeping
    /// its reference.
    pub(crate) fn add_free(&self, node: Arc<Node<A>>) {
        let (hashed, errored, mount) = {
            let state = node.lock_state();
            (
                state.flags.contains(NodeFlags::HASHED),
                state.flags.contains(NodeFlags::ERROR),
                state.mount.clone(),
            )
        };
        let unmounting = mount.as_ref().is_none_or(|m| m.is_unmounting());
        let over_target = self.allocated.load(Ordering::Acquire) > self.target();

        let Some(mount) = mount.filter(|_| {
            hashed && !errored && !unmounting && !over_target && !self.is_closing()
        }) else {
            if self.unlink_if_idle(&node) {
                node.inactivate();
                self.destroy(node);
            }
            return;
        };

        let mut index = write(&mount.index);
        if node.drop_if_shared() {
            return;
        }
        // Flags and teardown may have changed while the lock was released. Only this thread
        // references the node now, so nothing can change them again before it is parked.
        let flags = node.flags();
        if !flags.contains(NodeFlags::HASHED)
            || flags.contains(NodeFlags::ERROR)
            || mount.is_unmounting()
            || self.is_closing()
        {
            index.unlink(&node);
            drop(index);
            node.inactivate();
            self.destroy(node);
            return;
        }
        lock(&self.free).push_back(node);
        drop(index);
    }

    /// Take a slot for a new node: a vacant one if available, otherwise fresh storage.
    fn allocate(&self) -> Result<Arc<Node<A>>, NodeCacheError> {
        match self.max_nodes {
            Some(max) => {
                self.allocated
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                        (n < max).then_some(n + 1)
                    })
                    .map_err(|_| NodeCacheError::Exhausted { what: "node slots" })?;
            }
            None => {
                self.allocated.fetch_add(1, Ordering::AcqRel);
            }
        }
        if let Some(node) = lock(&self.vacant).pop() {
            return Ok(node);
        }
        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(Node::vacant(slot)))
    }

    /// Retire a node whose only reference the caller owns and return its slot to the pool.
    pub(crate) fn destroy(&self, node: Arc<Node<A>>) {
        let id = node.id();
        let mount = node.retire();
        self.allocated.fetch_sub(1, Ordering::AcqRel);
        self.hooks().invalidate(id);
        trace!(node = %id, "node destroyed");
        let surplus = {
            let mut vacant = lock(&self.vacant);
            if vacant.len() < self.target() {
                vacant.push(node);
                None
            } else {
                Some(node)
            }
        };
        drop(surplus);
        drop(mount);
    }

    /// Release every retired slot kept for reuse.
    pub(crate) fn release_vacant(&self) -> usize {
        let released = std::mem::take(&mut *lock(&self.vacant));
        released.len()
    }

    /// Destroy every node on the free list. Returns how many were destroyed.
    pub(crate) fn reclaim(&self) -> usize {
        let mut destroyed = 0;
        loop {
            let Some(node) = lock(&self.free).pop_front() else {
                break;
            };
            if self.unlink_if_idle(&node) {
                node.inactivate();
                self.destroy(node);
                destroyed += 1;
            }
        }
        destroyed
    }
}
