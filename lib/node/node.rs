//! Node slots and the external handle type.

use std::fmt;

use bitflags::bitflags;
use tracing::trace;

use super::error::NodeCacheError;
use super::mount::MountShared;
use super::path::RemotePath;
use super::{MountId, NodeAttrs};
use crate::sync::atomic::{AtomicBool, Ordering};
use crate::sync::{Arc, Mutex, MutexGuard, lock};

bitflags! {
    /// State flags carried by a node.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NodeFlags: u8 {
        /// Linked into its mount's path index.
        const HASHED = 1 << 0;
        /// An I/O error was recorded; the node is destroyed rather than recycled.
        const ERROR  = 1 << 1;
        /// Holds modifications not yet written back.
        const DIRTY  = 1 << 2;
        /// Lives under an extended-attribute directory.
        const XATTR  = 1 << 3;
    }
}

/// Identity of a node: its storage slot plus how many times that slot has been reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    /// Storage slot. Stable across recycling.
    pub slot: u32,
    /// Bumped every time the slot is retired.
    pub generation: u32,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.slot, self.generation)
    }
}

/// Mutable node state, guarded by the node lock.
pub(crate) struct NodeState<A: NodeAttrs> {
    /// References held outside the cache, plus the one the free list keeps while idle.
    pub(crate) refs: u32,
    pub(crate) flags: NodeFlags,
    pub(crate) generation: u32,
    pub(crate) path: Option<RemotePath>,
    pub(crate) synthetic_id: u64,
    /// `None` while stale.
    pub(crate) attrs: Option<A>,
    pub(crate) mount: Option<Arc<MountShared<A>>>,
}

/// One node slot. Slots outlive the paths they cache: a retired slot is either handed straight to
/// a new path or parked in the pool's vacant list.
pub(crate) struct Node<A: NodeAttrs> {
    slot: u32,
    /// Mirrors membership in the pool's free list. Written only with the free-list lock held.
    on_free_list: AtomicBool,
    state: Mutex<NodeState<A>>,
}

impl<A: NodeAttrs> Node<A> {
    pub(crate) fn vacant(slot: u32) -> Self {
        Self {
            slot,
            on_free_list: AtomicBool::new(false),
            state: Mutex::new(NodeState {
                refs: 0,
                flags: NodeFlags::empty(),
                generation: 0,
                path: None,
                synthetic_id: 0,
                attrs: None,
                mount: None,
            }),
        }
    }

    pub(crate) fn slot(&self) -> u32 {
        self.slot
    }

    pub(crate) fn on_free_list(&self) -> bool {
        self.on_free_list.load(Ordering::Acquire)
    }

    pub(crate) fn set_on_free_list(&self, on: bool) {
        self.on_free_list.store(on, Ordering::Release);
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, NodeState<A>> {
        lock(&self.state)
    }

    pub(crate) fn id(&self) -> NodeId {
        NodeId {
            slot: self.slot,
            generation: self.lock_state().generation,
        }
    }

    /// Take one more reference.
    pub(crate) fn hold(&self) {
        let mut state = self.lock_state();
        debug_assert!(state.refs >= 1, "hold on an unreferenced node");
        state.refs += 1;
    }

    /// If someone else also references this node, give up the caller's reference and return
    /// `true`. Otherwise leave the count alone and return `false`.
    pub(crate) fn drop_if_shared(&self) -> bool {
        let mut state = self.lock_state();
        if state.refs > 1 {
            state.refs -= 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn flags(&self) -> NodeFlags {
        self.lock_state().flags
    }

    pub(crate) fn is_hashed(&self) -> bool {
        self.flags().contains(NodeFlags::HASHED)
    }

    pub(crate) fn set_flags(&self, flags: NodeFlags, on: bool) {
        self.lock_state().flags.set(flags, on);
    }

    /// The owning mount, if the node is currently linked into its index.
    pub(crate) fn hashed_mount(&self) -> Option<Arc<MountShared<A>>> {
        let state = self.lock_state();
        if state.flags.contains(NodeFlags::HASHED) {
            state.mount.clone()
        } else {
            None
        }
    }

    /// Fill a vacant or freshly retired slot for `path` under `mount`, with one reference owned by
    /// the caller. Attributes start stale; `flags` are set before the node becomes reachable.
    pub(crate) fn prepare(&self, mount: &Arc<MountShared<A>>, path: &RemotePath, flags: NodeFlags) {
        let mut state = self.lock_state();
        debug_assert_eq!(state.refs, 0);
        debug_assert!(state.path.is_none() && state.mount.is_none());
        state.refs = 1;
        state.flags = flags - NodeFlags::HASHED;
        state.path = Some(path.clone());
        state.synthetic_id = path.synthetic_id();
        state.attrs = None;
        state.mount = Some(Arc::clone(mount));
    }

    /// Release what the node caches for its path: the path buffer and the attributes.
    pub(crate) fn inactivate(&self) {
        let (path, attrs) = {
            let mut state = self.lock_state();
            (state.path.take(), state.attrs.take())
        };
        drop((path, attrs));
    }

    /// Zero the slot after [`inactivate`](Self::inactivate). The caller must own the only
    /// reference. Returns the mount hold, which the caller drops once no locks are held.
    pub(crate) fn retire(&self) -> Option<Arc<MountShared<A>>> {
        let mut state = self.lock_state();
        debug_assert_eq!(state.refs, 1, "retiring a shared node");
        debug_assert!(!state.flags.contains(NodeFlags::HASHED));
        debug_assert!(state.path.is_none());
        debug_assert!(!self.on_free_list());
        state.refs = 0;
        state.flags = NodeFlags::empty();
        state.generation = state.generation.wrapping_add(1);
        state.synthetic_id = 0;
        state.mount.take()
    }
}

/// A counted reference to a cached node.
///
/// Cloning takes another reference; dropping the last one hands the node back to the cache, which
/// either parks it on the free list or destroys it. The handle keeps the node's mount alive, so a
/// node can always reach its mount for as long as it is referenced.
pub struct NodeRef<A: NodeAttrs> {
    node: Arc<Node<A>>,
    mount: Arc<MountShared<A>>,
}

impl<A: NodeAttrs> NodeRef<A> {
    /// Wrap a node of `mount` whose reference the caller already owns.
    pub(crate) fn adopt(node: Arc<Node<A>>, mount: Arc<MountShared<A>>) -> Self {
        Self { node, mount }
    }

    pub(crate) fn node(&self) -> &Arc<Node<A>> {
        &self.node
    }

    /// This node's identity.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.node.id()
    }

    /// Full remote path from the mount root.
    #[must_use]
    pub fn path(&self) -> RemotePath {
        self.node.lock_state().path.clone().unwrap_or_default()
    }

    /// Stand-in inode number, a hash of the path.
    #[must_use]
    pub fn synthetic_id(&self) -> u64 {
        self.node.lock_state().synthetic_id
    }

    /// The mount this node belongs to.
    #[must_use]
    pub fn mount_id(&self) -> MountId {
        self.mount.id()
    }

    /// Current state flags.
    #[must_use]
    pub fn flags(&self) -> NodeFlags {
        self.node.flags()
    }

    /// Whether the node lives under an extended-attribute directory.
    #[must_use]
    pub fn is_xattr(&self) -> bool {
        self.flags().contains(NodeFlags::XATTR)
    }

    /// Cached attributes, or `None` while stale.
    #[must_use]
    pub fn attrs(&self) -> Option<A> {
        self.node.lock_state().attrs.clone()
    }

    /// Replace the cached attributes.
    pub fn set_attrs(&self, attrs: A) {
        self.node.lock_state().attrs = Some(attrs);
    }

    /// Mark the cached attributes stale.
    pub fn invalidate_attrs(&self) {
        self.node.lock_state().attrs = None;
    }

    /// Record an I/O error. Sticky: the node is destroyed on last release instead of recycled.
    pub fn mark_error(&self) {
        self.node.set_flags(NodeFlags::ERROR, true);
    }

    /// Record unwritten modifications.
    pub fn mark_dirty(&self) {
        self.node.set_flags(NodeFlags::DIRTY, true);
    }

    /// Clear the dirty marker after write-back.
    pub fn clear_dirty(&self) {
        self.node.set_flags(NodeFlags::DIRTY, false);
    }

    /// Number of references currently held, including the caller's.
    #[doc(hidden)]
    #[must_use]
    pub fn ref_count(&self) -> u32 {
        self.node.lock_state().refs
    }

    /// Run the purge hook if `fresh` disagrees with what is cached.
    pub(crate) fn check_cache(&self, fresh: &A) {
        let hooks = self.mount.pool().hooks();
        let cached = self.attrs();
        if hooks.should_purge(cached.as_ref(), fresh) {
            let id = self.id();
            trace!(node = %id, "purging cached data");
            hooks.purge(id);
        }
    }

    /// The separator that joins this directory to its children: none inside an xattr directory.
    fn child_separator(&self) -> Option<u8> {
        if self.is_xattr() {
            None
        } else {
            Some(self.mount.separators().path)
        }
    }

    /// Flags a child of this directory inherits.
    fn inherited_flags(&self) -> NodeFlags {
        self.flags() & NodeFlags::XATTR
    }

    /// Find or create the child `name` of this directory node.
    ///
    /// With `Some(attrs)` the attributes are applied to the node (after the purge check when the
    /// node already existed); with `None` a new node's attributes stay stale. Children of an xattr
    /// directory are xattr nodes themselves.
    pub fn find_or_create(&self, name: &[u8], attrs: Option<A>) -> Result<Self, NodeCacheError> {
        validate_name(name)?;
        let dir = self.path();
        let sep = self.child_separator();
        MountShared::create(
            &self.mount,
            dir.as_bytes(),
            sep,
            name,
            attrs,
            self.inherited_flags(),
        )
    }

    /// Look up the child `name` of this directory node without creating it.
    pub fn find_only(&self, name: &[u8]) -> Result<Option<Self>, NodeCacheError> {
        validate_name(name)?;
        let dir = self.path();
        let path = RemotePath::join(dir.as_bytes(), self.child_separator(), name)?;
        Ok(MountShared::find(&self.mount, path.as_bytes()))
    }

    /// Find or create the extended-attribute directory of this node.
    pub fn xattr_dir(&self) -> Result<Self, NodeCacheError> {
        let path = self.path();
        let sep = Some(self.mount.separators().xattr);
        MountShared::create(&self.mount, path.as_bytes(), sep, b"", None, NodeFlags::XATTR)
    }

    /// Mark the cached attributes of every node below this one stale. This node is untouched.
    /// Returns how many nodes were invalidated.
    pub fn invalidate_subtree(&self) -> usize {
        self.mount.prune(&self.path())
    }

    /// Unlink this node from its mount's index, e.g. after the remote file was removed. Lookups
    /// no longer find it and its last release destroys it.
    pub fn unhash(&self) {
        self.mount.unlink(&self.node);
    }
}

impl<A: NodeAttrs> Clone for NodeRef<A> {
    fn clone(&self) -> Self {
        self.node.hold();
        Self {
            node: Arc::clone(&self.node),
            mount: Arc::clone(&self.mount),
        }
    }
}

impl<A: NodeAttrs> Drop for NodeRef<A> {
    fn drop(&mut self) {
        {
            let mut state = self.node.lock_state();
            if state.refs > 1 {
                state.refs -= 1;
                return;
            }
        }
        // Last reference: the count stays at one while the pool decides the node's fate.
        self.mount.pool().add_free(Arc::clone(&self.node));
    }
}

impl<A: NodeAttrs> fmt::Debug for NodeRef<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("id", &self.id())
            .field("path", &self.path())
            .finish_non_exhaustive()
    }
}

/// Reject names that cannot denote a distinct child.
fn validate_name(name: &[u8]) -> Result<(), NodeCacheError> {
    if name.is_empty() || name == b"." || name == b".." {
        return Err(NodeCacheError::InvalidName(
            String::from_utf8_lossy(name).into_owned(),
        ));
    }
    Ok(())
}
