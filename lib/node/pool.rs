//! The shared node pool: allocation, the free list, and the capacity target.

use tracing::{debug, instrument, warn};

use super::error::NodeCacheError;
use super::free_list::FreeList;
use super::hooks::{NoHooks, NodeHooks};
use super::mount::{Mount, MountShared};
use super::node::{Node, NodeFlags};
use super::{MountId, NodeAttrs};
use crate::config::{MountOptions, PoolConfig};
use crate::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use crate::sync::{Arc, Mutex, lock};

/// State shared by the pool handle, every mount, and every node reference.
pub(crate) struct PoolShared<A: NodeAttrs> {
    pub(crate) free: Mutex<FreeList<A>>,
    /// Retired slots ready for reuse, at most `target` of them.
    pub(crate) vacant: Mutex<Vec<Arc<Node<A>>>>,
    /// Slots currently holding a path: active or idle.
    pub(crate) allocated: AtomicUsize,
    pub(crate) next_slot: AtomicU32,
    /// Best-effort size goal. Read without synchronization; a stale value only shifts the
    /// recycle-or-allocate decision by one operation.
    pub(crate) target: AtomicUsize,
    pub(crate) max_nodes: Option<usize>,
    pub(crate) reclaim_attempts: usize,
    pub(crate) closing: AtomicBool,
    pub(crate) mounts: scc::HashMap<MountId, ()>,
    next_mount: AtomicU32,
    hooks: std::sync::Arc<dyn NodeHooks<A>>,
}

impl<A: NodeAttrs> PoolShared<A> {
    pub(crate) fn hooks(&self) -> &dyn NodeHooks<A> {
        &*self.hooks
    }

    pub(crate) fn target(&self) -> usize {
        self.target.load(Ordering::Relaxed)
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }
}

/// A snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Nodes holding a path, whether active or idle.
    pub allocated: usize,
    /// Idle nodes on the free list.
    pub free: usize,
    /// Retired slots kept for reuse. Never more than the target.
    pub vacant: usize,
    /// Current size target.
    pub target: usize,
    /// Live mounts.
    pub mounts: usize,
}

/// Owner of all node storage shared by a set of mounts.
///
/// Dropping the pool drains the free list. Nodes still referenced elsewhere keep their storage
/// alive until released.
pub struct NodePool<A: NodeAttrs> {
    shared: Arc<PoolShared<A>>,
}

impl<A: NodeAttrs> NodePool<A> {
    /// Build a pool with no host hooks.
    #[must_use]
    pub fn new(config: &PoolConfig) -> Self {
        Self::with_hooks(config, std::sync::Arc::new(NoHooks))
    }

    /// Build a pool that reports purges and invalidations to `hooks`.
    #[must_use]
    pub fn with_hooks(config: &PoolConfig, hooks: std::sync::Arc<dyn NodeHooks<A>>) -> Self {
        let target = compute_target(config, std::mem::size_of::<Node<A>>());
        debug!(target, max_nodes = ?config.max_nodes, "node pool initialized");
        Self {
            shared: Arc::new(PoolShared {
                free: Mutex::new(FreeList::default()),
                vacant: Mutex::new(Vec::new()),
                allocated: AtomicUsize::new(0),
                next_slot: AtomicU32::new(0),
                target: AtomicUsize::new(target),
                max_nodes: config.max_nodes,
                reclaim_attempts: config.reclaim_attempts,
                closing: AtomicBool::new(false),
                mounts: scc::HashMap::new(),
                next_mount: AtomicU32::new(0),
                hooks,
            }),
        }
    }

    /// Register a new, empty mount.
    pub fn mount(&self, options: &MountOptions) -> Result<Mount<A>, NodeCacheError> {
        if self.shared.is_closing() {
            return Err(NodeCacheError::Busy {
                mounts: self.shared.mounts.len(),
                live: self.shared.allocated.load(Ordering::Acquire),
            });
        }
        let separators = options.separators();
        let id = MountId(self.shared.next_mount.fetch_add(1, Ordering::Relaxed));
        drop(self.shared.mounts.insert_sync(id, ()));
        debug!(mount = %id, "mount registered");
        Ok(Mount::new(MountShared::new(
            id,
            separators,
            Arc::clone(&self.shared),
        )))
    }

    /// Destroy every idle node and release the retired slots kept for reuse. Returns how many
    /// nodes were destroyed.
    pub fn reclaim(&self) -> usize {
        let destroyed = self.shared.reclaim();
        let released = self.shared.release_vacant();
        debug!(destroyed, released, "node pool reclaimed");
        destroyed
    }

    /// Change the size target. Takes effect on the next allocation or release.
    pub fn set_target(&self, target: usize) {
        self.shared.target.store(target.max(1), Ordering::Relaxed);
    }

    /// Current size target.
    #[must_use]
    pub fn target(&self) -> usize {
        self.shared.target()
    }

    /// A snapshot of pool occupancy. Counters are read independently.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.shared.allocated.load(Ordering::Acquire),
            free: lock(&self.shared.free).len(),
            vacant: lock(&self.shared.vacant).len(),
            target: self.shared.target(),
            mounts: self.shared.mounts.len(),
        }
    }

    /// Stop accepting mounts, drain the free list, and report whether anything is still alive.
    ///
    /// Fails with [`NodeCacheError::Busy`] while mounts are registered or nodes are referenced;
    /// the pool stays closed either way.
    #[instrument(name = "NodePool::shutdown", skip(self))]
    pub fn shutdown(&self) -> Result<(), NodeCacheError> {
        self.shared.closing.store(true, Ordering::Release);
        let reclaimed = self.shared.reclaim();
        let mounts = self.shared.mounts.len();
        let live = self.shared.allocated.load(Ordering::Acquire);
        debug!(reclaimed, mounts, live, "node pool shut down");
        if mounts > 0 || live > 0 {
            return Err(NodeCacheError::Busy { mounts, live });
        }
        self.shared.release_vacant();
        Ok(())
    }

    /// Check free-list invariants. Meant for tests and soak runs.
    #[doc(hidden)]
    pub fn audit(&self) -> Result<(), String> {
        let snapshot = lock(&self.shared.free).snapshot();
        for node in snapshot {
            // The node may leave the list after the snapshot; only judge it if it is still there.
            let state = node.lock_state();
            if !node.on_free_list() {
                continue;
            }
            if state.refs != 1 {
                return Err(format!("idle node {} has {} refs", node.slot(), state.refs));
            }
            if !state.flags.contains(NodeFlags::HASHED) {
                return Err(format!("idle node {} is not indexed", node.slot()));
            }
            if state.flags.contains(NodeFlags::ERROR) {
                return Err(format!("idle node {} carries an error", node.slot()));
            }
        }
        Ok(())
    }
}

impl<A: NodeAttrs> Drop for NodePool<A> {
    fn drop(&mut self) {
        self.shared.closing.store(true, Ordering::Release);
        self.shared.reclaim();
    }
}

impl<A: NodeAttrs> std::fmt::Debug for NodePool<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodePool")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Size the pool: the configured hint, capped so node storage stays within a quarter of memory.
pub(crate) fn compute_target(config: &PoolConfig, node_size: usize) -> usize {
    let hint = config
        .node_target
        .filter(|&n| n > 0)
        .unwrap_or(config.default_target);
    let available = config
        .memory_budget
        .map_or_else(available_memory, |b| usize::try_from(b.as_u64()).unwrap_or(usize::MAX));
    let max = (available / 4 / node_size.max(1)).max(1);
    if hint > max {
        warn!(
            requested = hint,
            max, "node target exceeds memory budget, clamping"
        );
        max
    } else {
        hint.max(1)
    }
}

/// Memory the pool may draw from, in bytes.
#[cfg(unix)]
fn available_memory() -> usize {
    #[cfg(target_os = "linux")]
    let pages_name = libc::_SC_AVPHYS_PAGES;
    #[cfg(not(target_os = "linux"))]
    let pages_name = libc::_SC_PHYS_PAGES;

    // SAFETY: sysconf only reads system configuration.
    let pages = unsafe { libc::sysconf(pages_name) };
    // SAFETY: as above.
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    match (usize::try_from(pages), usize::try_from(page_size)) {
        (Ok(pages), Ok(size)) if pages > 0 && size > 0 => pages.saturating_mul(size),
        _ => usize::MAX,
    }
}

#[cfg(not(unix))]
fn available_memory() -> usize {
    usize::MAX
}
