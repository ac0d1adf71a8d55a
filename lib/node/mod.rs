//! Path-keyed node cache.
//!
//! Every mount owns an ordered index mapping remote paths to nodes. All mounts share one
//! [`NodePool`], which owns the free list of idle nodes and recycles them once the pool has grown
//! past its target size.
//!
//! A node is in exactly one of these states:
//!
//! - **active**: referenced by at least one [`NodeRef`], linked into its mount's index;
//! - **idle**: unreferenced, still indexed, parked on the free list holding one internal reference;
//!   a lookup resurrects it by taking it off the list;
//! - **vacant**: retired, no path, waiting in the pool to be reused.
//!
//! Locks are always taken in this order: a mount's index, then a node's state, then the pool's free
//! list. No lock is held while calling into [`NodeHooks`] or dropping a mount.

mod error;
mod free_list;
mod hooks;
mod index;
mod lifecycle;
mod mount;
#[allow(clippy::module_inception)]
mod node;
mod path;
mod pool;

use std::fmt;

pub use error::NodeCacheError;
pub use hooks::{NoHooks, NodeHooks};
pub use mount::{Lookup, Mount};
pub use node::{NodeFlags, NodeId, NodeRef};
pub use path::{RemotePath, Separators, compare_paths};
pub use pool::{NodePool, PoolStats};

/// Attributes a node can cache for its remote file.
pub trait NodeAttrs: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> NodeAttrs for T {}

/// Identifies a mount within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MountId(pub u32);

impl fmt::Display for MountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mnt{}", self.0)
    }
}
