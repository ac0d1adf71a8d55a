use thiserror::Error;

use super::MountId;

/// Errors surfaced by node-cache operations.
///
/// Races with other threads are never reported; they are resolved internally by retrying or by
/// returning the node the other thread created.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NodeCacheError {
    /// The child name is empty, `.` or `..`.
    #[error("invalid child name {0:?}")]
    InvalidName(String),

    /// A node slot or path buffer could not be allocated. Nothing was linked into the index.
    #[error("out of node resources: {what}")]
    Exhausted {
        /// Which resource ran out.
        what: &'static str,
    },

    /// The mount has begun teardown and no longer accepts new nodes.
    #[error("{0} is being unmounted")]
    Unmounted(MountId),

    /// A node was passed to a mount it does not belong to.
    #[error("node of {owner} used with {mount}")]
    ForeignNode {
        /// The mount that owns the node.
        owner: MountId,
        /// The mount the node was passed to.
        mount: MountId,
    },

    /// The pool cannot shut down while mounts or referenced nodes remain.
    #[error("node pool is still in use: {mounts} mounts, {live} live nodes")]
    Busy {
        /// Mounts still registered with the pool.
        mounts: usize,
        /// Nodes still allocated after draining the free list.
        live: usize,
    },
}
