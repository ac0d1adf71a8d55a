//! Callbacks into the host filesystem layers.

use super::NodeId;

/// Extension point for the layers around the cache: the attribute cache that decides when cached
/// file data is stale, and the host file-object framework whose handles die with a node.
///
/// Every method has a no-op default, so implementors only override what they track. Hooks are
/// invoked with no cache locks held.
pub trait NodeHooks<A>: Send + Sync + 'static {
    /// Whether data cached for a node must be purged because `fresh` attributes disagree with the
    /// `cached` ones (e.g. a changed size or modification time). `cached` is `None` while the
    /// node's attributes are stale.
    fn should_purge(&self, _cached: Option<&A>, _fresh: &A) -> bool {
        false
    }

    /// Drop any data cached for `node`. Called after [`should_purge`](Self::should_purge)
    /// returned `true` on a lookup hit.
    fn purge(&self, _node: NodeId) {}

    /// `node`'s storage is being destroyed or recycled for another path; handles the host
    /// framework built around it are invalid from now on.
    fn invalidate(&self, _node: NodeId) {}
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl<A> NodeHooks<A> for NoHooks {}
