//! Remote-path node cache for a userspace-filesystem client.

pub mod config;
pub mod node;
pub mod sync;

pub use config::{FusenodeConfig, MountOptions, PoolConfig};
pub use node::{
    Lookup, Mount, MountId, NodeAttrs, NodeCacheError, NodeFlags, NodeHooks, NodeId, NodePool,
    NodeRef, NoHooks, PoolStats, RemotePath, Separators, compare_paths,
};
