#![allow(dead_code, missing_docs, clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use bytesize::ByteSize;
use fusenode::{Mount, MountOptions, NodeHooks, NodeId, NodePool, NodeRef, PoolConfig};

/// Attributes used across tests: a version stamp and a size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TestAttrs {
    pub version: u64,
    pub size: u64,
}

impl TestAttrs {
    pub fn v(version: u64) -> Self {
        Self { version, size: 0 }
    }
}

/// Hooks that record every purge and invalidation they receive. Cached data is considered stale
/// whenever the version changes.
#[derive(Default)]
pub struct RecordingHooks {
    pub purged: Mutex<Vec<NodeId>>,
    pub invalidated: Mutex<Vec<NodeId>>,
}

impl RecordingHooks {
    pub fn purged(&self) -> Vec<NodeId> {
        self.purged.lock().unwrap().clone()
    }

    pub fn invalidated(&self) -> Vec<NodeId> {
        self.invalidated.lock().unwrap().clone()
    }
}

impl NodeHooks<TestAttrs> for RecordingHooks {
    fn should_purge(&self, cached: Option<&TestAttrs>, fresh: &TestAttrs) -> bool {
        cached.is_some_and(|c| c.version != fresh.version)
    }

    fn purge(&self, node: NodeId) {
        self.purged.lock().unwrap().push(node);
    }

    fn invalidate(&self, node: NodeId) {
        self.invalidated.lock().unwrap().push(node);
    }
}

/// Pool config with an explicit target and enough memory budget that the target is never
/// clamped.
pub fn config(target: usize) -> PoolConfig {
    PoolConfig {
        node_target: Some(target),
        memory_budget: Some(ByteSize::gib(1)),
        ..PoolConfig::default()
    }
}

pub fn pool(target: usize) -> NodePool<TestAttrs> {
    NodePool::new(&config(target))
}

pub fn recording_pool(target: usize) -> (NodePool<TestAttrs>, Arc<RecordingHooks>) {
    let hooks = Arc::new(RecordingHooks::default());
    let dyn_hooks: Arc<dyn NodeHooks<TestAttrs>> = Arc::clone(&hooks) as _;
    let pool = NodePool::with_hooks(&config(target), dyn_hooks);
    (pool, hooks)
}

pub fn mount(pool: &NodePool<TestAttrs>) -> Mount<TestAttrs> {
    pool.mount(&MountOptions::default()).unwrap()
}

/// Create `path` (a `/`-separated relative path) below `root`, returning the leaf.
pub fn create_path(root: &NodeRef<TestAttrs>, path: &str) -> NodeRef<TestAttrs> {
    let mut node = root.clone();
    for name in path.split('/') {
        node = node.find_or_create(name.as_bytes(), None).unwrap();
    }
    node
}

/// Assert both audits pass.
pub fn assert_consistent(pool: &NodePool<TestAttrs>, mounts: &[&Mount<TestAttrs>]) {
    for mount in mounts {
        mount.audit().unwrap();
    }
    pool.audit().unwrap();
}
