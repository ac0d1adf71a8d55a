#![allow(clippy::unwrap_used, missing_docs)]

mod common;

use common::{TestAttrs, assert_consistent, mount, pool, recording_pool};
use fusenode::{Lookup, NodeCacheError, NodeFlags, NodePool, PoolConfig};

#[test]
fn find_or_create_then_find_returns_same_node() {
    let pool = pool(16);
    let mnt = mount(&pool);
    let root = mnt.root().unwrap();

    let created = root.find_or_create(b"a", Some(TestAttrs::v(1))).unwrap();
    assert_eq!(created.path().as_bytes(), b"/a");
    assert_eq!(created.attrs(), Some(TestAttrs::v(1)));

    let found = root.find_only(b"a").unwrap().unwrap();
    assert_eq!(found.id(), created.id());
    assert_eq!(created.ref_count(), 2);
    assert_eq!(found.synthetic_id(), created.synthetic_id());
    assert_consistent(&pool, &[&mnt]);
}

#[test]
fn root_is_the_empty_path() {
    let pool = pool(16);
    let mnt = mount(&pool);
    let root = mnt.root().unwrap();
    assert!(root.path().is_empty());
    assert_eq!(mnt.root().unwrap().id(), root.id());
    assert_eq!(root.mount_id(), mnt.id());
}

#[test]
fn probe_miss_returns_none_without_allocating() {
    let pool = pool(16);
    let mnt = mount(&pool);
    let found = mnt
        .find_or_create(b"", Some(b'/'), b"missing", Lookup::Probe)
        .unwrap();
    assert!(found.is_none());
    assert_eq!(pool.stats().allocated, 0);
}

#[test]
fn mount_level_create_joins_with_separator() {
    let pool = pool(16);
    let mnt = mount(&pool);
    let node = mnt
        .find_or_create(b"/dir", Some(b'/'), b"file", Lookup::Create)
        .unwrap()
        .unwrap();
    assert_eq!(node.path().as_bytes(), b"/dir/file");
    assert!(node.attrs().is_none(), "Create leaves attributes stale");

    let probed = mnt
        .find_or_create(b"/dir", Some(b'/'), b"file", Lookup::Probe)
        .unwrap()
        .unwrap();
    assert_eq!(probed.id(), node.id());
    assert_eq!(mnt.find_only(b"/dir/file").unwrap().id(), node.id());
}

#[test]
fn invalid_names_are_rejected_before_allocation() {
    let pool = pool(16);
    let mnt = mount(&pool);
    let root = mnt.root().unwrap();
    for name in [&b""[..], b".", b".."] {
        let err = root.find_or_create(name, None).unwrap_err();
        assert!(matches!(err, NodeCacheError::InvalidName(_)), "{err}");
        assert!(matches!(
            root.find_only(name),
            Err(NodeCacheError::InvalidName(_))
        ));
    }
    assert_eq!(pool.stats().allocated, 1);
}

#[test]
fn last_release_parks_node_on_free_list() {
    let pool = pool(16);
    let mnt = mount(&pool);
    let root = mnt.root().unwrap();

    let id = root.find_or_create(b"a", None).unwrap().id();
    let stats = pool.stats();
    assert_eq!(stats.allocated, 2);
    assert_eq!(stats.free, 1);
    assert_consistent(&pool, &[&mnt]);

    let again = root.find_only(b"a").unwrap().unwrap();
    assert_eq!(again.id(), id, "lookup resurrects the idle node");
    assert_eq!(again.ref_count(), 1);
    assert_eq!(pool.stats().free, 0);
}

#[test]
fn clone_and_drop_track_references() {
    let pool = pool(16);
    let mnt = mount(&pool);
    let root = mnt.root().unwrap();
    let a = root.find_or_create(b"a", None).unwrap();
    let b = a.clone();
    assert_eq!(a.ref_count(), 2);
    drop(b);
    assert_eq!(a.ref_count(), 1);
    assert_eq!(pool.stats().free, 0);
    drop(a);
    assert_eq!(pool.stats().free, 1);
}

#[test]
fn errored_node_is_destroyed_on_release() {
    let pool = pool(16);
    let mnt = mount(&pool);
    let root = mnt.root().unwrap();

    let a = root.find_or_create(b"a", None).unwrap();
    a.mark_error();
    assert!(a.flags().contains(NodeFlags::ERROR));
    drop(a);

    assert!(root.find_only(b"a").unwrap().is_none());
    let stats = pool.stats();
    assert_eq!(stats.allocated, 1);
    assert_eq!(stats.free, 0);
    assert_eq!(stats.vacant, 1);
}

#[test]
fn unhashed_node_is_unreachable_and_destroyed_on_release() {
    let pool = pool(16);
    let mnt = mount(&pool);
    let root = mnt.root().unwrap();

    let a = root.find_or_create(b"a", None).unwrap();
    a.unhash();
    assert!(!a.flags().contains(NodeFlags::HASHED));
    assert!(root.find_only(b"a").unwrap().is_none());

    // A new node can take the path while the old one is still referenced.
    let replacement = root.find_or_create(b"a", None).unwrap();
    assert_ne!(replacement.id(), a.id());

    drop(a);
    assert_eq!(pool.stats().allocated, 2);
    assert_consistent(&pool, &[&mnt]);
}

#[test]
fn release_over_target_destroys_instead_of_parking() {
    let pool = pool(2);
    let mnt = mount(&pool);
    let root = mnt.root().unwrap();

    let a = root.find_or_create(b"a", None).unwrap();
    let b = root.find_or_create(b"b", None).unwrap();
    let c = root.find_or_create(b"c", None).unwrap();
    assert_eq!(pool.stats().allocated, 4);

    drop(a);
    drop(b);
    drop(c);

    let stats = pool.stats();
    assert_eq!(stats.allocated, 2, "releases destroy until the target is met");
    assert_eq!(stats.free, 1);
    assert_eq!(stats.vacant, 2);
    assert!(root.find_only(b"c").unwrap().is_some());
}

#[test]
fn creating_past_target_recycles_oldest_idle_node() {
    let (pool, hooks) = recording_pool(4);
    let mnt = mount(&pool);
    let root = mnt.root().unwrap();

    let ids: Vec<_> = [&b"a"[..], b"b", b"c"]
        .into_iter()
        .map(|name| root.find_or_create(name, None).unwrap().id())
        .collect();
    assert_eq!(pool.stats().free, 3);

    let d = root.find_or_create(b"d", None).unwrap();
    assert_eq!(d.id().slot, ids[0].slot, "storage of the oldest idle node is reused");
    assert_eq!(d.id().generation, ids[0].generation + 1);
    assert_eq!(hooks.invalidated(), vec![ids[0]]);

    assert!(root.find_only(b"a").unwrap().is_none());
    assert!(root.find_only(b"b").unwrap().is_some());
    let stats = pool.stats();
    assert_eq!(stats.allocated, 4);
    assert_eq!(stats.free, 2, "b and c are idle again");
    assert_consistent(&pool, &[&mnt]);
}

#[test]
fn allocation_ceiling_reports_exhaustion() {
    let config = PoolConfig {
        max_nodes: Some(2),
        ..common::config(2)
    };
    let pool: NodePool<TestAttrs> = NodePool::new(&config);
    let mnt = mount(&pool);
    let root = mnt.root().unwrap();

    let a = root.find_or_create(b"a", None).unwrap();
    let err = root.find_or_create(b"b", None).unwrap_err();
    assert!(matches!(err, NodeCacheError::Exhausted { .. }), "{err}");
    assert!(root.find_only(b"b").unwrap().is_none());

    // Once a is idle it can be recycled for the new path.
    drop(a);
    let b = root.find_or_create(b"b", None).unwrap();
    assert_eq!(b.path().as_bytes(), b"/b");
    assert_eq!(pool.stats().allocated, 2);
}

#[test]
fn xattr_directory_and_children() {
    let pool = pool(16);
    let mnt = mount(&pool);
    let root = mnt.root().unwrap();
    let file = root.find_or_create(b"file", None).unwrap();
    assert!(!file.is_xattr());

    let xdir = file.xattr_dir().unwrap();
    assert_eq!(xdir.path().as_bytes(), b"/file:");
    assert!(xdir.is_xattr());

    let stream = xdir.find_or_create(b"stream", None).unwrap();
    assert_eq!(stream.path().as_bytes(), b"/file:stream");
    assert!(stream.is_xattr(), "children of an xattr directory inherit the flag");
    assert_eq!(
        xdir.find_only(b"stream").unwrap().unwrap().id(),
        stream.id()
    );
}

#[test]
fn changed_attributes_on_hit_trigger_purge() {
    let (pool, hooks) = recording_pool(16);
    let mnt = mount(&pool);
    let root = mnt.root().unwrap();

    let node = root.find_or_create(b"f", Some(TestAttrs::v(1))).unwrap();
    assert!(hooks.purged().is_empty(), "no purge on creation");

    root.find_or_create(b"f", Some(TestAttrs::v(1))).unwrap();
    assert!(hooks.purged().is_empty(), "unchanged attributes keep the cache");

    root.find_or_create(b"f", Some(TestAttrs::v(2))).unwrap();
    assert_eq!(hooks.purged(), vec![node.id()]);
    assert_eq!(node.attrs(), Some(TestAttrs::v(2)));

    node.invalidate_attrs();
    root.find_or_create(b"f", Some(TestAttrs::v(3))).unwrap();
    assert_eq!(hooks.purged().len(), 1, "stale attributes have nothing to compare");
}

#[test]
fn destroyed_nodes_are_reported_invalid() {
    let (pool, hooks) = recording_pool(16);
    let mnt = mount(&pool);
    let root = mnt.root().unwrap();
    let id = root.find_or_create(b"a", None).unwrap().id();
    assert_eq!(pool.reclaim(), 1);
    assert_eq!(hooks.invalidated(), vec![id]);
    assert!(root.find_only(b"a").unwrap().is_none());
}

#[test]
fn dirty_flag_round_trips() {
    let pool = pool(16);
    let mnt = mount(&pool);
    let root = mnt.root().unwrap();
    let a = root.find_or_create(b"a", None).unwrap();
    a.mark_dirty();
    assert!(a.flags().contains(NodeFlags::DIRTY));
    a.clear_dirty();
    assert!(!a.flags().contains(NodeFlags::DIRTY));
}

#[test]
fn set_target_takes_effect_on_next_release() {
    let pool = pool(16);
    let mnt = mount(&pool);
    let root = mnt.root().unwrap();
    let a = root.find_or_create(b"a", None).unwrap();
    pool.set_target(1);
    assert_eq!(pool.target(), 1);
    drop(a);
    assert_eq!(pool.stats().free, 0);
    assert_eq!(pool.stats().allocated, 1);
}

#[test]
fn retired_slots_are_kept_only_up_to_the_target() {
    let pool = pool(16);
    let mnt = mount(&pool);
    let root = mnt.root().unwrap();

    let held: Vec<_> = (0..1_000)
        .map(|i| root.find_or_create(format!("n{i}").as_bytes(), None).unwrap())
        .collect();
    drop(held);

    let stats = pool.stats();
    assert!(stats.vacant <= stats.target, "{stats:?}");
    assert_eq!(stats.free + 1, stats.allocated);

    pool.reclaim();
    let stats = pool.stats();
    assert_eq!(stats.allocated, 1, "only the root survives");
    assert_eq!(stats.free, 0);
    assert_eq!(stats.vacant, 0, "memory pressure releases retired slots too");

    // Storage is allocated afresh after the vacant list was released.
    let a = root.find_or_create(b"a", None).unwrap();
    assert_eq!(a.path().as_bytes(), b"/a");
    assert_consistent(&pool, &[&mnt]);
}

#[test]
fn xattr_directory_found_by_path_gains_the_flag() {
    let pool = pool(16);
    let mnt = mount(&pool);
    let root = mnt.root().unwrap();
    let file = root.find_or_create(b"file", None).unwrap();

    let plain = mnt
        .find_or_create(b"/file", Some(b':'), b"", Lookup::Create)
        .unwrap()
        .unwrap();
    assert!(!plain.is_xattr());

    let xdir = file.xattr_dir().unwrap();
    assert_eq!(xdir.id(), plain.id());
    assert!(plain.is_xattr());
}
