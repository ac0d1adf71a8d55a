#![allow(clippy::unwrap_used, missing_docs)]

mod common;

use common::{TestAttrs, mount, pool};
use fusenode::{NodeFlags, NodeRef};
use proptest::prelude::*;

const NAMES: usize = 12;

#[derive(Debug, Clone)]
enum Op {
    /// Look up or create a child of the root and keep the handle.
    Create(usize, u64),
    /// Look up or create, then drop immediately.
    Touch(usize),
    /// Drop one held handle.
    Release(usize),
    Probe(usize),
    Prune(usize),
    MarkError(usize),
    Unhash(usize),
    Reclaim,
    EvictAll,
    SetTarget(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..NAMES, 0..4u64).prop_map(|(n, v)| Op::Create(n, v)),
        3 => (0..NAMES).prop_map(Op::Touch),
        4 => any::<usize>().prop_map(Op::Release),
        2 => (0..NAMES).prop_map(Op::Probe),
        1 => (0..NAMES).prop_map(Op::Prune),
        1 => any::<usize>().prop_map(Op::MarkError),
        1 => any::<usize>().prop_map(Op::Unhash),
        1 => Just(Op::Reclaim),
        1 => Just(Op::EvictAll),
        1 => (1..NAMES).prop_map(Op::SetTarget),
    ]
}

fn name(n: usize) -> Vec<u8> {
    format!("n{n}").into_bytes()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn random_operations_keep_index_and_free_list_coupled(
        target in 2..8usize,
        ops in prop::collection::vec(op(), 1..120),
    ) {
        let pool = pool(target);
        let mnt = mount(&pool);
        let root = mnt.root().unwrap();
        let mut held: Vec<NodeRef<TestAttrs>> = Vec::new();

        for op in ops {
            match op {
                Op::Create(n, v) => {
                    held.push(root.find_or_create(&name(n), Some(TestAttrs::v(v))).unwrap());
                }
                Op::Touch(n) => {
                    drop(root.find_or_create(&name(n), None).unwrap());
                }
                Op::Release(i) => {
                    if !held.is_empty() {
                        let i = i % held.len();
                        drop(held.swap_remove(i));
                    }
                }
                Op::Probe(n) => {
                    let found = root.find_only(&name(n)).unwrap();
                    let full = format!("/n{n}");
                    let expected = held.iter().find(|h| {
                        h.path().as_bytes() == full.as_bytes()
                            && h.flags().contains(NodeFlags::HASHED)
                    });
                    if let Some(expected) = expected {
                        prop_assert_eq!(found.map(|f| f.id()), Some(expected.id()));
                    }
                }
                Op::Prune(n) => {
                    if let Some(dir) = root.find_only(&name(n)).unwrap() {
                        dir.invalidate_subtree();
                    }
                }
                Op::MarkError(i) => {
                    if !held.is_empty() {
                        let i = i % held.len();
                        held[i].mark_error();
                    }
                }
                Op::Unhash(i) => {
                    if !held.is_empty() {
                        let i = i % held.len();
                        held[i].unhash();
                    }
                }
                Op::Reclaim => {
                    pool.reclaim();
                    prop_assert_eq!(pool.stats().free, 0);
                }
                Op::EvictAll => {
                    mnt.evict_all();
                    prop_assert_eq!(pool.stats().free, 0);
                }
                Op::SetTarget(t) => pool.set_target(t),
            }

            mnt.audit().map_err(TestCaseError::fail)?;
            pool.audit().map_err(TestCaseError::fail)?;

            // Every allocated node is either indexed or an unhashed node someone still holds.
            let mut unhashed: Vec<_> = held
                .iter()
                .filter(|h| !h.flags().contains(NodeFlags::HASHED))
                .map(NodeRef::id)
                .collect();
            unhashed.sort_unstable();
            unhashed.dedup();
            let stats = pool.stats();
            prop_assert_eq!(stats.allocated, mnt.len() + unhashed.len());
            prop_assert!(stats.free < mnt.len(), "the held root is never idle");
        }

        drop(held);
        drop(root);
        mnt.unmount();
        prop_assert_eq!(pool.stats().allocated, 0);
    }
}
