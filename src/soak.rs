//! Multi-threaded soak driver for the node cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use fusenode::{FusenodeConfig, Mount, NodeCacheError, NodePool, NodeRef};
use rand::rngs::SmallRng;
use rand::{Rng as _, SeedableRng as _};
use tracing::{debug, info, info_span, warn};

/// Attributes cached by soak nodes: a version stamp bumped by writers.
type SoakAttrs = u64;

/// Knobs for one soak run.
#[derive(Debug, Clone)]
pub struct SoakPlan {
    pub threads: usize,
    pub mounts: usize,
    pub ops: u64,
    pub dirs: usize,
    pub files: usize,
    pub seed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    lookups: AtomicU64,
    probe_hits: AtomicU64,
    probe_misses: AtomicU64,
    pruned: AtomicU64,
    reclaimed: AtomicU64,
    unhashed: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

/// What a soak run observed.
#[derive(Debug)]
pub struct SoakReport {
    pub elapsed: Duration,
    pub lookups: u64,
    pub probe_hits: u64,
    pub probe_misses: u64,
    pub pruned: u64,
    pub reclaimed: u64,
    pub unhashed: u64,
    pub errors: u64,
    pub evicted: usize,
    pub busy_at_unmount: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum SoakError {
    #[error(transparent)]
    Cache(#[from] NodeCacheError),

    #[error("invariant violated: {0}")]
    Audit(String),
}

/// Run `plan` against a fresh pool and tear everything down afterwards.
pub fn run(config: &FusenodeConfig, plan: &SoakPlan) -> Result<SoakReport, SoakError> {
    let span = info_span!("soak", threads = plan.threads, mounts = plan.mounts);
    let _enter = span.enter();

    let pool: NodePool<SoakAttrs> = NodePool::new(&config.pool);
    let mounts = (0..plan.mounts.max(1))
        .map(|_| pool.mount(&config.mount))
        .collect::<Result<Vec<_>, _>>()?;
    let roots = mounts
        .iter()
        .map(Mount::root)
        .collect::<Result<Vec<_>, _>>()?;
    info!(node_target = pool.target(), "starting soak");

    let counters = Counters::default();
    let start = Instant::now();
    std::thread::scope(|s| {
        for worker in 0..plan.threads.max(1) {
            let roots = &roots;
            let counters = &counters;
            let pool = &pool;
            std::thread::Builder::new()
                .name(format!("soak-{worker}"))
                .spawn_scoped(s, move || {
                    let mut rng = SmallRng::seed_from_u64(plan.seed.wrapping_add(worker as u64));
                    let ops = plan.ops / plan.threads.max(1) as u64;
                    Worker {
                        plan,
                        pool,
                        roots,
                        counters,
                        held: Vec::new(),
                    }
                    .run(&mut rng, ops);
                })
                .map(drop)
                .unwrap_or_else(|e| warn!(worker, error = %e, "failed to spawn soak worker"));
        }
    });
    let elapsed = start.elapsed();

    for mount in &mounts {
        mount.audit().map_err(SoakError::Audit)?;
    }
    pool.audit().map_err(SoakError::Audit)?;

    let busy_at_unmount: usize = mounts
        .iter()
        .zip(&roots)
        .map(|(mount, root)| mount.check_busy(Some(root)))
        .sum();
    drop(roots);
    let evicted: usize = mounts.iter().map(Mount::unmount).sum();
    drop(mounts);
    pool.shutdown()?;

    Ok(SoakReport {
        elapsed,
        lookups: counters.lookups.load(Ordering::Relaxed),
        probe_hits: counters.probe_hits.load(Ordering::Relaxed),
        probe_misses: counters.probe_misses.load(Ordering::Relaxed),
        pruned: counters.pruned.load(Ordering::Relaxed),
        reclaimed: counters.reclaimed.load(Ordering::Relaxed),
        unhashed: counters.unhashed.load(Ordering::Relaxed),
        errors: counters.errors.load(Ordering::Relaxed),
        evicted,
        busy_at_unmount,
    })
}

/// Most references a worker keeps alive at once.
const MAX_HELD: usize = 32;

struct Worker<'a> {
    plan: &'a SoakPlan,
    pool: &'a NodePool<SoakAttrs>,
    roots: &'a [NodeRef<SoakAttrs>],
    counters: &'a Counters,
    held: Vec<NodeRef<SoakAttrs>>,
}

impl Worker<'_> {
    fn run(mut self, rng: &mut SmallRng, ops: u64) {
        let roots = self.roots;
        for _ in 0..ops {
            let root = &roots[rng.gen_range(0..roots.len())];
            let dir = format!("d{}", rng.gen_range(0..self.plan.dirs.max(1)));
            let file = format!("f{}", rng.gen_range(0..self.plan.files.max(1)));
            let result = match rng.gen_range(0..100u32) {
                0..40 => self.create(root, &dir, &file, rng.r#gen()),
                40..60 => self.probe(root, &dir, &file),
                60..75 => self.hold(root, &dir, &file),
                75..85 => {
                    if !self.held.is_empty() {
                        let victim = rng.gen_range(0..self.held.len());
                        drop(self.held.swap_remove(victim));
                    }
                    Ok(())
                }
                85..93 => self.prune(root, &dir),
                93..97 => self.fault(root, &dir, &file, rng.gen_bool(0.5)),
                _ => {
                    Counters::bump(&self.counters.reclaimed, self.pool.reclaim() as u64);
                    Ok(())
                }
            };
            if let Err(e) = result {
                debug!(error = %e, "soak operation failed");
                Counters::bump(&self.counters.errors, 1);
            }
        }
    }

    fn child(
        root: &NodeRef<SoakAttrs>,
        dir: &str,
        file: &str,
        attrs: Option<SoakAttrs>,
    ) -> Result<NodeRef<SoakAttrs>, NodeCacheError> {
        root.find_or_create(dir.as_bytes(), None)?
            .find_or_create(file.as_bytes(), attrs)
    }

    fn create(
        &self,
        root: &NodeRef<SoakAttrs>,
        dir: &str,
        file: &str,
        version: SoakAttrs,
    ) -> Result<(), NodeCacheError> {
        Self::child(root, dir, file, Some(version))?;
        Counters::bump(&self.counters.lookups, 1);
        Ok(())
    }

    fn probe(
        &self,
        root: &NodeRef<SoakAttrs>,
        dir: &str,
        file: &str,
    ) -> Result<(), NodeCacheError> {
        let found = match root.find_only(dir.as_bytes())? {
            Some(dir) => dir.find_only(file.as_bytes())?,
            None => None,
        };
        match found {
            Some(_) => Counters::bump(&self.counters.probe_hits, 1),
            None => Counters::bump(&self.counters.probe_misses, 1),
        }
        Ok(())
    }

    fn hold(
        &mut self,
        root: &NodeRef<SoakAttrs>,
        dir: &str,
        file: &str,
    ) -> Result<(), NodeCacheError> {
        let node = Self::child(root, dir, file, None)?;
        if self.held.len() >= MAX_HELD {
            drop(self.held.swap_remove(0));
        }
        self.held.push(node);
        Ok(())
    }

    fn prune(&self, root: &NodeRef<SoakAttrs>, dir: &str) -> Result<(), NodeCacheError> {
        if let Some(dir) = root.find_only(dir.as_bytes())? {
            let n = dir.invalidate_subtree();
            Counters::bump(&self.counters.pruned, n as u64);
        }
        Ok(())
    }

    fn fault(
        &self,
        root: &NodeRef<SoakAttrs>,
        dir: &str,
        file: &str,
        unhash: bool,
    ) -> Result<(), NodeCacheError> {
        let node = Self::child(root, dir, file, None)?;
        if unhash {
            node.unhash();
            Counters::bump(&self.counters.unhashed, 1);
        } else {
            node.mark_error();
        }
        Ok(())
    }
}
