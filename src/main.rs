//! Hammer the node cache from many threads and report what happened.
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use fusenode::FusenodeConfig;

mod soak;
mod trc;

use crate::soak::SoakPlan;
use crate::trc::Trc;

#[derive(Parser)]
#[command(version, about = "Soak test for the fusenode node cache.")]
struct Args {
    #[arg(short, long, help = "Optional path to a fusenode config TOML.")]
    config: Option<PathBuf>,

    #[arg(short, long, default_value_t = 8, help = "Worker threads.")]
    threads: usize,

    #[arg(short, long, default_value_t = 2, help = "Mounts sharing the pool.")]
    mounts: usize,

    #[arg(long, default_value_t = 1_000_000, help = "Total operations across all workers.")]
    ops: u64,

    #[arg(
        long,
        default_value_t = 64,
        help = "Distinct names per directory level; paths are d<N>/f<N>."
    )]
    paths: usize,

    #[arg(long, help = "Override the pool's node target.")]
    target: Option<usize>,

    #[arg(long, default_value_t = 0, help = "Seed for the per-worker RNGs.")]
    seed: u64,

    #[arg(long, help = "Plain log output, without progress spinners.")]
    ugly: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Load and validate config first; errors use eprintln since tracing isn't initialized yet.
    let mut config = match FusenodeConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    if args.target.is_some() {
        config.pool.node_target = args.target;
    }
    if let Err(error_messages) = config.validate() {
        eprintln!("Configuration is invalid.");
        for msg in &error_messages {
            eprintln!(" - {msg}");
        }
        return ExitCode::FAILURE;
    }

    let trc = if args.ugly {
        Trc::default().ugly()
    } else {
        Trc::default()
    };
    if let Err(e) = trc.init() {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let plan = SoakPlan {
        threads: args.threads,
        mounts: args.mounts,
        ops: args.ops,
        dirs: args.paths,
        files: args.paths,
        seed: args.seed,
    };

    match soak::run(&config, &plan) {
        Ok(report) => {
            info!(
                elapsed = ?report.elapsed,
                lookups = report.lookups,
                probe_hits = report.probe_hits,
                probe_misses = report.probe_misses,
                pruned = report.pruned,
                reclaimed = report.reclaimed,
                unhashed = report.unhashed,
                errors = report.errors,
                evicted = report.evicted,
                busy_at_unmount = report.busy_at_unmount,
                "soak finished"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Soak failed: {e}");
            ExitCode::FAILURE
        }
    }
}
