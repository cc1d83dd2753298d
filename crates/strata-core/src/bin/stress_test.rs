//! Long-running stress test for the Strata snapshot engine.
//!
//! Runs randomized prepare/view/commit/remove cycles from several threads
//! against one store, checking lineage invariants, journal leaks, and
//! orphaned storage after every round.
//!
//! Usage:
//!   cargo run --bin stress_test -- [--cycles N] [--threads N]

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use strata_core::{CancelToken, Engine, EngineConfig, ErrorKind, Snapshotter};

/// xorshift64, seeded per thread. Good enough to shuffle operations.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

fn count_files_in(dir: &Path) -> usize {
    if !dir.exists() {
        return 0;
    }
    fs::read_dir(dir)
        .map(|rd| {
            rd.filter_map(Result::ok)
                .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
                .count()
        })
        .unwrap_or(0)
}

#[derive(Default)]
struct Tally {
    ops: AtomicU64,
    rejected: AtomicU64,
    gave_up: AtomicU64,
}

fn run_worker(engine: &Engine, worker: usize, cycles: usize, tally: &Tally) -> Result<(), String> {
    let cancel = CancelToken::new();
    let mut rng = Rng(0x9E37_79B9_7F4A_7C15 ^ (worker as u64 + 1));
    let mut mine: Vec<String> = Vec::new();

    for cycle in 0..cycles {
        let key = format!("w{worker}-c{cycle}");
        let parent = if rng.below(3) == 0 { "" } else { "base" };

        let result = match rng.below(4) {
            0 => engine.view(&cancel, &key, parent).map(|_| ()),
            1 => engine
                .prepare(&cancel, &key, parent)
                .and_then(|_| engine.commit(&cancel, &format!("{key}-done"), &key))
                .map(|()| mine.push(format!("{key}-done"))),
            _ => engine.prepare(&cancel, &key, parent).map(|_| mine.push(key.clone())),
        };
        tally.ops.fetch_add(1, Ordering::Relaxed);

        match result {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Failed => {
                tally.gave_up.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) if e.kind().is_constraint() => {
                tally.rejected.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => return Err(format!("worker {worker} cycle {cycle}: {e}")),
        }

        if rng.below(2) == 0 && !mine.is_empty() {
            let victim = mine.swap_remove(rng.below(mine.len() as u64) as usize);
            match engine.remove(&cancel, &victim) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::Failed => mine.push(victim),
                Err(e) if e.kind() == ErrorKind::NotEmpty => {
                    tally.rejected.fetch_add(1, Ordering::Relaxed);
                    mine.push(victim);
                }
                Err(e) => return Err(format!("worker {worker} remove {victim}: {e}")),
            }
        }
    }
    Ok(())
}

fn check_health(engine: &Engine, round: usize) -> u64 {
    let mut failures = 0u64;
    match engine.verify() {
        Ok(report) if report.is_clean() => {}
        Ok(report) => {
            for v in &report.violations {
                eprintln!("  round {round}: LINEAGE VIOLATION: {}: {}", v.key, v.reason);
            }
            failures += 1;
        }
        Err(e) => {
            eprintln!("  round {round}: VERIFY ERROR: {e}");
            failures += 1;
        }
    }
    let journal = engine.layout().journal_dir(engine.namespace());
    let leaked = count_files_in(&journal);
    if leaked > 0 {
        eprintln!("  round {round}: JOURNAL LEAK: {leaked} stale entries");
        failures += 1;
    }
    match engine.cleanup() {
        Ok(report) if report.removed.is_empty() => {}
        Ok(report) => {
            eprintln!(
                "  round {round}: STORAGE LEAK: {} orphaned directories",
                report.removed.len()
            );
            failures += 1;
        }
        Err(e) => {
            eprintln!("  round {round}: CLEANUP ERROR: {e}");
            failures += 1;
        }
    }
    failures
}

fn arg_value(args: &[String], flag: &str, default: usize) -> usize {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let cycles = arg_value(&args, "--cycles", 200);
    let threads = arg_value(&args, "--threads", 4);
    let rounds = 5;

    println!("Strata stress test: {rounds} rounds x {threads} threads x {cycles} cycles");
    println!("============================================");

    let store_dir = tempfile::tempdir().expect("create temp dir");
    let engine = Arc::new(Engine::open(EngineConfig::new(store_dir.path())).expect("open engine"));
    let cancel = CancelToken::new();
    engine.prepare(&cancel, "seed", "").expect("prepare seed");
    engine.commit(&cancel, "base", "seed").expect("commit seed");

    let tally = Arc::new(Tally::default());
    let mut failures = 0u64;
    let mut elapsed = Duration::ZERO;

    for round in 0..rounds {
        let t0 = Instant::now();
        let handles: Vec<_> = (0..threads)
            .map(|w| {
                let engine = Arc::clone(&engine);
                let tally = Arc::clone(&tally);
                let worker = round * threads + w;
                thread::spawn(move || run_worker(&engine, worker, cycles, &tally))
            })
            .collect();
        for h in handles {
            match h.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    eprintln!("  {e}");
                    failures += 1;
                }
                Err(_) => {
                    eprintln!("  round {round}: worker panicked");
                    failures += 1;
                }
            }
        }
        elapsed += t0.elapsed();
        failures += check_health(&engine, round);
        println!("  round {round}: {} ops so far", tally.ops.load(Ordering::Relaxed));
    }

    let ops = tally.ops.load(Ordering::Relaxed);
    let counters = engine.counters().snapshot();
    println!();
    println!("============================================");
    println!("Results: {ops} operations, {failures} failures");
    println!(
        "  time: {:.3}s total, {:.3}ms avg",
        elapsed.as_secs_f64(),
        elapsed.as_secs_f64() * 1000.0 / ops.max(1) as f64
    );
    println!(
        "  prepared {} viewed {} committed {} removed {}",
        counters.prepared, counters.viewed, counters.committed, counters.removed
    );
    println!(
        "  conflicts retried {}, gave up {}, rejected {}",
        counters.conflicts_retried,
        tally.gave_up.load(Ordering::Relaxed),
        tally.rejected.load(Ordering::Relaxed)
    );
    match engine.lineage_stats() {
        Ok(stats) => println!(
            "  records: {} ({} active, {} committed, {} views)",
            stats.total, stats.active, stats.committed, stats.views
        ),
        Err(e) => println!("  records: ERROR: {e}"),
    }

    if failures > 0 {
        eprintln!("\nSTRESS TEST FAILED");
        std::process::exit(1);
    } else {
        println!("\nSTRESS TEST PASSED");
    }
}
