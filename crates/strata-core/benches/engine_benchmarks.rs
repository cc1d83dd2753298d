use criterion::{criterion_group, criterion_main, Criterion};
use strata_core::{CancelToken, Engine, EngineConfig, Snapshotter};

fn open_engine(dir: &tempfile::TempDir) -> Engine {
    Engine::open(EngineConfig::new(dir.path())).unwrap()
}

/// Store with a committed chain `c0 <- c1 <- ... <- c{depth-1}`.
fn chained_engine(depth: usize) -> (tempfile::TempDir, Engine, String) {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);
    let cancel = CancelToken::new();
    let mut parent = String::new();
    for i in 0..depth {
        let active = format!("a{i}");
        let name = format!("c{i}");
        engine.prepare(&cancel, &active, &parent).unwrap();
        engine.commit(&cancel, &name, &active).unwrap();
        parent = name;
    }
    (dir, engine, parent)
}

fn bench_prepare_base(c: &mut Criterion) {
    c.bench_function("engine_prepare_base", |b| {
        b.iter_with_setup(
            || {
                let dir = tempfile::tempdir().unwrap();
                let engine = open_engine(&dir);
                (dir, engine)
            },
            |(_dir, engine)| {
                engine.prepare(&CancelToken::new(), "L1", "").unwrap();
            },
        );
    });
}

fn bench_prepare_commit(c: &mut Criterion) {
    c.bench_function("engine_prepare_commit", |b| {
        b.iter_with_setup(
            || chained_engine(1),
            |(_dir, engine, parent)| {
                let cancel = CancelToken::new();
                engine.prepare(&cancel, "work", &parent).unwrap();
                engine.commit(&cancel, "layer", "work").unwrap();
            },
        );
    });
}

fn bench_mounts_deep_chain(c: &mut Criterion) {
    let (_dir, engine, parent) = chained_engine(16);
    engine
        .prepare(&CancelToken::new(), "top", &parent)
        .unwrap();
    c.bench_function("engine_mounts_depth16", |b| {
        b.iter(|| {
            let mounts = engine.mounts("top").unwrap();
            assert_eq!(mounts.len(), 17);
        });
    });
}

fn bench_stat(c: &mut Criterion) {
    let (_dir, engine, parent) = chained_engine(1);
    c.bench_function("engine_stat", |b| {
        b.iter(|| engine.stat(&parent).unwrap());
    });
}

fn bench_walk_100(c: &mut Criterion) {
    let (_dir, engine, parent) = chained_engine(1);
    let cancel = CancelToken::new();
    for i in 0..100 {
        engine.view(&cancel, &format!("v{i}"), &parent).unwrap();
    }
    c.bench_function("engine_walk_100", |b| {
        b.iter(|| {
            let mut n = 0;
            engine
                .walk(&mut |_| {
                    n += 1;
                    Ok(())
                })
                .unwrap();
            assert_eq!(n, 101);
        });
    });
}

criterion_group!(
    benches,
    bench_prepare_base,
    bench_prepare_commit,
    bench_mounts_deep_chain,
    bench_stat,
    bench_walk_100,
);
criterion_main!(benches);
