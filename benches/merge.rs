use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use hashequiv::{EquivalenceEngine, InMemoryEquivalenceStore, TaskMetadata};

const SEEDED_CLASSES: usize = 4096;

fn make_engine_with_data() -> EquivalenceEngine {
    let engine = EquivalenceEngine::new(Arc::new(InMemoryEquivalenceStore::new()));

    // Seed classes with a few members each so lookups measure realistic work.
    for o in 0..SEEDED_CLASSES {
        for t in 0..4 {
            engine
                .merge(
                    "TestMethod",
                    &format!("out-{o}"),
                    &format!("task-{o}-{t}"),
                    &format!("uni-{o}-{t}"),
                    TaskMetadata::default(),
                )
                .unwrap();
        }
    }
    engine
}

fn bench_resolve(c: &mut Criterion) {
    let engine = make_engine_with_data();
    let mut group = c.benchmark_group("resolve");
    group.throughput(Throughput::Elements(1));

    let mut i = 0usize;
    group.bench_function("hit", |b| {
        b.iter(|| {
            i = (i + 1) % SEEDED_CLASSES;
            engine.resolve("TestMethod", &format!("task-{i}-2")).unwrap()
        });
    });
    group.bench_function("miss", |b| {
        b.iter(|| engine.resolve("TestMethod", "task-unknown").unwrap());
    });
    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");
    group.throughput(Throughput::Elements(1));

    group.bench_function("existing", |b| {
        let engine = make_engine_with_data();
        b.iter(|| {
            engine
                .merge("TestMethod", "out-7", "task-7-0", "x", TaskMetadata::default())
                .unwrap()
        });
    });

    group.bench_function("inherit", |b| {
        b.iter_batched(
            make_engine_with_data,
            |engine| {
                for o in 0..64 {
                    engine
                        .merge(
                            "TestMethod",
                            &format!("out-{o}"),
                            &format!("task-{o}-new"),
                            "x",
                            TaskMetadata::default(),
                        )
                        .unwrap();
                }
            },
            BatchSize::LargeInput,
        );
    });
    group.finish();
}

#[cfg(feature = "persistent")]
fn bench_persistent_merge(c: &mut Criterion) {
    use hashequiv::{open_database, PersistentConfig};

    let dir = tempfile::tempdir().unwrap();
    let config = PersistentConfig {
        sync_on_write: false,
        ..PersistentConfig::default()
    };
    let engine = EquivalenceEngine::new(Arc::new(open_database(dir.path(), Some(config)).unwrap()));

    let mut n = 0u64;
    c.bench_function("merge/persistent_created", |b| {
        b.iter(|| {
            n += 1;
            engine
                .merge(
                    "TestMethod",
                    &format!("out-{n}"),
                    &format!("task-{n}"),
                    "uni",
                    TaskMetadata::default(),
                )
                .unwrap()
        });
    });
}

#[cfg(not(feature = "persistent"))]
fn bench_persistent_merge(_c: &mut Criterion) {}

criterion_group!(benches, bench_resolve, bench_merge, bench_persistent_merge);
criterion_main!(benches);
