use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::runtime::Runtime;
use uuid::Uuid;

use fencelock::{FencingToken, LeaseRecord, LockConfig, LockKey, LockResource, MemoryStore, SqliteStore, Store};

fn create_sqlite_store() -> (SqliteStore, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file.path().to_str().unwrap().to_string();
    let store = SqliteStore::open(&db_path, "distributed_locks").unwrap();
    (store, temp_file)
}

fn record(name: &str) -> LeaseRecord {
    LeaseRecord::new(
        LockKey::with_sort(name, "bench").unwrap(),
        FencingToken::generate(),
        Duration::from_secs(10),
        "bench",
    )
}

// Store primitives, one backend at a time

fn bench_store_get(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let memory: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let (sqlite, _file) = create_sqlite_store();
    let sqlite: Arc<dyn Store> = Arc::new(sqlite);

    let mut group = c.benchmark_group("store_get");
    for (backend, store) in [("memory", memory), ("sqlite", sqlite)] {
        let seeded = record("get");
        rt.block_on(store.create_if_absent(&seeded)).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(backend), &store, |b, store| {
            b.to_async(&rt)
                .iter(|| async { black_box(store.get(&seeded.key).await.unwrap()) })
        });
    }
    group.finish();
}

fn bench_store_create_if_absent(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let memory: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let (sqlite, _file) = create_sqlite_store();
    let sqlite: Arc<dyn Store> = Arc::new(sqlite);

    let mut group = c.benchmark_group("store_create_if_absent");
    for (backend, store) in [("memory", memory), ("sqlite", sqlite)] {
        group.bench_with_input(BenchmarkId::new("fresh", backend), &store, |b, store| {
            b.to_async(&rt).iter(|| async {
                let fresh = record(&format!("create-{}", Uuid::new_v4()));
                black_box(store.create_if_absent(&fresh).await.unwrap())
            })
        });

        let existing = record("existing");
        rt.block_on(store.create_if_absent(&existing)).unwrap();
        group.bench_with_input(BenchmarkId::new("existing", backend), &store, |b, store| {
            b.to_async(&rt)
                .iter(|| async { black_box(store.create_if_absent(&existing).await.unwrap()) })
        });
    }
    group.finish();
}

fn bench_store_conditional_update(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let memory: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let (sqlite, _file) = create_sqlite_store();
    let sqlite: Arc<dyn Store> = Arc::new(sqlite);

    let mut group = c.benchmark_group("store_update_token_if_matches");
    group.throughput(Throughput::Elements(1));
    for (backend, store) in [("memory", memory), ("sqlite", sqlite)] {
        let seeded = record("update");
        rt.block_on(store.create_if_absent(&seeded)).unwrap();

        // Each iteration renews from the token the previous one wrote.
        group.bench_with_input(BenchmarkId::new("matching", backend), &store, |b, store| {
            let mut held = seeded.fencing_token;
            b.iter(|| {
                let next = FencingToken::generate();
                let outcome = rt
                    .block_on(store.update_token_if_matches(&seeded.key, &held, &next, "bench"))
                    .unwrap();
                held = next;
                black_box(outcome)
            })
        });

        let stale = FencingToken::generate();
        group.bench_with_input(BenchmarkId::new("stale", backend), &store, |b, store| {
            b.to_async(&rt).iter(|| async {
                black_box(
                    store
                        .update_token_if_matches(&seeded.key, &stale, &FencingToken::generate(), "bench")
                        .await
                        .unwrap(),
                )
            })
        });
    }
    group.finish();
}

fn bench_fencing_token_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("fencing_token");
    group.throughput(Throughput::Elements(1));
    group.bench_function("generate", |b| b.iter(|| black_box(FencingToken::generate())));
    group.finish();
}

// Full acquire/release cycle on an uncontended key. Paused time would distort
// the measurement, so the lease is kept tiny instead.
fn bench_uncontended_cycle(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let config = LockConfig::new(Duration::from_millis(2), Duration::from_millis(1), "bench");
    let lock = rt
        .block_on(LockResource::new(store, LockKey::partition("cycle").unwrap(), config))
        .unwrap();

    let mut group = c.benchmark_group("lock_cycle");
    group.sample_size(20);
    group.bench_function("acquire_release_and_wait", |b| {
        b.to_async(&rt).iter(|| async {
            let token = lock.acquire().await.unwrap();
            lock.release_and_wait().await.unwrap();
            black_box(token)
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_store_get,
    bench_store_create_if_absent,
    bench_store_conditional_update,
    bench_fencing_token_generation,
    bench_uncontended_cycle,
);
criterion_main!(benches);
