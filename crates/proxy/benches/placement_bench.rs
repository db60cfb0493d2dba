//! Benchmarks for the proxy layer: placement and the coordinator.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

// ────────────────────────── Placement benchmarks ──────────────────────────

fn bench_place(c: &mut Criterion) {
    use hrw_proxy::placement::place;

    let mut group = c.benchmark_group("place");
    for n_storages in [3, 16, 64] {
        let storages: Vec<String> = (0..n_storages)
            .map(|i| format!("storage-{}:3000", i))
            .collect();
        group.bench_with_input(
            BenchmarkId::from_parameter(n_storages),
            &storages,
            |b, storages| {
                let mut i = 0u64;
                b.iter(|| {
                    let key = format!("/bucket/object_{}", i);
                    black_box(place(key.as_bytes(), storages, 3, 1));
                    i += 1;
                });
            },
        );
    }
    group.finish();
}

fn bench_place_substorages(c: &mut Criterion) {
    use hrw_proxy::placement::place;

    let storages: Vec<String> = (0..16).map(|i| format!("storage-{}:3000", i)).collect();
    c.bench_function("place_16_sv10", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("/bucket/object_{}", i);
            black_box(place(key.as_bytes(), &storages, 3, 10));
            i += 1;
        });
    });
}

// ────────────────────────── Coordinator benchmarks ──────────────────────────

fn coordinator(
    dir: &tempfile::TempDir,
) -> hrw_proxy::Coordinator<hrw_proxy::memory::MemoryStorage> {
    use hrw_index::wal::FsyncPolicy;
    use hrw_index::LocalIndex;
    use hrw_proxy::lock_table::KeyLocks;
    use hrw_proxy::memory::MemoryStorage;
    use hrw_proxy::{Coordinator, Layout};
    use std::sync::Arc;
    use std::time::Duration;

    let storages: Vec<String> = (0..5).map(|i| format!("storage-{}:3000", i)).collect();
    Coordinator::new(
        Layout::new(storages, 3, 1),
        LocalIndex::open(dir.path(), FsyncPolicy::None).unwrap(),
        KeyLocks::new(),
        Arc::new(MemoryStorage::new()),
        Duration::from_secs(1),
    )
}

fn bench_coordinator_write(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("coordinator_write", |b| {
        let dir = tempfile::TempDir::new().unwrap();
        let coord = coordinator(&dir);

        let mut i = 0u64;
        b.iter(|| {
            rt.block_on(async {
                let key = format!("/key_{}", i);
                coord
                    .write(key.as_bytes(), bytes::Bytes::from_static(b"value"))
                    .await
                    .unwrap();
            });
            i += 1;
        });
    });
}

fn bench_coordinator_read(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let dir = tempfile::TempDir::new().unwrap();
    let coord = coordinator(&dir);

    // Pre-populate 1000 keys
    rt.block_on(async {
        for i in 0..1000 {
            coord
                .write(
                    format!("/key_{:04}", i).as_bytes(),
                    bytes::Bytes::from_static(b"value"),
                )
                .await
                .unwrap();
        }
    });

    c.bench_function("coordinator_read", |b| {
        let mut i = 0u64;
        b.iter(|| {
            rt.block_on(async {
                let key = format!("/key_{:04}", i % 1000);
                black_box(coord.read(key.as_bytes()).await.unwrap());
            });
            i += 1;
        });
    });
}

criterion_group!(
    benches,
    bench_place,
    bench_place_substorages,
    bench_coordinator_write,
    bench_coordinator_read,
);
criterion_main!(benches);
