//! Benchmarks for KeelKV store operations

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use keelkv::config::{CompactionPolicy, Config};
use keelkv::Store;
use tempfile::TempDir;

fn open_store(dir: &TempDir) -> Store<Vec<u8>> {
    let config = Config::builder()
        .data_dir(dir.path())
        .compaction(CompactionPolicy::Manual)
        .build();
    Store::open(config).unwrap()
}

fn store_benchmarks(c: &mut Criterion) {
    // Every create is an fsync, so this measures the durability point.
    c.bench_function("create_fsync", |b| {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let mut i = 0u64;
        b.iter(|| {
            store.create(&format!("key{:012}", i), vec![0u8; 128]).unwrap();
            i += 1;
        });
    });

    c.bench_function("read_hit", |b| {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        for i in 0..1000 {
            store.create(&format!("key{:04}", i), vec![1u8; 128]).unwrap();
        }
        let mut i = 0usize;
        b.iter(|| {
            let value = store.read(&format!("key{:04}", i % 1000)).unwrap();
            i += 1;
            value
        });
    });

    c.bench_function("reopen_1000_records", |b| {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir);
            for i in 0..1000 {
                store.create(&format!("key{:04}", i), vec![2u8; 64]).unwrap();
            }
            store.close().unwrap();
        }
        b.iter_batched(
            || (),
            |_| open_store(&dir),
            BatchSize::SmallInput,
        );
    });

    c.bench_function("compact_1000_keys", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let store = open_store(&dir);
                for i in 0..1000 {
                    store.create(&format!("key{:04}", i), vec![3u8; 64]).unwrap();
                }
                (dir, store)
            },
            |(_dir, store)| store.compact().unwrap(),
            BatchSize::PerIteration,
        );
    });
}

criterion_group!(benches, store_benchmarks);
criterion_main!(benches);
