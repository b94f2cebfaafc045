// Read performance benchmarks for disktable

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use disktable::{Table, TableIterator, TableOptions, TtlType};
use std::collections::BTreeMap;
use std::hint::black_box;
use tempfile::TempDir;

const KEYS: u64 = 1000;
const VERSIONS: u64 = 10;

fn setup_table(ttl: u64, ttl_type: TtlType) -> (TempDir, Table) {
    let temp_dir = TempDir::new().unwrap();
    let table = Table::new("bench", 1, 0, BTreeMap::new(), ttl, ttl_type, TableOptions::new(temp_dir.path()));
    table.init().unwrap();

    for k in 0..KEYS {
        let key = format!("key{:08}", k);
        for ts in 0..VERSIONS {
            table.put(key.as_bytes(), ts, b"value").unwrap();
        }
    }

    (temp_dir, table)
}

fn benchmark_point_get(c: &mut Criterion) {
    let (_dir, table) = setup_table(0, TtlType::AbsoluteTime);
    let mut group = c.benchmark_group("point_get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("hit", |b| {
        use rand::Rng;
        let mut rng = rand::rng();
        b.iter(|| {
            let key = format!("key{:08}", rng.random_range(0..KEYS));
            let value = table.get(key.as_bytes(), rng.random_range(0..VERSIONS)).unwrap();
            black_box(value);
        });
    });

    group.bench_function("miss", |b| {
        b.iter(|| {
            let value = table.get(b"absent", 0).unwrap();
            black_box(value);
        });
    });

    group.finish();
}

fn benchmark_point_iterator(c: &mut Criterion) {
    let (_dir, table) = setup_table(0, TtlType::AbsoluteTime);

    c.bench_function("point_iterator_all_versions", |b| {
        b.iter(|| {
            let mut it = table.new_iterator(b"key00000500").unwrap();
            it.seek_to_first();
            while it.valid() {
                black_box(it.value());
                it.next();
            }
        });
    });
}

fn benchmark_traverse(c: &mut Criterion) {
    let mut group = c.benchmark_group("traverse");
    group.throughput(Throughput::Elements(KEYS * VERSIONS));

    for (name, ttl, ttl_type) in [
        ("no_ttl", 0, TtlType::AbsoluteTime),
        ("latest_3", 3, TtlType::LatestTime),
        ("absolute", 1, TtlType::AbsoluteTime),
    ] {
        let (_dir, table) = setup_table(ttl, ttl_type);
        group.bench_with_input(BenchmarkId::from_parameter(name), &table, |b, table| {
            b.iter(|| {
                let mut it = table.new_traverse_iterator_at(0, 60_000 + 5).unwrap();
                it.seek_to_first();
                let mut n = 0u64;
                while it.valid() {
                    n += 1;
                    it.next();
                }
                black_box(n);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_point_get, benchmark_point_iterator, benchmark_traverse);
criterion_main!(benches);
