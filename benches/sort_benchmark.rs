use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use binsort_rs::sort::{
    generate, Comparator, KeySpec, KeyType, SortEngine, SortOrder,
};

const RECORD_LEN: usize = 16;

fn make_keys() -> Vec<KeySpec> {
    vec![
        KeySpec {
            position: 1,
            length: 4,
            ty: KeyType::LittleEndianInt,
            order: SortOrder::Ascending,
        },
        KeySpec {
            position: 5,
            length: 4,
            ty: KeyType::BigEndianInt,
            order: SortOrder::Descending,
        },
    ]
}

/// Deterministic pseudo-random record data.
fn make_data(records: usize) -> Vec<u8> {
    let mut state = 0x9E3779B97F4A7C15u64;
    (0..records * RECORD_LEN)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect()
}

fn bench_comparator(c: &mut Criterion) {
    let keys = make_keys();
    let jit = generate(&keys, RECORD_LEN);
    let interp = Comparator::interpreted(keys.clone(), RECORD_LEN);
    let data = make_data(2);
    let (a, b) = data.split_at(RECORD_LEN);

    let mut group = c.benchmark_group("comparator");
    group.bench_function("jit", |bench| bench.iter(|| jit.compare(a, b)));
    group.bench_function("interpreted", |bench| bench.iter(|| interp.compare(a, b)));
    group.finish();
}

fn bench_sort(c: &mut Criterion) {
    let keys = make_keys();
    let sizes = [10_000usize, 100_000, 1_000_000];

    let mut group = c.benchmark_group("sort");
    group.sample_size(10);
    for &records in &sizes {
        let data = make_data(records);
        group.throughput(Throughput::Bytes(data.len() as u64));
        for threads in [1usize, 4] {
            let engine = SortEngine::new(&keys, RECORD_LEN, threads).unwrap();
            group.bench_with_input(
                BenchmarkId::new(format!("t{}", threads), records),
                &data,
                |bench, data| {
                    bench.iter(|| {
                        let mut copy = data.clone();
                        engine.sort(&mut copy).unwrap();
                        copy
                    });
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_comparator, bench_sort);
criterion_main!(benches);
