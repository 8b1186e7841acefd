use bucketsync_lib::core::fingerprint::fingerprint_reader;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::io::Cursor;

const CHUNK_SIZE: usize = 8 * 1024 * 1024;

fn bench_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");
    group.sample_size(10);

    for size in [64 * 1024, CHUNK_SIZE, 3 * CHUNK_SIZE + 1] {
        let data = vec![0x5au8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| fingerprint_reader(Cursor::new(black_box(data)), CHUNK_SIZE))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fingerprint);
criterion_main!(benches);
