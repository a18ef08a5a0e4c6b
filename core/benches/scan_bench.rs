use std::sync::atomic::AtomicBool;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use mscanner_core::{scan, FeatureIndexWriter, ScanConfig};

const NUM_DOCS: u64 = 100_000;
const NUM_FEATURES: usize = 50_000;

fn bench_scan(c: &mut Criterion) {
    use rand::{rngs::StdRng, Rng, SeedableRng};
    let mut rng = StdRng::seed_from_u64(42);

    let dir = tempfile::tempdir().unwrap();
    let index = dir.path().join("features.idx");
    let mut writer = FeatureIndexWriter::create(&index).unwrap();
    for docid in 1..=NUM_DOCS {
        let mut features: Vec<u32> = (0..15)
            .map(|_| rng.gen_range(0..NUM_FEATURES as u32))
            .collect();
        features.sort_unstable();
        features.dedup();
        writer
            .append(docid as u32, 20050101 + (docid % 365) as u32, &features)
            .unwrap();
    }
    writer.finish().unwrap();

    let scores: Vec<f32> = (0..NUM_FEATURES)
        .map(|_| rng.gen_range(-2.0f32..2.0))
        .collect();
    let cancel = AtomicBool::new(false);

    let mut group = c.benchmark_group("scan");
    group.throughput(Throughput::Elements(NUM_DOCS));
    group.sample_size(10);
    group.bench_function("sequential_100k", |b| {
        b.iter(|| {
            let config = ScanConfig::new(0.0, 1000);
            scan(&index, &scores, &config, &cancel).unwrap()
        })
    });
    group.bench_function("parallel_100k", |b| {
        b.iter(|| {
            let mut config = ScanConfig::new(0.0, 1000);
            config.threads = 4;
            scan(&index, &scores, &config, &cancel).unwrap()
        })
    });
    group.finish();
}

criterion_group!(benches, bench_scan);
criterion_main!(benches);
