//! Storage benchmark: batched transactional inserts and recent-row reads.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use netwatch_ingest::features::EncodedRecord;
use netwatch_ingest::model::Prediction;
use netwatch_ingest::schema::ReferenceSchema;
use netwatch_ingest::storage::{BatchSource, ScoredRecord, SqliteStore};
use netwatch_ingest::synth;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn records(schema: &ReferenceSchema, n: usize) -> Vec<ScoredRecord> {
    (0..n)
        .map(|i| ScoredRecord {
            encoded: EncodedRecord {
                line: i + 1,
                values: vec![0.5; schema.len()],
            },
            prediction: Prediction::checked("normal.".to_string(), 0.9).unwrap(),
        })
        .collect()
}

fn bench_insert_batch(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let schema = Arc::new(ReferenceSchema::new("kdd99-onehot", synth::reference_features()).unwrap());
    let store = SqliteStore::open(&dir.path().join("store.db"), Arc::clone(&schema), Duration::from_secs(5)).unwrap();

    let mut g = c.benchmark_group("insert_batch");
    for n in [10, 100, 1_000] {
        let batch = records(&schema, n);
        let mut seq = 0u64;
        g.bench_function(format!("rows_{}", n).as_str(), |b| {
            b.iter_batched(
                || {
                    seq += 1;
                    BatchSource::new(format!("bench_{n}_{seq}.csv"), &seq.to_le_bytes())
                },
                |source| black_box(store.insert_batch(&source, &batch)).unwrap(),
                BatchSize::SmallInput,
            )
        });
    }
    g.finish();
}

fn bench_recent(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let schema = Arc::new(ReferenceSchema::new("kdd99-onehot", synth::reference_features()).unwrap());
    let store = SqliteStore::open(&dir.path().join("store.db"), Arc::clone(&schema), Duration::from_secs(5)).unwrap();
    store
        .insert_batch(&BatchSource::new("seed.csv", b"seed"), &records(&schema, 1_000))
        .unwrap();

    c.bench_function("recent_100", |b| {
        b.iter(|| black_box(store.recent(100, None)).unwrap())
    });
    c.bench_function("recent_100_tcp", |b| {
        b.iter(|| black_box(store.recent(100, Some("protocol_type_tcp"))).unwrap())
    });
}

criterion_group!(benches, bench_insert_batch, bench_recent);
criterion_main!(benches);
