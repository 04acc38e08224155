//! Inference benchmark: aligned vector → scorer, without a model on disk.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use netwatch_ingest::model::{OnnxScorer, Scorer};
use netwatch_ingest::synth;
use std::path::Path;

fn bench_score_no_model(c: &mut Criterion) {
    let dim = synth::reference_features().len();
    let scorer = OnnxScorer::load(Path::new("nonexistent.onnx"), dim, 0.5).unwrap();
    let features = vec![0.1f32; dim];

    c.bench_function("score_no_model_kdd", |b| {
        b.iter(|| scorer.score(black_box(&features)))
    });
}

fn bench_score_by_dim(c: &mut Criterion) {
    let mut g = c.benchmark_group("score_by_dim");
    for d in [16, 64, 128, 256] {
        let scorer = OnnxScorer::disabled(d);
        let features = vec![0.1f32; d];
        g.bench_function(format!("dim_{}", d).as_str(), |b| {
            b.iter(|| scorer.score(black_box(&features)))
        });
    }
    g.finish();
}

criterion_group!(benches, bench_score_no_model, bench_score_by_dim);
criterion_main!(benches);
