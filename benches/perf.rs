use std::fs;
use std::path::PathBuf;

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use nba_over::features::FeatureBuilder;
use nba_over::{PredictionEngine, normalize};

fn fixture() -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push("game_log.csv");
    fs::read_to_string(path).expect("fixture file should be readable")
}

fn bench_normalize(c: &mut Criterion) {
    let raw = fixture();
    c.bench_function("normalize_game_log", |b| {
        b.iter(|| {
            let games = normalize(black_box(&raw)).unwrap();
            black_box(games.len());
        })
    });
}

fn bench_features(c: &mut Criterion) {
    let games = normalize(&fixture()).unwrap();
    let recent = &games[games.len().saturating_sub(35)..];
    c.bench_function("feature_frame_three_lines", |b| {
        b.iter(|| {
            let builder = FeatureBuilder::new(black_box(recent));
            for line in [22.5, 24.5, 26.5] {
                black_box(builder.frame(line).into_complete().len());
            }
        })
    });
}

fn bench_ensemble_predict(c: &mut Criterion) {
    let games = normalize(&fixture()).unwrap();
    let engine = PredictionEngine::default();
    let mut group = c.benchmark_group("ensemble");
    group.sample_size(10);
    group.bench_function("predict_one_line", |b| {
        b.iter(|| {
            engine.reset_cache();
            let out = engine.predict(black_box(&games), 24.5);
            black_box(out.probability);
        })
    });
    group.finish();
}

criterion_group!(benches, bench_normalize, bench_features, bench_ensemble_predict);
criterion_main!(benches);
