#![allow(missing_docs)]
use camio::timing::{BlankingBounds, SensorGeometry, TimingModel};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn reference_model() -> TimingModel {
    let geometry = SensorGeometry::new(1280, 1024).expect("valid geometry");
    TimingModel::new(96_000_000.0, geometry, BlankingBounds::default()).expect("valid model")
}

fn bench_solve_blanking(c: &mut Criterion) {
    let model = reference_model();
    let mut group = c.benchmark_group("solve_blanking");
    for &hz in &[60.0f64, 30.0, 10.0, 2.0] {
        // Throughput: vertical blanks evaluated by the search.
        let candidates = model.solve_blanking(hz).map_or(0, |s| s.candidates);
        group.throughput(Throughput::Elements(candidates));
        group.bench_with_input(BenchmarkId::from_parameter(hz), &hz, |b, &hz| {
            b.iter(|| black_box(model.solve_blanking(black_box(hz))))
        });
    }
    group.finish();
}

fn bench_exposure_split(c: &mut Criterion) {
    let model = reference_model();
    c.bench_function("split_exposure", |b| {
        b.iter(|| {
            let pixels = model.exposure_pixels(black_box(5.0)).unwrap_or(0);
            black_box(model.split_exposure(pixels, black_box(61)))
        })
    });
}

criterion_group!(benches, bench_solve_blanking, bench_exposure_split);
criterion_main!(benches);
