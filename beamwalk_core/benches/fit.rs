use beamwalk_core::{Document, LinearFit};
use criterion::{Criterion, black_box, criterion_group, criterion_main};

fn bench_ingest(c: &mut Criterion) {
    c.bench_function("linear_fit_ingest_1k", |b| {
        b.iter(|| {
            let mut fit = LinearFit::new("centroid", "pitch");
            for i in 0..1000 {
                let x = i as f64 * 1e-4;
                let doc: Document = [
                    ("pitch".to_string(), x),
                    ("centroid".to_string(), -8000.0 * x + 300.0),
                ]
                .into_iter()
                .collect();
                fit.ingest(&doc);
            }
            black_box(fit.result().copied())
        })
    });

    c.bench_function("linear_fit_backsolve", |b| {
        let mut fit = LinearFit::new("centroid", "pitch");
        for i in 0..100 {
            let x = i as f64 * 1e-4;
            let doc: Document = [
                ("pitch".to_string(), x),
                ("centroid".to_string(), -8000.0 * x + 300.0),
            ]
            .into_iter()
            .collect();
            fit.ingest(&doc);
        }
        b.iter(|| black_box(fit.backsolve(black_box(240.0)).unwrap()))
    });
}

criterion_group!(benches, bench_ingest);
criterion_main!(benches);
