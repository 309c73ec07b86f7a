use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lt_core::images::compute_referenced_set;

fn referenced_set_bench(c: &mut Criterion) {
    let records: Vec<serde_json::Value> = (0..5_000)
        .map(|i| {
            serde_json::json!({
                "id": format!("log-{i}"),
                "images": [format!("img-{}.jpg", i % 700), format!("img-{}.png", i % 13)]
            })
        })
        .collect();
    c.bench_function("referenced_set_5k_logs", |b| {
        b.iter(|| compute_referenced_set(black_box(&records)));
    });
}

criterion_group!(benches, referenced_set_bench);
criterion_main!(benches);
