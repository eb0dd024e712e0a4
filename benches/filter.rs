use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use chronycle::{FilterPolicy, RecorderConfig};

fn bench_filter_decision(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter");

    for excludes in [0, 10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(excludes), &excludes, |b, &n| {
            let config = RecorderConfig::new("k")
                .with_endpoints(["/api/"])
                .with_exclude((0..n).map(|i| format!("/api/internal/{i}")));
            let policy = FilterPolicy::new(&config).unwrap();

            b.iter(|| {
                policy.should_record_with_draw(
                    black_box("https://shop.example.com/api/orders?page=2"),
                    black_box(0.0),
                )
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_filter_decision);
criterion_main!(benches);
