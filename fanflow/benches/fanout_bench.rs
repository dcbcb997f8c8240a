//! Benchmarks for the fan-out executor and item generation.

use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::time::Duration;

use fanflow::fanout::{FanOutExecutor, NoOpWorker, Worker};
use fanflow::generator::generate;
use fanflow::utils::fixed_offset;

fn generate_benchmark(c: &mut Criterion) {
    let offset = fixed_offset(9).unwrap();
    let now = Utc.timestamp_opt(1_704_067_200, 0).unwrap().with_timezone(&offset);

    c.bench_function("generate_100", |b| {
        b.iter(|| black_box(generate(black_box(now), 100)));
    });
}

fn fan_out_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let items = generate(Utc::now().with_timezone(&fixed_offset(9).unwrap()), 100);
    let worker: Arc<dyn Worker> = Arc::new(NoOpWorker);

    let mut group = c.benchmark_group("fan_out");
    for limit in [1usize, 2, 8] {
        let executor = FanOutExecutor::new(limit, Duration::from_secs(60));
        group.bench_with_input(BenchmarkId::from_parameter(limit), &limit, |b, _| {
            b.to_async(&runtime)
                .iter(|| executor.run(items.clone(), worker.clone()));
        });
    }
    group.finish();
}

criterion_group!(benches, generate_benchmark, fan_out_benchmark);
criterion_main!(benches);
