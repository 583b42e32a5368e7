use asynq_core::{CallRunner, Deferred, Kwargs, PendingSet};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

fn bench_put_and_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("pending_set");

    for size in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("put_drain", size), &size, |b, &size| {
            b.iter(|| {
                let set = PendingSet::new();
                let handles: Vec<Deferred<usize>> = (0..size).map(|_| Deferred::new()).collect();
                for h in &handles {
                    set.put(h);
                }
                let all = set.defer_to_all();
                for (i, h) in handles.iter().enumerate() {
                    h.resolve(i);
                }
                black_box(all.is_resolved())
            });
        });
    }

    group.finish();
}

fn bench_waiters(c: &mut Criterion) {
    c.bench_function("fewer_waiters_64", |b| {
        b.iter(|| {
            let set = PendingSet::new();
            let handles: Vec<Deferred<()>> = (0..64).map(|_| Deferred::new()).collect();
            for h in &handles {
                set.put(h);
            }
            let waits: Vec<_> = (1..64)
                .map(|n| set.defer_until_fewer(n).unwrap())
                .collect();
            for h in &handles {
                h.resolve(());
            }
            black_box(waits.iter().all(|w| w.is_resolved()))
        });
    });
}

fn bench_invoke(c: &mut Criterion) {
    let divide = |args: &asynq_core::Args, _: &Kwargs| -> Result<asynq_core::Value, asynq_core::CallError> {
        Ok(json!(args[0].as_i64().unwrap_or(0) / 2))
    };
    let args = vec![json!(1000)];
    let kwargs = Kwargs::new();

    let plain = CallRunner::new(false);
    c.bench_function("invoke", |b| {
        b.iter(|| plain.invoke(&divide, black_box(&args), &kwargs))
    });

    let timed = CallRunner::new(true);
    c.bench_function("invoke_with_stats", |b| {
        b.iter(|| timed.invoke(&divide, black_box(&args), &kwargs));
        timed.take_stats();
    });
}

criterion_group!(benches, bench_put_and_drain, bench_waiters, bench_invoke);
criterion_main!(benches);
