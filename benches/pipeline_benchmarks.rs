use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use pipeweld::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

fn bench_linear_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("linear_pipeline");
    let rt = runtime();

    for size in [100u64, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size));

        for capacity in [Capacity::Rendezvous, Capacity::Bounded(64), Capacity::Unbounded] {
            group.bench_with_input(
                BenchmarkId::new(format!("square/{capacity}"), size),
                size,
                |b, &size| {
                    b.iter(|| {
                        rt.block_on(async {
                            let config = PipelineConfig::default().capacity(capacity);
                            let (pipeline, _token) = Pipeline::with_config(config).unwrap();
                            let squares =
                                pipeline.transform(pipeline.source(0..size), |n| black_box(n * n));
                            let out = squares.drain().await;
                            pipeline.join().await.unwrap();
                            out.len()
                        })
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out_merge");
    let rt = runtime();

    for width in [1usize, 2, 4, 8].iter() {
        group.throughput(Throughput::Elements(10000));
        group.bench_with_input(BenchmarkId::new("parallel", width), width, |b, &width| {
            b.iter(|| {
                rt.block_on(async {
                    let config = PipelineConfig::default().capacity(Capacity::Bounded(64));
                    let (pipeline, _token) = Pipeline::with_config(config).unwrap();
                    let merged =
                        pipeline.parallel(pipeline.source(0..10000u64), |n| black_box(n * n), width);
                    let out = merged.drain().await;
                    pipeline.join().await.unwrap();
                    out.len()
                })
            });
        });
    }

    group.finish();
}

fn bench_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool");

    group.bench_function("acquire_release", |b| {
        let pool = Pool::new(|| Vec::<u8>::with_capacity(4096));
        b.iter(|| {
            let mut slot = pool.acquire();
            slot.extend_from_slice(black_box(b"payload"));
            slot.len()
        });
    });

    group.bench_function("direct_alloc", |b| {
        b.iter(|| {
            let mut buf = Vec::<u8>::with_capacity(4096);
            buf.extend_from_slice(black_box(b"payload"));
            buf.len()
        });
    });

    group.finish();
}

criterion_group!(benches, bench_linear_pipeline, bench_fan_out, bench_pool);
criterion_main!(benches);
