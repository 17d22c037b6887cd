use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

use pushweld::prelude::*;

fn bench_emit_through_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("emit_through_chain");

    for size in [100i64, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));

        group.bench_with_input(BenchmarkId::new("passthrough", size), size, |b, &size| {
            b.iter(|| {
                let root = Source::new("bench");
                let sink = root.each(|v| {
                    black_box(v);
                    Ok(())
                });
                for i in 0..size {
                    root.emit(i).unwrap();
                }
                root.finish().unwrap();
                black_box(sink);
            });
        });

        group.bench_with_input(BenchmarkId::new("map_filter", size), size, |b, &size| {
            b.iter(|| {
                let root = Source::new("bench");
                let chain = root
                    .map(|v| Value::Int(v.as_f64() as i64 * 2))
                    .filter(FilterSpec::pred(|v| v.as_f64() as i64 % 3 != 0));
                chain.each(|v| {
                    black_box(v);
                    Ok(())
                });
                for i in 0..size {
                    root.emit(i).unwrap();
                }
                root.finish().unwrap();
            });
        });
    }

    group.finish();
}

fn bench_aggregation(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregation");

    for size in [1000i64, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));

        group.bench_with_input(BenchmarkId::new("statistics", size), size, |b, &size| {
            b.iter(|| {
                let root = Source::from((0..size).collect::<Vec<_>>());
                black_box(root.statistics().get().unwrap());
            });
        });

        group.bench_with_input(BenchmarkId::new("nsort", size), size, |b, &size| {
            b.iter(|| {
                let root = Source::from((0..size).rev().collect::<Vec<_>>());
                black_box(root.nsort_by(|v| v.clone()).get().unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_emit_through_chain, bench_aggregation);
criterion_main!(benches);
