//! Benchmarks for change dispatch: fan-out, chains and queued flushes.
//!
//! Run with: cargo bench -p fluxbind-runtime --bench dispatch_bench

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use fluxbind_core::BindingFlags;
use fluxbind_harness::model;
use fluxbind_runtime::{BindOptions, BindingScope, Engine, Expr};
use std::hint::black_box;

fn names(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{prefix}{i}")).collect()
}

/// One source property feeding `n` bound destinations.
fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch/fan_out");

    for n in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(n as u64));
        let engine = Engine::new();
        let src = model("Src", &["v"]);
        let props = names("d", n);
        let dest = model("Dest", &props.iter().map(String::as_str).collect::<Vec<_>>());
        let mut scope = BindingScope::new();
        for p in &props {
            scope.hold(
                engine
                    .bind(&dest, p, Expr::path(&src, "v") * Expr::constant(2), BindOptions::new())
                    .unwrap(),
            );
        }
        let mut v = 0i64;
        group.bench_with_input(BenchmarkId::new("set", n), &(), |b, _| {
            b.iter(|| {
                v += 1;
                black_box(engine.set_property(&src, "v", v).unwrap())
            })
        });
    }

    group.finish();
}

/// `p{i} := p{i-1} + 1` for a chain of `n` links.
fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch/chain");

    for n in [8usize, 32, 96] {
        group.throughput(Throughput::Elements(n as u64));
        let engine = Engine::new();
        let props = names("p", n + 1);
        let refs: Vec<&str> = props.iter().map(String::as_str).collect();
        let m = model("Chain", &refs);
        let mut scope = BindingScope::new();
        for pair in refs.windows(2) {
            scope.hold(
                engine
                    .bind(&m, pair[1], Expr::path(&m, pair[0]) + Expr::constant(1), BindOptions::new())
                    .unwrap(),
            );
        }
        let mut v = 0i64;
        group.bench_with_input(BenchmarkId::new("set", n), &(), |b, _| {
            b.iter(|| {
                v += 1;
                black_box(engine.set_property(&m, "p0", v).unwrap())
            })
        });
    }

    group.finish();
}

/// `n` queued bindings at spread priorities, drained by one flush.
fn bench_queued_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch/queued_flush");

    for n in [10usize, 100, 500] {
        group.throughput(Throughput::Elements(n as u64));
        let engine = Engine::new();
        let src = model("Src", &["v"]);
        let props = names("q", n);
        let dest = model("Dest", &props.iter().map(String::as_str).collect::<Vec<_>>());
        let mut scope = BindingScope::new();
        for (i, p) in props.iter().enumerate() {
            let opts = BindOptions::new()
                .flags(BindingFlags::QUEUED)
                .priority((i % 7) as i32);
            scope.hold(engine.bind(&dest, p, Expr::path(&src, "v"), opts).unwrap());
        }
        let mut v = 0i64;
        group.bench_with_input(BenchmarkId::new("set_and_flush", n), &(), |b, _| {
            b.iter(|| {
                v += 1;
                engine.set_property(&src, "v", v).unwrap();
                engine.flush().unwrap();
            })
        });
    }

    group.finish();
}

/// Batched writes against the same bindings, unbatched for comparison.
fn bench_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch/batch");
    let engine = Engine::new();
    let m = model("M", &["a", "b", "sum"]);
    let _sum = engine
        .bind(&m, "sum", Expr::path(&m, "a") + Expr::path(&m, "b"), BindOptions::new())
        .unwrap();
    let mut v = 0i64;

    group.bench_function("unbatched", |b| {
        b.iter(|| {
            v += 1;
            engine.set_property(&m, "a", v).unwrap();
            engine.set_property(&m, "b", v).unwrap();
        })
    });
    group.bench_function("batched", |b| {
        b.iter(|| {
            v += 1;
            let _batch = engine.batch();
            engine.set_property(&m, "a", v).unwrap();
            engine.set_property(&m, "b", v).unwrap();
        })
    });

    group.finish();
}

criterion_group!(benches, bench_fan_out, bench_chain, bench_queued_flush, bench_batch);
criterion_main!(benches);
