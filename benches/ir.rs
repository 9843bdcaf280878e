//! Benchmarks for graph-wide IR operations.
//!
//! Runs on generated "ladder" units: a chain of diamonds, each arm redefining the same register,
//! so every rung ends in a phi. Measures:
//! - SSA construction including trivial-phi removal and critical-edge splitting
//! - Instruction numbering
//! - Live-at-entry computation
//! - The full consistency check

extern crate irscope;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use irscope::prelude::*;
use std::hint::black_box;

/// Builds a unit with `rungs` consecutive diamonds.
fn ladder(rungs: usize) -> IrCode {
    let mut code = IrCode::new(IrOptions::release());
    let mut builder = SsaBuilder::new(&mut code);
    let entry = builder.new_block();
    builder.set_current_block(entry);
    let flag = builder.add_argument(0, ValueType::Int);
    builder.add_const(1, 0, ValueType::Int);

    let mut current = entry;
    for rung in 0..rungs {
        let left = builder.new_block();
        let right = builder.new_block();
        let join = builder.new_block();
        builder.add_edge(current, left);
        builder.add_edge(current, right);
        builder.add_edge(left, join);
        builder.add_edge(right, join);
        builder.add_if(IfCondition::Eqz, &[flag]).unwrap();

        for (arm, delta) in [(left, 1), (right, rung as i64 + 2)] {
            builder.set_current_block(arm);
            let acc = builder.read_register(1, ValueType::Int).unwrap();
            let step = builder.add_const(2, delta, ValueType::Int);
            builder.add_binop(BinopKind::Add, 1, acc, step, ValueType::Int);
            builder.add_goto().unwrap();
        }
        builder.set_current_block(join);
        current = join;
    }
    let result = builder.read_register(1, ValueType::Int).unwrap();
    builder.add_return(Some(result)).unwrap();
    builder.build().unwrap();
    code
}

fn bench_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("ir_build");
    for rungs in [16, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(rungs), &rungs, |b, &rungs| {
            b.iter(|| black_box(ladder(black_box(rungs))));
        });
    }
    group.finish();
}

fn bench_numbering(c: &mut Criterion) {
    let code = ladder(256);
    c.bench_function("ir_number_instructions", |b| {
        b.iter(|| {
            let mut code = code.clone();
            black_box(code.number_instructions())
        });
    });
}

fn bench_liveness(c: &mut Criterion) {
    let mut group = c.benchmark_group("ir_liveness");
    for rungs in [16, 256] {
        let code = ladder(rungs);
        group.bench_with_input(BenchmarkId::from_parameter(rungs), &code, |b, code| {
            b.iter(|| black_box(code.compute_live_at_entry_sets()));
        });
    }
    group.finish();
}

fn bench_consistency_check(c: &mut Criterion) {
    let code = ladder(256);
    c.bench_function("ir_is_consistent_ssa", |b| {
        b.iter(|| black_box(code.is_consistent_ssa()).unwrap());
    });
}

criterion_group!(
    benches,
    bench_construction,
    bench_numbering,
    bench_liveness,
    bench_consistency_check
);
criterion_main!(benches);
