//! Interpreter vs JIT throughput on full batches.
//!
//! Run with:
//!
//! ```bash
//! cargo bench -p kestrel-rt
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kestrel_core::{BinaryOp, Batch, LogicalTypeId, ScalarExpr, Vector, STANDARD_BATCH_SIZE};
use kestrel_rt::{ExpressionExecutor, SessionConfig};

fn int_batch(rows: usize) -> Batch {
    let col0: Vec<Option<i32>> = (0..rows).map(|i| Some(i as i32)).collect();
    let col1: Vec<Option<i32>> = (0..rows)
        .map(|i| if i % 97 == 0 { None } else { Some(i as i32 * 3) })
        .collect();
    Batch::new(vec![Vector::from_i32s(&col0), Vector::from_i32s(&col1)])
}

fn arithmetic_expr() -> ScalarExpr {
    // (col0 + col1) * 2
    ScalarExpr::binary(
        BinaryOp::Multiply,
        ScalarExpr::binary(
            BinaryOp::Add,
            ScalarExpr::column(0, LogicalTypeId::Integer),
            ScalarExpr::column(1, LogicalTypeId::Integer),
            LogicalTypeId::Integer,
        ),
        ScalarExpr::integer(2),
        LogicalTypeId::Integer,
    )
}

fn filter_expr() -> ScalarExpr {
    // (col0 > 100) AND (col1 < 5000)
    ScalarExpr::binary(
        BinaryOp::And,
        ScalarExpr::binary(
            BinaryOp::GreaterThan,
            ScalarExpr::column(0, LogicalTypeId::Integer),
            ScalarExpr::integer(100),
            LogicalTypeId::Boolean,
        ),
        ScalarExpr::binary(
            BinaryOp::LessThan,
            ScalarExpr::column(1, LogicalTypeId::Integer),
            ScalarExpr::integer(5000),
            LogicalTypeId::Boolean,
        ),
        LogicalTypeId::Boolean,
    )
}

fn session(enable_jit: bool) -> Rc<RefCell<SessionConfig>> {
    Rc::new(RefCell::new(SessionConfig {
        enable_jit,
        jit_complexity_threshold: 0,
        jit_trigger_count: 0,
    }))
}

fn bench_expression(c: &mut Criterion, name: &str, expr: ScalarExpr, result_type: LogicalTypeId) {
    let mut group = c.benchmark_group(name);
    let batch = int_batch(STANDARD_BATCH_SIZE);
    let count = batch.len();

    for (label, enable_jit) in [("interpreter", false), ("jit", true)] {
        group.bench_with_input(
            BenchmarkId::new(label, count),
            &batch,
            |b, batch| {
                let mut executor = ExpressionExecutor::with_session(session(enable_jit));
                let idx = executor.add_expression(expr.clone());
                let mut result = Vector::flat(result_type, 0);
                // Warm-up: compiles the expression on the JIT variant.
                executor.execute(idx, batch, None, count, &mut result).unwrap();
                b.iter(|| {
                    executor
                        .execute(idx, black_box(batch), None, count, &mut result)
                        .unwrap();
                    black_box(&result);
                });
            },
        );
    }
    group.finish();
}

fn jit_expression_benchmark(c: &mut Criterion) {
    bench_expression(c, "int_arithmetic", arithmetic_expr(), LogicalTypeId::Integer);
    bench_expression(c, "comparison_filter", filter_expr(), LogicalTypeId::Boolean);
}

criterion_group!(benches, jit_expression_benchmark);
criterion_main!(benches);
