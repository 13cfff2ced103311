//! Row-at-a-time expression interpreter.
//!
//! The reference evaluation path: always available, always correct, and the
//! semantics the JIT is held to. Null propagation, LIKE specialization,
//! string length/case rules, and date-part extraction intentionally mirror
//! the generated Lua exactly, so a successful JIT run is bit-identical to an
//! interpreted one.

use kestrel_core::{
    Batch, BinaryOp, LogicalTypeId, ScalarExpr, ScalarFunction, ScalarValue, UnaryOp, Vector,
};
use thiserror::Error;

use crate::ffi::{date_part, timestamp_part, year_of_date};

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("column index {index} out of range for {width}-column batch")]
    ColumnOutOfRange { index: usize, width: usize },

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

/// Evaluate `expr` over `count` rows of `batch` (optionally subselected) into
/// a flat `result` vector.
pub fn interpret(
    expr: &ScalarExpr,
    batch: &Batch,
    sel: Option<&[u32]>,
    count: usize,
    result: &mut Vector,
) -> Result<(), EvalError> {
    result.ensure_flat(count);

    let referenced = expr.referenced_columns();
    for &col in &referenced {
        if col >= batch.column_count() {
            return Err(EvalError::ColumnOutOfRange {
                index: col,
                width: batch.column_count(),
            });
        }
    }

    for i in 0..count {
        let row = sel.map_or(i, |s| s[i] as usize);
        // Strict three-valued logic: any referenced NULL nulls the row and
        // skips the body entirely.
        let any_null = referenced
            .iter()
            .any(|&col| !batch.column(col).unified().row_is_valid(row));
        if any_null {
            result.set_null(i);
            continue;
        }
        match eval_scalar(expr, batch, row)? {
            Some(value) => result.set_value(i, &value),
            None => result.set_null(i),
        }
    }
    Ok(())
}

/// Evaluate one row. `None` is a NULL result (a CASE with no matching branch
/// and no ELSE).
fn eval_scalar(
    expr: &ScalarExpr,
    batch: &Batch,
    row: usize,
) -> Result<Option<ScalarValue>, EvalError> {
    match expr {
        ScalarExpr::Constant { value, .. } => Ok(Some(value.clone())),
        ScalarExpr::ColumnRef { index, .. } => Ok(batch.column(*index).get_value(row)),
        ScalarExpr::Unary { op, child, .. } => {
            let Some(value) = eval_scalar(child, batch, row)? else {
                return Ok(None);
            };
            match (op, value) {
                (UnaryOp::Not, ScalarValue::Boolean(b)) => Ok(Some(ScalarValue::Boolean(!b))),
                (UnaryOp::Not, other) => Err(EvalError::TypeMismatch(format!(
                    "NOT applied to {other:?}"
                ))),
            }
        }
        ScalarExpr::Binary { op, lhs, rhs, .. } => {
            let Some(l) = eval_scalar(lhs, batch, row)? else {
                return Ok(None);
            };
            let Some(r) = eval_scalar(rhs, batch, row)? else {
                return Ok(None);
            };
            eval_binary(*op, l, r).map(Some)
        }
        ScalarExpr::Call { func, args, .. } => eval_call(*func, args, batch, row),
        ScalarExpr::Case {
            branches,
            else_expr,
            ..
        } => {
            for branch in branches {
                match eval_scalar(&branch.when, batch, row)? {
                    Some(ScalarValue::Boolean(true)) => {
                        return eval_scalar(&branch.then, batch, row)
                    }
                    Some(ScalarValue::Boolean(false)) | None => {}
                    Some(other) => {
                        return Err(EvalError::TypeMismatch(format!(
                            "CASE condition evaluated to {other:?}"
                        )))
                    }
                }
            }
            match else_expr {
                Some(e) => eval_scalar(e, batch, row),
                None => Ok(None),
            }
        }
    }
}

fn eval_binary(op: BinaryOp, l: ScalarValue, r: ScalarValue) -> Result<ScalarValue, EvalError> {
    if op.is_arithmetic() {
        return eval_arithmetic(op, l, r);
    }
    if op.is_comparison() {
        return eval_comparison(op, l, r);
    }
    match (op, l, r) {
        (BinaryOp::And, ScalarValue::Boolean(a), ScalarValue::Boolean(b)) => {
            Ok(ScalarValue::Boolean(a && b))
        }
        (BinaryOp::Or, ScalarValue::Boolean(a), ScalarValue::Boolean(b)) => {
            Ok(ScalarValue::Boolean(a || b))
        }
        (BinaryOp::Concat, ScalarValue::Varchar(a), ScalarValue::Varchar(b)) => {
            Ok(ScalarValue::Varchar(a + &b))
        }
        (BinaryOp::Like, ScalarValue::Varchar(s), ScalarValue::Varchar(pattern)) => {
            Ok(ScalarValue::Boolean(like_match(&s, &pattern)))
        }
        (op, l, r) => Err(EvalError::TypeMismatch(format!(
            "{op:?} applied to {l:?} and {r:?}"
        ))),
    }
}

fn eval_arithmetic(op: BinaryOp, l: ScalarValue, r: ScalarValue) -> Result<ScalarValue, EvalError> {
    use ScalarValue::{Double, Integer};
    match (l, r) {
        (Integer(a), Integer(b)) => match op {
            BinaryOp::Add => Ok(Integer(a.wrapping_add(b))),
            BinaryOp::Subtract => Ok(Integer(a.wrapping_sub(b))),
            BinaryOp::Multiply => Ok(Integer(a.wrapping_mul(b))),
            BinaryOp::Divide => {
                if b == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                // Matches the compiled routine: float division, truncated by
                // the typed store when the result type is integral.
                Ok(Double(a as f64 / b as f64))
            }
            _ => unreachable!(),
        },
        (l, r) => {
            let (a, b) = match (as_f64(&l), as_f64(&r)) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(EvalError::TypeMismatch(format!(
                        "{op:?} applied to {l:?} and {r:?}"
                    )))
                }
            };
            let out = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Subtract => a - b,
                BinaryOp::Multiply => a * b,
                BinaryOp::Divide => a / b,
                _ => unreachable!(),
            };
            Ok(Double(out))
        }
    }
}

fn eval_comparison(op: BinaryOp, l: ScalarValue, r: ScalarValue) -> Result<ScalarValue, EvalError> {
    use std::cmp::Ordering;
    let ordering = match (&l, &r) {
        (ScalarValue::Integer(a), ScalarValue::Integer(b)) => a.cmp(b),
        (ScalarValue::Varchar(a), ScalarValue::Varchar(b)) => a.cmp(b),
        (ScalarValue::Boolean(a), ScalarValue::Boolean(b)) => {
            if !matches!(op, BinaryOp::Equals | BinaryOp::NotEquals) {
                return Err(EvalError::Unsupported(
                    "ordered comparison of booleans".to_owned(),
                ));
            }
            a.cmp(b)
        }
        _ => match (as_f64(&l), as_f64(&r)) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Less),
            _ => {
                return Err(EvalError::TypeMismatch(format!(
                    "{op:?} applied to {l:?} and {r:?}"
                )))
            }
        },
    };
    let outcome = match op {
        BinaryOp::Equals => ordering == Ordering::Equal,
        BinaryOp::NotEquals => ordering != Ordering::Equal,
        BinaryOp::LessThan => ordering == Ordering::Less,
        BinaryOp::LessThanOrEquals => ordering != Ordering::Greater,
        BinaryOp::GreaterThan => ordering == Ordering::Greater,
        BinaryOp::GreaterThanOrEquals => ordering != Ordering::Less,
        _ => unreachable!(),
    };
    Ok(ScalarValue::Boolean(outcome))
}

fn as_f64(value: &ScalarValue) -> Option<f64> {
    match value {
        ScalarValue::Integer(v) => Some(*v as f64),
        ScalarValue::Double(v) => Some(*v),
        _ => None,
    }
}

/// The engine's LIKE rule set: `%` only, specialized on placement. Patterns
/// with interior wildcards compare as plain literals, matching the compiled
/// form.
fn like_match(s: &str, pattern: &str) -> bool {
    if pattern.len() >= 2 && pattern.starts_with('%') && pattern.ends_with('%') {
        s.contains(&pattern[1..pattern.len() - 1])
    } else if let Some(suffix) = pattern.strip_prefix('%') {
        s.ends_with(suffix)
    } else if let Some(prefix) = pattern.strip_suffix('%') {
        s.starts_with(prefix)
    } else {
        s == pattern
    }
}

fn eval_call(
    func: ScalarFunction,
    args: &[ScalarExpr],
    batch: &Batch,
    row: usize,
) -> Result<Option<ScalarValue>, EvalError> {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        match eval_scalar(arg, batch, row)? {
            Some(v) => values.push(v),
            None => return Ok(None),
        }
    }
    let wrong = |what: &str| {
        Err(EvalError::TypeMismatch(format!(
            "{}() applied to {what}",
            func.name()
        )))
    };
    match (func, values.as_slice()) {
        (ScalarFunction::Length, [ScalarValue::Varchar(s)]) => {
            Ok(Some(ScalarValue::Integer(s.len() as i64)))
        }
        (ScalarFunction::Upper, [ScalarValue::Varchar(s)]) => {
            Ok(Some(ScalarValue::Varchar(s.to_ascii_uppercase())))
        }
        (ScalarFunction::Lower, [ScalarValue::Varchar(s)]) => {
            Ok(Some(ScalarValue::Varchar(s.to_ascii_lowercase())))
        }
        (ScalarFunction::Abs, [ScalarValue::Integer(v)]) => {
            Ok(Some(ScalarValue::Integer(v.wrapping_abs())))
        }
        (ScalarFunction::Abs, [ScalarValue::Double(v)]) => {
            Ok(Some(ScalarValue::Double(v.abs())))
        }
        (ScalarFunction::Extract, [ScalarValue::Varchar(part), ScalarValue::Integer(v)]) => {
            let value = match args[1].return_type() {
                LogicalTypeId::Date => date_part(*v as i32, part),
                LogicalTypeId::Timestamp => timestamp_part(*v, part),
                ty => return wrong(ty.name()),
            };
            Ok(Some(ScalarValue::Integer(value)))
        }
        (ScalarFunction::Year, [ScalarValue::Integer(v)]) => {
            if args[0].return_type() != LogicalTypeId::Date {
                return wrong(args[0].return_type().name());
            }
            Ok(Some(ScalarValue::Integer(year_of_date(*v as i32))))
        }
        (_, _) => wrong("mismatched arguments"),
    }
}
