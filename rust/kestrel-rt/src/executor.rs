//! Expression executor with tiered JIT.
//!
//! Each executor owns the expressions it evaluates, one JIT state per
//! expression, and at most one runtime wrapper. Cold expressions run on the
//! interpreter while a per-expression execution counter climbs; once the
//! counter and the complexity measure clear the session thresholds, the
//! expression is translated, compiled once, and invoked per batch. Any
//! failure anywhere on the JIT path latches the expression back onto the
//! interpreter permanently.
//!
//! The JIT is invisible to callers: `execute` fills the same result vector
//! with the same contents either way, and JIT-side errors never surface.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use kestrel_codegen::{build_expression_script, translate_row_logic, TranslateError, TranslatorContext};
use kestrel_core::{Batch, LogicalTypeId, ScalarExpr, Vector};
use thiserror::Error;
use tracing::{debug, warn};

use crate::bridge::{materialize_input, materialize_output, BridgeError, ScratchPool};
use crate::ffi::FFIVector;
use crate::interpreter::{interpret, EvalError};
use crate::session::SessionConfig;
use crate::wrapper::{RuntimeError, RuntimeWrapper};

/// Process-global counter backing compiled-symbol names. Atomic so symbols
/// stay unique across concurrent executors.
static JIT_SYMBOL_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_symbol_name() -> String {
    format!(
        "jit_expr_fn_{}",
        JIT_SYMBOL_COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Errors surfaced to the caller of `execute`. JIT-side failures are not
/// among them; they downgrade to interpreter execution.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("expression index {0} out of range")]
    UnknownExpression(usize),

    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// Everything that can go wrong on the JIT path. All variants are
/// recoverable and handled identically: latch and fall back.
#[derive(Debug, Error)]
enum JitError {
    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("{0}")]
    Internal(String),
}

/// Per-expression JIT bookkeeping, created alongside the expression at plan
/// initialization.
#[derive(Debug, Clone, Default)]
pub struct JitExprState {
    pub attempted_compilation: bool,
    pub compilation_succeeded: bool,
    /// Interpreter executions so far; stops advancing once a compiled
    /// routine is in use.
    pub execution_count: u64,
    pub jitted_symbol_name: String,
}

/// Evaluates bound expressions over batches, JIT-compiling hot ones.
pub struct ExpressionExecutor {
    session: Option<Rc<RefCell<SessionConfig>>>,
    wrapper: Option<RuntimeWrapper>,
    expressions: Vec<ScalarExpr>,
    states: Vec<JitExprState>,
}

impl ExpressionExecutor {
    /// An executor without a session context. Evaluation is interpreter-only.
    pub fn new() -> Self {
        ExpressionExecutor {
            session: None,
            wrapper: None,
            expressions: Vec::new(),
            states: Vec::new(),
        }
    }

    /// An executor bound to a session. The runtime state is created eagerly;
    /// if that fails the executor stays usable but the JIT is permanently
    /// unavailable.
    pub fn with_session(session: Rc<RefCell<SessionConfig>>) -> Self {
        let wrapper = match RuntimeWrapper::new() {
            Ok(wrapper) => Some(wrapper),
            Err(err) => {
                warn!(error = %err, "scripting runtime unavailable, JIT disabled for this executor");
                None
            }
        };
        ExpressionExecutor {
            session: Some(session),
            wrapper,
            expressions: Vec::new(),
            states: Vec::new(),
        }
    }

    /// Register an expression, returning its index for `execute`.
    pub fn add_expression(&mut self, expr: ScalarExpr) -> usize {
        self.expressions.push(expr);
        self.states.push(JitExprState::default());
        self.expressions.len() - 1
    }

    pub fn expression_count(&self) -> usize {
        self.expressions.len()
    }

    pub fn expression(&self, idx: usize) -> &ScalarExpr {
        &self.expressions[idx]
    }

    pub fn jit_state(&self, idx: usize) -> &JitExprState {
        &self.states[idx]
    }

    /// Evaluate expression `expr_idx` over `count` rows of `batch`
    /// (optionally subselected by `sel`) into `result`.
    pub fn execute(
        &mut self,
        expr_idx: usize,
        batch: &Batch,
        sel: Option<&[u32]>,
        count: usize,
        result: &mut Vector,
    ) -> Result<(), ExecError> {
        if expr_idx >= self.expressions.len() {
            return Err(ExecError::UnknownExpression(expr_idx));
        }
        debug_assert_eq!(result.ty(), self.expressions[expr_idx].return_type());

        if count == 0 {
            result.ensure_flat(0);
            return Ok(());
        }

        if self.should_jit(expr_idx) {
            match self.try_jit(expr_idx, batch, sel, count, result) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    debug!(
                        expression = expr_idx,
                        error = %err,
                        "JIT path failed, falling back to interpreter"
                    );
                    self.states[expr_idx].compilation_succeeded = false;
                }
            }
        }

        let state = &mut self.states[expr_idx];
        if !state.compilation_succeeded {
            state.execution_count += 1;
        }
        interpret(&self.expressions[expr_idx], batch, sel, count, result)?;
        Ok(())
    }

    /// The JIT predicate: session present and enabled, runtime available,
    /// expression not latched-failed, and both the complexity and trigger
    /// thresholds met. Every `ScalarExpr` variant is a candidate kind.
    fn should_jit(&self, expr_idx: usize) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        if self.wrapper.is_none() {
            return false;
        }
        let config = session.borrow();
        if !config.enable_jit {
            return false;
        }
        let state = &self.states[expr_idx];
        if state.attempted_compilation && !state.compilation_succeeded {
            return false;
        }
        let expr = &self.expressions[expr_idx];
        if (expr.complexity() as u64) < config.jit_complexity_threshold {
            return false;
        }
        state.execution_count >= config.jit_trigger_count
    }

    /// Compile on first entry, then bridge the batch and invoke the compiled
    /// routine. Any error leaves the state latched as failed.
    fn try_jit(
        &mut self,
        expr_idx: usize,
        batch: &Batch,
        sel: Option<&[u32]>,
        count: usize,
        result: &mut Vector,
    ) -> Result<(), JitError> {
        if !self.states[expr_idx].attempted_compilation {
            self.states[expr_idx].attempted_compilation = true;

            let expr = &self.expressions[expr_idx];
            let input_types: Vec<LogicalTypeId> =
                batch.columns().iter().map(Vector::ty).collect();
            let ctx = TranslatorContext::new(input_types);
            let row_logic = translate_row_logic(expr, &ctx)?;
            let symbol = next_symbol_name();
            let script = build_expression_script(&symbol, &row_logic, &ctx, expr.return_type())?;

            let wrapper = self.wrapper.as_ref().ok_or_else(|| {
                JitError::Internal("runtime wrapper unavailable".to_owned())
            })?;
            wrapper.compile_and_bind(&script, &symbol)?;

            let state = &mut self.states[expr_idx];
            state.jitted_symbol_name = symbol;
            state.compilation_succeeded = true;
            debug!(
                expression = expr_idx,
                symbol = %state.jitted_symbol_name,
                "expression compiled"
            );
        }
        if !self.states[expr_idx].compilation_succeeded {
            return Err(JitError::Internal(
                "invoked with a failed compilation state".to_owned(),
            ));
        }

        let expr = &self.expressions[expr_idx];
        if result.ty() != expr.return_type() {
            debug_assert!(false, "result vector type does not match expression");
            return Err(JitError::Internal(format!(
                "result vector is {}, expression returns {}",
                result.ty(),
                expr.return_type()
            )));
        }
        let referenced = expr.referenced_columns();
        for &col in &referenced {
            if col >= batch.column_count() {
                debug_assert!(false, "referenced column missing from batch");
                return Err(JitError::Internal(format!(
                    "column {col} missing from {}-column batch",
                    batch.column_count()
                )));
            }
        }

        // Scratch and FFI records live exactly as long as the invocation.
        let mut pool = ScratchPool::new();
        let mut output_ffi = materialize_output(result, count, &mut pool)?;
        let mut input_ffis: Vec<FFIVector> = Vec::with_capacity(referenced.len());
        for &col in &referenced {
            input_ffis.push(materialize_input(batch.column(col), sel, count, &mut pool)?);
        }
        let input_ptrs: Vec<*mut FFIVector> =
            input_ffis.iter_mut().map(|v| v as *mut FFIVector).collect();

        let wrapper = self
            .wrapper
            .as_ref()
            .ok_or_else(|| JitError::Internal("runtime wrapper unavailable".to_owned()))?;
        wrapper.invoke(
            &self.states[expr_idx].jitted_symbol_name,
            &mut output_ffi,
            &input_ptrs,
            count,
        )?;

        // Fold the flat nullmask the routine wrote back into the bit-packed
        // validity of the result vector.
        let null_bytes = unsafe { std::slice::from_raw_parts(output_ffi.nullmask, count) };
        result.validity_mut().set_from_null_bytes(null_bytes);
        Ok(())
    }
}

impl Default for ExpressionExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_names_are_unique_and_monotonic() {
        let a = next_symbol_name();
        let b = next_symbol_name();
        assert_ne!(a, b);
        assert!(a.starts_with("jit_expr_fn_"));
        assert!(b.starts_with("jit_expr_fn_"));
    }

    #[test]
    fn executor_without_session_never_jits() {
        let mut executor = ExpressionExecutor::new();
        let idx = executor.add_expression(ScalarExpr::binary(
            kestrel_core::BinaryOp::Add,
            ScalarExpr::column(0, LogicalTypeId::Integer),
            ScalarExpr::column(1, LogicalTypeId::Integer),
            LogicalTypeId::Integer,
        ));
        let batch = Batch::new(vec![
            Vector::from_i32s(&[Some(1)]),
            Vector::from_i32s(&[Some(2)]),
        ]);
        let mut result = Vector::flat(LogicalTypeId::Integer, 0);
        for _ in 0..10 {
            executor.execute(idx, &batch, None, 1, &mut result).unwrap();
        }
        assert!(!executor.jit_state(idx).attempted_compilation);
        assert_eq!(executor.jit_state(idx).execution_count, 10);
    }

    #[test]
    fn unknown_expression_index_errors() {
        let mut executor = ExpressionExecutor::new();
        let batch = Batch::new(vec![Vector::from_i32s(&[Some(1)])]);
        let mut result = Vector::flat(LogicalTypeId::Integer, 0);
        let err = executor.execute(3, &batch, None, 1, &mut result).unwrap_err();
        assert!(matches!(err, ExecError::UnknownExpression(3)));
    }
}
