//! Expression tree to Lua row logic.
//!
//! The translator produces the body of the batch loop: given loop index `i`,
//! cast locals `inputN_data` / `inputN_nullmask` for each referenced column,
//! and `output_data` / `output_nullmask` for the result, the emitted block
//! computes value and validity for one row.
//!
//! Null propagation is strict at the top level: if any referenced column is
//! NULL at row `i`, the output is NULL and the body is skipped. Null checks
//! are emitted in ascending column order so equal trees generate identical
//! source.
//!
//! Boolean-valued subexpressions lower to native Lua booleans; byte-backed
//! boolean storage is converted at the seams only (a boolean column read
//! compares `== 1`, the top-level boolean store writes `1` / `0`).

use kestrel_core::{BinaryOp, LogicalTypeId, ScalarExpr, ScalarFunction, ScalarValue, UnaryOp};
use thiserror::Error;

/// Errors from translation. All of them are recoverable: the executor latches
/// the expression as not-JITable and the interpreter takes over.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("unsupported type for JIT: {0}")]
    UnsupportedType(LogicalTypeId),

    #[error("column index {index} out of range for {width}-column input")]
    ColumnOutOfRange { index: usize, width: usize },

    #[error("LIKE requires a constant string pattern")]
    NonConstantLikePattern,

    #[error("unsupported expression shape: {0}")]
    Unsupported(String),

    #[error("type mismatch in generated expression: {0}")]
    TypeMismatch(String),
}

/// Translation context: the logical types of the input batch's columns,
/// indexed by column position.
#[derive(Debug, Clone)]
pub struct TranslatorContext {
    input_types: Vec<LogicalTypeId>,
}

impl TranslatorContext {
    pub fn new(input_types: Vec<LogicalTypeId>) -> Self {
        TranslatorContext { input_types }
    }

    pub fn column_type(&self, index: usize) -> Result<LogicalTypeId, TranslateError> {
        self.input_types
            .get(index)
            .copied()
            .ok_or(TranslateError::ColumnOutOfRange {
                index,
                width: self.input_types.len(),
            })
    }
}

/// Output of translation: the row-logic block plus the distinct column
/// indices the expression reads, ascending. Position `k` in the list is the
/// compiled routine's argument `input{k+1}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowLogic {
    pub body: String,
    pub referenced_columns: Vec<usize>,
}

/// Translate an expression into its per-row logic block.
pub fn translate_row_logic(
    expr: &ScalarExpr,
    ctx: &TranslatorContext,
) -> Result<RowLogic, TranslateError> {
    let referenced_columns = expr.referenced_columns();
    for &col in &referenced_columns {
        ctx.column_type(col)?;
    }

    let emitter = Emitter {
        ctx,
        columns: &referenced_columns,
    };
    let value = emitter.emit(expr)?;
    let assignment = emitter.output_assignment(expr.return_type(), &value)?;

    let mut lines = Vec::new();
    if referenced_columns.is_empty() {
        lines.push("output_nullmask[i] = 0".to_owned());
        lines.extend(assignment);
    } else {
        let checks: Vec<String> = (1..=referenced_columns.len())
            .map(|arg| format!("input{arg}_nullmask[i] ~= 0"))
            .collect();
        lines.push(format!("if {} then", checks.join(" or ")));
        lines.push("    output_nullmask[i] = 1".to_owned());
        if expr.return_type() == LogicalTypeId::Varchar {
            lines.push("    set_string_null(output_ffi, i)".to_owned());
        }
        lines.push("else".to_owned());
        lines.push("    output_nullmask[i] = 0".to_owned());
        for line in &assignment {
            lines.push(format!("    {line}"));
        }
        lines.push("end".to_owned());
    }

    Ok(RowLogic {
        body: lines.join("\n"),
        referenced_columns,
    })
}

// ── Emission ────────────────────────────────────────────────────────────

/// How a lowered fragment reads in Lua. Conversions between representations
/// happen where fragments meet, never implicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Repr {
    /// A Lua number (or an int64 cdata; both compose the same way).
    Num,
    /// A Lua string.
    Str,
    /// A Lua boolean.
    Bool,
    /// An FFIInterval lvalue.
    Interval,
}

/// A lowered fragment. `nullable` marks a fragment that can evaluate to
/// `nil` at runtime (a CASE with no ELSE); such fragments are only legal at
/// the expression root.
struct Lowered {
    text: String,
    repr: Repr,
    nullable: bool,
}

impl Lowered {
    fn new(text: String, repr: Repr) -> Self {
        Lowered {
            text,
            repr,
            nullable: false,
        }
    }
}

struct Emitter<'a> {
    ctx: &'a TranslatorContext,
    /// Sorted distinct referenced columns; position defines argument names.
    columns: &'a [usize],
}

impl Emitter<'_> {
    /// 1-based argument position of a referenced column.
    fn arg_of(&self, column: usize) -> usize {
        // The column was collected by referenced_columns(), so it is present.
        self.columns.iter().position(|&c| c == column).unwrap() + 1
    }

    fn emit(&self, expr: &ScalarExpr) -> Result<Lowered, TranslateError> {
        match expr {
            ScalarExpr::Constant { value, .. } => self.emit_constant(value),
            ScalarExpr::ColumnRef { index, .. } => self.emit_column(*index),
            ScalarExpr::Unary { op, child, .. } => self.emit_unary(*op, child),
            ScalarExpr::Binary { op, lhs, rhs, .. } => self.emit_binary(*op, lhs, rhs),
            ScalarExpr::Call { func, args, .. } => self.emit_call(*func, args),
            ScalarExpr::Case {
                branches,
                else_expr,
                ..
            } => self.emit_case(branches, else_expr.as_deref()),
        }
    }

    /// Emit a subexpression that must produce a value (not `nil`).
    fn emit_value(&self, expr: &ScalarExpr) -> Result<Lowered, TranslateError> {
        let lowered = self.emit(expr)?;
        if lowered.nullable {
            return Err(TranslateError::Unsupported(
                "CASE without ELSE below the expression root".to_owned(),
            ));
        }
        Ok(lowered)
    }

    fn emit_constant(&self, value: &ScalarValue) -> Result<Lowered, TranslateError> {
        match value {
            ScalarValue::Integer(v) => Ok(Lowered::new(v.to_string(), Repr::Num)),
            ScalarValue::Double(v) => Ok(Lowered::new(format!("{v:?}"), Repr::Num)),
            ScalarValue::Varchar(s) => Ok(Lowered::new(escape_lua_string(s), Repr::Str)),
            ScalarValue::Boolean(b) => Ok(Lowered::new(b.to_string(), Repr::Bool)),
            ScalarValue::Interval(_) => Err(TranslateError::Unsupported(
                "interval constant".to_owned(),
            )),
        }
    }

    fn emit_column(&self, index: usize) -> Result<Lowered, TranslateError> {
        let arg = self.arg_of(index);
        match self.ctx.column_type(index)? {
            LogicalTypeId::Varchar => Ok(Lowered::new(
                format!("ffi.string(input{arg}_data[i].ptr, input{arg}_data[i].len)"),
                Repr::Str,
            )),
            LogicalTypeId::Boolean => Ok(Lowered::new(
                format!("(input{arg}_data[i] == 1)"),
                Repr::Bool,
            )),
            LogicalTypeId::Interval => {
                Ok(Lowered::new(format!("input{arg}_data[i]"), Repr::Interval))
            }
            LogicalTypeId::Integer
            | LogicalTypeId::BigInt
            | LogicalTypeId::Double
            | LogicalTypeId::Date
            | LogicalTypeId::Timestamp => {
                Ok(Lowered::new(format!("input{arg}_data[i]"), Repr::Num))
            }
            ty => Err(TranslateError::UnsupportedType(ty)),
        }
    }

    fn emit_unary(&self, op: UnaryOp, child: &ScalarExpr) -> Result<Lowered, TranslateError> {
        match op {
            UnaryOp::Not => {
                let c = self.expect_repr(child, Repr::Bool, "NOT")?;
                Ok(Lowered::new(format!("(not {})", c.text), Repr::Bool))
            }
        }
    }

    fn emit_binary(
        &self,
        op: BinaryOp,
        lhs: &ScalarExpr,
        rhs: &ScalarExpr,
    ) -> Result<Lowered, TranslateError> {
        if op == BinaryOp::Like {
            return self.emit_like(lhs, rhs);
        }
        if op.is_arithmetic() {
            let l = self.expect_repr(lhs, Repr::Num, "arithmetic")?;
            let r = self.expect_repr(rhs, Repr::Num, "arithmetic")?;
            let tok = match op {
                BinaryOp::Add => "+",
                BinaryOp::Subtract => "-",
                BinaryOp::Multiply => "*",
                BinaryOp::Divide => "/",
                _ => unreachable!(),
            };
            return Ok(Lowered::new(
                format!("({} {tok} {})", l.text, r.text),
                Repr::Num,
            ));
        }
        if op.is_comparison() {
            let l = self.emit_value(lhs)?;
            let r = self.emit_value(rhs)?;
            if l.repr != r.repr || l.repr == Repr::Interval {
                return Err(TranslateError::TypeMismatch(format!(
                    "comparison between {:?} and {:?}",
                    l.repr, r.repr
                )));
            }
            let tok = match op {
                BinaryOp::Equals => "==",
                BinaryOp::NotEquals => "~=",
                BinaryOp::LessThan => "<",
                BinaryOp::LessThanOrEquals => "<=",
                BinaryOp::GreaterThan => ">",
                BinaryOp::GreaterThanOrEquals => ">=",
                _ => unreachable!(),
            };
            return Ok(Lowered::new(
                format!("({} {tok} {})", l.text, r.text),
                Repr::Bool,
            ));
        }
        if op.is_logical() {
            let l = self.expect_repr(lhs, Repr::Bool, "logical operator")?;
            let r = self.expect_repr(rhs, Repr::Bool, "logical operator")?;
            let tok = if op == BinaryOp::And { "and" } else { "or" };
            return Ok(Lowered::new(
                format!("({} {tok} {})", l.text, r.text),
                Repr::Bool,
            ));
        }
        debug_assert_eq!(op, BinaryOp::Concat);
        let l = self.expect_repr(lhs, Repr::Str, "concat")?;
        let r = self.expect_repr(rhs, Repr::Str, "concat")?;
        Ok(Lowered::new(
            format!("({} .. {})", l.text, r.text),
            Repr::Str,
        ))
    }

    /// LIKE against a constant pattern specializes on the `%` placement:
    /// contains, ends-with, starts-with, or plain equality. Anything else
    /// falls back to the interpreter.
    fn emit_like(&self, lhs: &ScalarExpr, rhs: &ScalarExpr) -> Result<Lowered, TranslateError> {
        let l = self.expect_repr(lhs, Repr::Str, "LIKE")?;
        let pattern = match rhs {
            ScalarExpr::Constant {
                value: ScalarValue::Varchar(p),
                ..
            } => p.as_str(),
            _ => return Err(TranslateError::NonConstantLikePattern),
        };

        let text = if pattern == "%" {
            "true".to_owned()
        } else if pattern.len() >= 2 && pattern.starts_with('%') && pattern.ends_with('%') {
            let mid = escape_lua_string(&pattern[1..pattern.len() - 1]);
            format!("(string.find({}, {mid}, 1, true) ~= nil)", l.text)
        } else if let Some(suffix) = pattern.strip_prefix('%') {
            let suffix = escape_lua_string(suffix);
            format!(
                "(string.sub({}, -string.len({suffix})) == {suffix})",
                l.text
            )
        } else if let Some(prefix) = pattern.strip_suffix('%') {
            let prefix = escape_lua_string(prefix);
            format!(
                "(string.sub({}, 1, string.len({prefix})) == {prefix})",
                l.text
            )
        } else {
            format!("({} == {})", l.text, escape_lua_string(pattern))
        };
        Ok(Lowered::new(text, Repr::Bool))
    }

    fn emit_call(
        &self,
        func: ScalarFunction,
        args: &[ScalarExpr],
    ) -> Result<Lowered, TranslateError> {
        let arity = |n: usize| -> Result<(), TranslateError> {
            if args.len() == n {
                Ok(())
            } else {
                Err(TranslateError::Unsupported(format!(
                    "{}() with {} arguments",
                    func.name(),
                    args.len()
                )))
            }
        };
        match func {
            ScalarFunction::Length => {
                arity(1)?;
                let a = self.expect_repr(&args[0], Repr::Str, "length")?;
                Ok(Lowered::new(format!("string.len({})", a.text), Repr::Num))
            }
            ScalarFunction::Upper => {
                arity(1)?;
                let a = self.expect_repr(&args[0], Repr::Str, "upper")?;
                Ok(Lowered::new(format!("string.upper({})", a.text), Repr::Str))
            }
            ScalarFunction::Lower => {
                arity(1)?;
                let a = self.expect_repr(&args[0], Repr::Str, "lower")?;
                Ok(Lowered::new(format!("string.lower({})", a.text), Repr::Str))
            }
            ScalarFunction::Abs => {
                arity(1)?;
                let a = self.expect_repr(&args[0], Repr::Num, "abs")?;
                Ok(Lowered::new(format!("math.abs({})", a.text), Repr::Num))
            }
            ScalarFunction::Extract => {
                arity(2)?;
                let part = match &args[0] {
                    ScalarExpr::Constant {
                        value: ScalarValue::Varchar(p),
                        ..
                    } => escape_lua_string(p),
                    _ => {
                        return Err(TranslateError::Unsupported(
                            "extract() with a non-constant part".to_owned(),
                        ))
                    }
                };
                let v = self.expect_repr(&args[1], Repr::Num, "extract")?;
                let callee = match args[1].return_type() {
                    LogicalTypeId::Date => "extract_from_date",
                    LogicalTypeId::Timestamp => "extract_from_timestamp",
                    ty => return Err(TranslateError::UnsupportedType(ty)),
                };
                Ok(Lowered::new(
                    format!("{callee}({}, {part})", v.text),
                    Repr::Num,
                ))
            }
            ScalarFunction::Year => {
                arity(1)?;
                if args[0].return_type() != LogicalTypeId::Date {
                    return Err(TranslateError::UnsupportedType(args[0].return_type()));
                }
                let v = self.expect_repr(&args[0], Repr::Num, "year")?;
                Ok(Lowered::new(
                    format!("extract_year_from_date({})", v.text),
                    Repr::Num,
                ))
            }
        }
    }

    /// CASE lowers to an immediately-invoked closure that returns the first
    /// matching branch, the ELSE value, or `nil` when no ELSE exists.
    fn emit_case(
        &self,
        branches: &[kestrel_core::CaseBranch],
        else_expr: Option<&ScalarExpr>,
    ) -> Result<Lowered, TranslateError> {
        if branches.is_empty() {
            return Err(TranslateError::Unsupported("CASE without branches".to_owned()));
        }
        let mut pieces = vec!["(function()".to_owned()];
        let mut repr: Option<Repr> = None;
        let mut check = |r: Repr| -> Result<(), TranslateError> {
            match repr {
                None => {
                    repr = Some(r);
                    Ok(())
                }
                Some(prev) if prev == r => Ok(()),
                Some(prev) => Err(TranslateError::TypeMismatch(format!(
                    "CASE branches lower to {prev:?} and {r:?}"
                ))),
            }
        };
        for branch in branches {
            let cond = self.expect_repr(&branch.when, Repr::Bool, "CASE condition")?;
            let then = self.emit_value(&branch.then)?;
            check(then.repr)?;
            pieces.push(format!("if {} then return {} end", cond.text, then.text));
        }
        let nullable = match else_expr {
            Some(e) => {
                let e = self.emit_value(e)?;
                check(e.repr)?;
                pieces.push(format!("return {}", e.text));
                false
            }
            None => {
                pieces.push("return nil".to_owned());
                true
            }
        };
        pieces.push("end)()".to_owned());
        Ok(Lowered {
            text: pieces.join(" "),
            repr: repr.unwrap(),
            nullable,
        })
    }

    fn expect_repr(
        &self,
        expr: &ScalarExpr,
        want: Repr,
        what: &str,
    ) -> Result<Lowered, TranslateError> {
        let lowered = self.emit_value(expr)?;
        if lowered.repr != want {
            return Err(TranslateError::TypeMismatch(format!(
                "{what} operand lowers to {:?}, expected {want:?}",
                lowered.repr
            )));
        }
        Ok(lowered)
    }

    // ── Output assignment ───────────────────────────────────────────────

    /// Render the store of the computed value into the output vector. Runs
    /// inside the not-null branch of the row's null wrapper.
    fn output_assignment(
        &self,
        result_type: LogicalTypeId,
        value: &Lowered,
    ) -> Result<Vec<String>, TranslateError> {
        if value.nullable {
            // CASE without ELSE: the closure result decides validity per row.
            let mut lines = vec![format!("local case_val = {}", value.text)];
            lines.push("if case_val == nil then".to_owned());
            lines.push("    output_nullmask[i] = 1".to_owned());
            if result_type == LogicalTypeId::Varchar {
                lines.push("    set_string_null(output_ffi, i)".to_owned());
            }
            lines.push("else".to_owned());
            for line in self.store_lines(result_type, value.repr, "case_val")? {
                lines.push(format!("    {line}"));
            }
            lines.push("end".to_owned());
            return Ok(lines);
        }

        if result_type == LogicalTypeId::Varchar {
            // Host callback owns the output string bytes; bind the value once.
            if value.repr != Repr::Str {
                return Err(TranslateError::TypeMismatch(
                    "VARCHAR result does not lower to a string".to_owned(),
                ));
            }
            return Ok(vec![
                format!("local result = {}", value.text),
                "append_string(output_ffi, i, result, string.len(result))".to_owned(),
            ]);
        }
        self.store_lines(result_type, value.repr, &value.text)
    }

    fn store_lines(
        &self,
        result_type: LogicalTypeId,
        repr: Repr,
        value_text: &str,
    ) -> Result<Vec<String>, TranslateError> {
        match result_type {
            LogicalTypeId::Boolean => {
                if repr != Repr::Bool {
                    return Err(TranslateError::TypeMismatch(
                        "BOOLEAN result does not lower to a boolean".to_owned(),
                    ));
                }
                Ok(vec![
                    format!("if {value_text} then"),
                    "    output_data[i] = 1".to_owned(),
                    "else".to_owned(),
                    "    output_data[i] = 0".to_owned(),
                    "end".to_owned(),
                ])
            }
            LogicalTypeId::Varchar => Ok(vec![
                format!("append_string(output_ffi, i, {value_text}, string.len({value_text}))"),
            ]),
            LogicalTypeId::Interval => {
                if repr != Repr::Interval {
                    return Err(TranslateError::Unsupported(
                        "INTERVAL result is not a direct column value".to_owned(),
                    ));
                }
                Ok(vec![
                    format!("output_data[i].months = {value_text}.months"),
                    format!("output_data[i].days = {value_text}.days"),
                    format!("output_data[i].micros = {value_text}.micros"),
                ])
            }
            LogicalTypeId::Integer
            | LogicalTypeId::BigInt
            | LogicalTypeId::Double
            | LogicalTypeId::Date
            | LogicalTypeId::Timestamp => {
                if repr != Repr::Num {
                    return Err(TranslateError::TypeMismatch(format!(
                        "{result_type} result lowers to {repr:?}"
                    )));
                }
                Ok(vec![format!("output_data[i] = {value_text}")])
            }
            ty => Err(TranslateError::UnsupportedType(ty)),
        }
    }
}

/// Quote and escape a string for embedding in Lua source.
fn escape_lua_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}
