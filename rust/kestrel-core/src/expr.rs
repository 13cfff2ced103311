//! Scalar expression IR.
//!
//! A bound expression tree as consumed by the translator and the
//! interpreter: constants, column references, unary/binary operators, scalar
//! function calls, and CASE. Every node carries its result logical type; the
//! tree is immutable once built.

use crate::types::{Interval, LogicalTypeId};

/// A constant value embedded in an expression tree. Constants are never NULL;
/// a NULL literal does not occur in the supported plans.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Varchar(String),
    Interval(Interval),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEquals,
    GreaterThan,
    GreaterThanOrEquals,
    And,
    Or,
    Concat,
    Like,
}

impl BinaryOp {
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Equals
                | BinaryOp::NotEquals
                | BinaryOp::LessThan
                | BinaryOp::LessThanOrEquals
                | BinaryOp::GreaterThan
                | BinaryOp::GreaterThanOrEquals
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
}

/// The scalar function set the engine binds. Signatures are checked by the
/// translator and the interpreter, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarFunction {
    /// `length(VARCHAR) -> BIGINT`, byte length.
    Length,
    /// `upper(VARCHAR) -> VARCHAR`, ASCII.
    Upper,
    /// `lower(VARCHAR) -> VARCHAR`, ASCII.
    Lower,
    /// `abs(numeric) -> numeric`.
    Abs,
    /// `extract(part, DATE | TIMESTAMP) -> BIGINT`; part is a VARCHAR constant.
    Extract,
    /// `year(DATE) -> BIGINT`.
    Year,
}

impl ScalarFunction {
    pub fn name(self) -> &'static str {
        match self {
            ScalarFunction::Length => "length",
            ScalarFunction::Upper => "upper",
            ScalarFunction::Lower => "lower",
            ScalarFunction::Abs => "abs",
            ScalarFunction::Extract => "extract",
            ScalarFunction::Year => "year",
        }
    }
}

/// One `WHEN cond THEN value` arm of a CASE expression.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseBranch {
    pub when: ScalarExpr,
    pub then: ScalarExpr,
}

/// A bound scalar expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarExpr {
    Constant {
        value: ScalarValue,
        ty: LogicalTypeId,
    },
    ColumnRef {
        index: usize,
        ty: LogicalTypeId,
    },
    Unary {
        op: UnaryOp,
        child: Box<ScalarExpr>,
        ty: LogicalTypeId,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<ScalarExpr>,
        rhs: Box<ScalarExpr>,
        ty: LogicalTypeId,
    },
    Call {
        func: ScalarFunction,
        args: Vec<ScalarExpr>,
        ty: LogicalTypeId,
    },
    Case {
        branches: Vec<CaseBranch>,
        else_expr: Option<Box<ScalarExpr>>,
        ty: LogicalTypeId,
    },
}

impl ScalarExpr {
    // ── Constructors ────────────────────────────────────────────────────

    pub fn constant(value: ScalarValue, ty: LogicalTypeId) -> Self {
        ScalarExpr::Constant { value, ty }
    }

    pub fn integer(v: i64) -> Self {
        Self::constant(ScalarValue::Integer(v), LogicalTypeId::Integer)
    }

    pub fn bigint(v: i64) -> Self {
        Self::constant(ScalarValue::Integer(v), LogicalTypeId::BigInt)
    }

    pub fn double(v: f64) -> Self {
        Self::constant(ScalarValue::Double(v), LogicalTypeId::Double)
    }

    pub fn varchar(v: impl Into<String>) -> Self {
        Self::constant(ScalarValue::Varchar(v.into()), LogicalTypeId::Varchar)
    }

    pub fn column(index: usize, ty: LogicalTypeId) -> Self {
        ScalarExpr::ColumnRef { index, ty }
    }

    pub fn unary(op: UnaryOp, child: ScalarExpr, ty: LogicalTypeId) -> Self {
        ScalarExpr::Unary {
            op,
            child: Box::new(child),
            ty,
        }
    }

    pub fn binary(op: BinaryOp, lhs: ScalarExpr, rhs: ScalarExpr, ty: LogicalTypeId) -> Self {
        ScalarExpr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            ty,
        }
    }

    pub fn call(func: ScalarFunction, args: Vec<ScalarExpr>, ty: LogicalTypeId) -> Self {
        ScalarExpr::Call { func, args, ty }
    }

    pub fn case_when(
        branches: Vec<CaseBranch>,
        else_expr: Option<ScalarExpr>,
        ty: LogicalTypeId,
    ) -> Self {
        ScalarExpr::Case {
            branches,
            else_expr: else_expr.map(Box::new),
            ty,
        }
    }

    // ── Inspection ──────────────────────────────────────────────────────

    pub fn return_type(&self) -> LogicalTypeId {
        match self {
            ScalarExpr::Constant { ty, .. }
            | ScalarExpr::ColumnRef { ty, .. }
            | ScalarExpr::Unary { ty, .. }
            | ScalarExpr::Binary { ty, .. }
            | ScalarExpr::Call { ty, .. }
            | ScalarExpr::Case { ty, .. } => *ty,
        }
    }

    /// Number of nodes in the tree, root included. This is the complexity
    /// measure the JIT trigger policy compares against its threshold.
    pub fn complexity(&self) -> usize {
        let mut count = 1;
        self.for_each_child(&mut |child| count += child.complexity());
        count
    }

    /// The distinct input column indices this expression reads, ascending.
    /// The ordering is load-bearing: it defines the argument positions of the
    /// compiled routine and the order of generated null checks.
    pub fn referenced_columns(&self) -> Vec<usize> {
        let mut cols = Vec::new();
        self.collect_columns(&mut cols);
        cols.sort_unstable();
        cols.dedup();
        cols
    }

    fn collect_columns(&self, out: &mut Vec<usize>) {
        if let ScalarExpr::ColumnRef { index, .. } = self {
            out.push(*index);
        }
        self.for_each_child(&mut |child| child.collect_columns(out));
    }

    fn for_each_child<'a>(&'a self, f: &mut impl FnMut(&'a ScalarExpr)) {
        match self {
            ScalarExpr::Constant { .. } | ScalarExpr::ColumnRef { .. } => {}
            ScalarExpr::Unary { child, .. } => f(child),
            ScalarExpr::Binary { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            ScalarExpr::Call { args, .. } => {
                for arg in args {
                    f(arg);
                }
            }
            ScalarExpr::Case {
                branches,
                else_expr,
                ..
            } => {
                for branch in branches {
                    f(&branch.when);
                    f(&branch.then);
                }
                if let Some(e) = else_expr {
                    f(e);
                }
            }
        }
    }
}
