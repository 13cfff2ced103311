//! Kestrel Core
//!
//! Shared types used across the translator, bridge, and executor: logical
//! types, the scalar expression IR, and the columnar vector/batch model with
//! bit-packed validity.

pub mod expr;
pub mod types;
pub mod vector;

pub use expr::{BinaryOp, CaseBranch, ScalarExpr, ScalarFunction, ScalarValue, UnaryOp};
pub use types::{Interval, LogicalTypeId};
pub use vector::{Batch, UnifiedFormat, ValidityMask, Vector, VectorKind, STANDARD_BATCH_SIZE};
