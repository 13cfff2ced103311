//! Kestrel Codegen
//!
//! Lowers a bound expression tree into Lua source for the embedded runtime:
//! a per-row logic block (translator) wrapped into a complete batch-loop
//! function with FFI casts and the host-callback preamble (script assembly).
//!
//! Generation is deterministic: equal trees with equal column-type context
//! produce byte-identical source apart from the function symbol name.

pub mod script;
pub mod translator;

pub use script::{build_expression_script, lua_pointer_type, SCRIPT_PREAMBLE};
pub use translator::{translate_row_logic, RowLogic, TranslateError, TranslatorContext};
