//! Full-script assembly.
//!
//! Wraps a translated row-logic block into the complete source text handed to
//! the runtime: the FFI preamble, one global function named by the caller's
//! symbol, typed cast locals for the output and every input argument, and the
//! batch loop.
//!
//! The preamble `cdef` is guarded by `pcall`: LuaJIT keeps one global C type
//! namespace per state, so the second compilation in a state would otherwise
//! fail on redefinition. Host callbacks are reached by casting light-userdata
//! address globals registered by the runtime wrapper; the generated source
//! never embeds a pointer value, which keeps it deterministic.

use crate::translator::{RowLogic, TranslateError, TranslatorContext};
use kestrel_core::LogicalTypeId;

/// Type declarations and host-callback bindings prepended to every compiled
/// script. The width-typedef family (`int8_t`, `int32_t`, ...) is built into
/// LuaJIT's FFI and must not be redeclared.
pub const SCRIPT_PREAMBLE: &str = r#"local ffi = require('ffi')
pcall(ffi.cdef, [[
typedef struct FFIVector {
    void *data;
    uint8_t *nullmask;
    uint64_t count;
    int32_t logical_type_id;
    int32_t vector_kind;
    void *original_vector;
} FFIVector;
typedef struct FFIString {
    char *ptr;
    uint32_t len;
} FFIString;
typedef struct FFIInterval {
    int32_t months;
    int32_t days;
    int64_t micros;
} FFIInterval;
typedef void (*kestrel_append_string_fn)(void *out_vec, uint64_t row, const char *ptr, uint32_t len);
typedef void (*kestrel_set_string_null_fn)(void *out_vec, uint64_t row);
typedef int64_t (*kestrel_extract_from_date_fn)(int32_t date_val, const char *part);
typedef int64_t (*kestrel_extract_from_timestamp_fn)(int64_t micros, const char *part);
typedef int64_t (*kestrel_extract_year_fn)(int32_t date_val);
]])
local append_string = ffi.cast('kestrel_append_string_fn', host_append_string)
local set_string_null = ffi.cast('kestrel_set_string_null_fn', host_set_string_null)
local extract_from_date = ffi.cast('kestrel_extract_from_date_fn', host_extract_from_date)
local extract_from_timestamp = ffi.cast('kestrel_extract_from_timestamp_fn', host_extract_from_timestamp)
local extract_year_from_date = ffi.cast('kestrel_extract_year_fn', host_extract_year_from_date)
"#;

/// The Lua-side pointer type a column of `ty` is cast to. Types outside this
/// map are not JIT-supported.
pub fn lua_pointer_type(ty: LogicalTypeId) -> Result<&'static str, TranslateError> {
    match ty {
        LogicalTypeId::Boolean => Ok("int8_t*"),
        LogicalTypeId::Integer => Ok("int32_t*"),
        LogicalTypeId::BigInt => Ok("int64_t*"),
        LogicalTypeId::Double => Ok("double*"),
        LogicalTypeId::Date => Ok("int32_t*"),
        LogicalTypeId::Timestamp => Ok("int64_t*"),
        LogicalTypeId::Varchar => Ok("FFIString*"),
        LogicalTypeId::Interval => Ok("FFIInterval*"),
        ty => Err(TranslateError::UnsupportedType(ty)),
    }
}

/// Assemble the complete source text for one compiled expression.
///
/// The generated function has the signature
/// `(output_ffi, input1_ffi, .., inputN_ffi, count)` where `N` is the number
/// of referenced columns recorded in `row_logic`.
pub fn build_expression_script(
    symbol: &str,
    row_logic: &RowLogic,
    ctx: &TranslatorContext,
    output_type: LogicalTypeId,
) -> Result<String, TranslateError> {
    let mut script = String::from(SCRIPT_PREAMBLE);

    script.push_str(symbol);
    script.push_str(" = function(output_ffi");
    for arg in 1..=row_logic.referenced_columns.len() {
        script.push_str(&format!(", input{arg}_ffi"));
    }
    script.push_str(", count)\n");

    script.push_str("    local output_vec = ffi.cast('FFIVector*', output_ffi)\n");
    if output_type != LogicalTypeId::Varchar {
        let out_ty = lua_pointer_type(output_type)?;
        script.push_str(&format!(
            "    local output_data = ffi.cast('{out_ty}', output_vec.data)\n"
        ));
    }
    script.push_str("    local output_nullmask = output_vec.nullmask\n");

    for (pos, &col) in row_logic.referenced_columns.iter().enumerate() {
        let arg = pos + 1;
        let in_ty = lua_pointer_type(ctx.column_type(col)?)?;
        script.push_str(&format!(
            "    local input{arg}_vec = ffi.cast('FFIVector*', input{arg}_ffi)\n"
        ));
        script.push_str(&format!(
            "    local input{arg}_data = ffi.cast('{in_ty}', input{arg}_vec.data)\n"
        ));
        script.push_str(&format!(
            "    local input{arg}_nullmask = input{arg}_vec.nullmask\n"
        ));
    }

    script.push_str("    for i = 0, count - 1 do\n");
    for line in row_logic.body.lines() {
        script.push_str("        ");
        script.push_str(line);
        script.push('\n');
    }
    script.push_str("    end\n");
    script.push_str("end\n");
    Ok(script)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translator::translate_row_logic;
    use kestrel_core::{BinaryOp, ScalarExpr};

    fn sample() -> (RowLogic, TranslatorContext) {
        let ctx = TranslatorContext::new(vec![LogicalTypeId::Integer, LogicalTypeId::Integer]);
        let expr = ScalarExpr::binary(
            BinaryOp::Add,
            ScalarExpr::column(0, LogicalTypeId::Integer),
            ScalarExpr::column(1, LogicalTypeId::Integer),
            LogicalTypeId::Integer,
        );
        (translate_row_logic(&expr, &ctx).unwrap(), ctx)
    }

    #[test]
    fn script_shape() {
        let (logic, ctx) = sample();
        let script =
            build_expression_script("jit_expr_fn_0", &logic, &ctx, LogicalTypeId::Integer).unwrap();

        assert!(script.starts_with(SCRIPT_PREAMBLE));
        assert!(script.contains("jit_expr_fn_0 = function(output_ffi, input1_ffi, input2_ffi, count)"));
        assert!(script.contains("local output_data = ffi.cast('int32_t*', output_vec.data)"));
        assert!(script.contains("local input1_data = ffi.cast('int32_t*', input1_vec.data)"));
        assert!(script.contains("local input2_data = ffi.cast('int32_t*', input2_vec.data)"));
        assert!(script.contains("for i = 0, count - 1 do"));
        assert!(script.ends_with("    end\nend\n"));
    }

    #[test]
    fn varchar_output_has_no_data_cast() {
        let ctx = TranslatorContext::new(vec![LogicalTypeId::Varchar]);
        let expr = ScalarExpr::binary(
            BinaryOp::Concat,
            ScalarExpr::column(0, LogicalTypeId::Varchar),
            ScalarExpr::varchar("x"),
            LogicalTypeId::Varchar,
        );
        let logic = translate_row_logic(&expr, &ctx).unwrap();
        let script =
            build_expression_script("jit_expr_fn_1", &logic, &ctx, LogicalTypeId::Varchar).unwrap();
        assert!(!script.contains("local output_data ="));
        assert!(script.contains("local input1_data = ffi.cast('FFIString*', input1_vec.data)"));
    }

    #[test]
    fn zero_input_signature() {
        let ctx = TranslatorContext::new(vec![]);
        let logic = translate_row_logic(&ScalarExpr::integer(7), &ctx).unwrap();
        let script =
            build_expression_script("jit_expr_fn_2", &logic, &ctx, LogicalTypeId::Integer).unwrap();
        assert!(script.contains("jit_expr_fn_2 = function(output_ffi, count)"));
    }

    #[test]
    fn unsupported_output_type_fails_assembly() {
        let ctx = TranslatorContext::new(vec![]);
        let logic = translate_row_logic(&ScalarExpr::integer(7), &ctx).unwrap();
        let err = build_expression_script("jit_expr_fn_3", &logic, &ctx, LogicalTypeId::Float)
            .unwrap_err();
        assert!(matches!(
            err,
            TranslateError::UnsupportedType(LogicalTypeId::Float)
        ));
    }

    #[test]
    fn assembly_is_deterministic_apart_from_symbol() {
        let (logic, ctx) = sample();
        let a = build_expression_script("jit_expr_fn_4", &logic, &ctx, LogicalTypeId::Integer)
            .unwrap();
        let b = build_expression_script("jit_expr_fn_5", &logic, &ctx, LogicalTypeId::Integer)
            .unwrap();
        assert_eq!(
            a.replace("jit_expr_fn_4", "jit_expr_fn_5"),
            b
        );
    }
}
