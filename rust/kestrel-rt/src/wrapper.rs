//! Embedded LuaJIT state wrapper.
//!
//! One wrapper (one runtime state) per expression executor. The wrapper loads
//! generated scripts that install a function under a caller-chosen global
//! symbol, and invokes those functions with light-userdata pointers to
//! FFIVectors plus the row count.
//!
//! The state is created with the full standard library set so the FFI library
//! is available to generated code. Host callbacks are published once, at
//! construction, as light-userdata address globals; every generated preamble
//! casts them to typed function pointers.

use std::ffi::c_void;

use mlua::{Function, LightUserData, Lua, LuaOptions, MultiValue, StdLib, Value};
use thiserror::Error;

use crate::ffi;
use crate::ffi::FFIVector;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to initialize scripting runtime: {0}")]
    Init(String),

    #[error("compilation failed: {0}")]
    Compile(String),

    #[error("compiled symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("runtime error: {0}")]
    Invoke(String),
}

/// Owns one scripting-runtime state for the lifetime of its executor.
pub struct RuntimeWrapper {
    lua: Lua,
}

impl RuntimeWrapper {
    /// Create the runtime state, open the standard libraries (FFI included),
    /// and publish the host callback addresses. Any failure here makes the
    /// JIT permanently unavailable to the owning executor.
    pub fn new() -> Result<Self, RuntimeError> {
        // The FFI library lets scripts read and write raw memory, which is
        // exactly what the generated code is for.
        let lua = unsafe { Lua::unsafe_new_with(StdLib::ALL, LuaOptions::default()) };
        let wrapper = RuntimeWrapper { lua };
        wrapper
            .register_host_callbacks()
            .map_err(|e| RuntimeError::Init(e.to_string()))?;
        wrapper
            .lua
            .load("local ffi = require('ffi'); assert(type(ffi.cdef) == 'function')")
            .exec()
            .map_err(|e| RuntimeError::Init(e.to_string()))?;
        Ok(wrapper)
    }

    fn register_host_callbacks(&self) -> mlua::Result<()> {
        let globals = self.lua.globals();
        globals.set(
            "host_append_string",
            LightUserData(ffi::kestrel_append_string as *const () as *mut c_void),
        )?;
        globals.set(
            "host_set_string_null",
            LightUserData(ffi::kestrel_set_string_null as *const () as *mut c_void),
        )?;
        globals.set(
            "host_extract_from_date",
            LightUserData(ffi::kestrel_extract_from_date as *const () as *mut c_void),
        )?;
        globals.set(
            "host_extract_from_timestamp",
            LightUserData(ffi::kestrel_extract_from_timestamp as *const () as *mut c_void),
        )?;
        globals.set(
            "host_extract_year_from_date",
            LightUserData(ffi::kestrel_extract_year_from_date as *const () as *mut c_void),
        )?;
        Ok(())
    }

    /// Parse and run `source`, which installs a function under `symbol`. On a
    /// load error nothing has executed, so the global namespace is untouched.
    pub fn compile_and_bind(&self, source: &str, symbol: &str) -> Result<(), RuntimeError> {
        self.lua
            .load(source)
            .set_name(symbol)
            .exec()
            .map_err(|e| RuntimeError::Compile(e.to_string()))?;
        let bound: Value = self
            .lua
            .globals()
            .get(symbol)
            .map_err(|e| RuntimeError::Compile(e.to_string()))?;
        if !matches!(bound, Value::Function(_)) {
            return Err(RuntimeError::SymbolNotFound(symbol.to_owned()));
        }
        Ok(())
    }

    /// Call the compiled function `symbol(output, input1, .., inputN, count)`.
    ///
    /// # Safety
    /// The pointed-to FFIVectors, their buffers, and everything they borrow
    /// must stay valid until this returns; the compiled routine reads and
    /// writes through them.
    pub fn invoke(
        &self,
        symbol: &str,
        output: *mut FFIVector,
        inputs: &[*mut FFIVector],
        count: usize,
    ) -> Result<(), RuntimeError> {
        let func: Function = self
            .lua
            .globals()
            .get(symbol)
            .map_err(|_| RuntimeError::SymbolNotFound(symbol.to_owned()))?;

        let mut args = Vec::with_capacity(inputs.len() + 2);
        args.push(Value::LightUserData(LightUserData(output as *mut c_void)));
        for &input in inputs {
            args.push(Value::LightUserData(LightUserData(input as *mut c_void)));
        }
        args.push(Value::Integer(count as i64));

        func.call::<()>(MultiValue::from_vec(args))
            .map_err(|e| RuntimeError::Invoke(e.to_string()))
    }

    /// The underlying runtime handle, for bespoke call sites.
    pub fn state(&self) -> &Lua {
        &self.lua
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_output() -> FFIVector {
        FFIVector {
            data: std::ptr::null_mut(),
            nullmask: std::ptr::null_mut(),
            count: 0,
            logical_type_id: 0,
            vector_kind: 0,
            original_vector: std::ptr::null_mut(),
        }
    }

    #[test]
    fn creates_state_with_ffi() {
        let wrapper = RuntimeWrapper::new().unwrap();
        let loaded: bool = wrapper
            .state()
            .load("return require('ffi') ~= nil")
            .eval()
            .unwrap();
        assert!(loaded);
    }

    #[test]
    fn compile_and_invoke_round_trip() {
        let wrapper = RuntimeWrapper::new().unwrap();
        wrapper
            .compile_and_bind("test_fn_ok = function(output_ffi, count) end", "test_fn_ok")
            .unwrap();
        let mut out = dummy_output();
        wrapper.invoke("test_fn_ok", &mut out, &[], 0).unwrap();
    }

    #[test]
    fn syntax_error_is_captured() {
        let wrapper = RuntimeWrapper::new().unwrap();
        let err = wrapper
            .compile_and_bind("test_fn_bad = function(", "test_fn_bad")
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Compile(_)));
        // The failed load must not have bound anything.
        let bound: Value = wrapper.state().globals().get("test_fn_bad").unwrap();
        assert!(matches!(bound, Value::Nil));
    }

    #[test]
    fn script_that_defines_nothing_is_rejected() {
        let wrapper = RuntimeWrapper::new().unwrap();
        let err = wrapper
            .compile_and_bind("local x = 1", "test_fn_missing")
            .unwrap_err();
        assert!(matches!(err, RuntimeError::SymbolNotFound(_)));
    }

    #[test]
    fn runtime_error_message_is_captured() {
        let wrapper = RuntimeWrapper::new().unwrap();
        wrapper
            .compile_and_bind(
                "test_fn_boom = function(output_ffi, count) error('boom') end",
                "test_fn_boom",
            )
            .unwrap();
        let mut out = dummy_output();
        let err = wrapper.invoke("test_fn_boom", &mut out, &[], 1).unwrap_err();
        match err {
            RuntimeError::Invoke(msg) => assert!(msg.contains("boom")),
            other => panic!("expected invoke error, got {other:?}"),
        }
    }

    #[test]
    fn invoking_unknown_symbol_fails() {
        let wrapper = RuntimeWrapper::new().unwrap();
        let mut out = dummy_output();
        let err = wrapper.invoke("no_such_symbol", &mut out, &[], 0).unwrap_err();
        assert!(matches!(err, RuntimeError::SymbolNotFound(_)));
    }
}
