//! Kestrel RT
//!
//! The runtime half of the expression engine: C-ABI records and host
//! callbacks for the embedded LuaJIT state, the scratch-pool vector bridge,
//! the runtime wrapper, the row-at-a-time interpreter, and the expression
//! executor that decides per expression whether to JIT and falls back to the
//! interpreter on any failure.

pub mod bridge;
pub mod executor;
pub mod ffi;
pub mod interpreter;
pub mod session;
pub mod wrapper;

pub use executor::{ExecError, ExpressionExecutor, JitExprState};
pub use session::{ConfigError, SessionConfig, SetScope, SettingValue};
