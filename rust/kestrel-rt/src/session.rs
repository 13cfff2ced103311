//! Session-local JIT configuration.
//!
//! Three knobs gate the JIT, all session-local: attempts to set them at
//! GLOBAL scope are rejected, and values are cast and validated at set time.

use thiserror::Error;

pub const DEFAULT_JIT_COMPLEXITY_THRESHOLD: u64 = 2;
pub const DEFAULT_JIT_TRIGGER_COUNT: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetScope {
    Global,
    Session,
}

/// A value supplied to `SET`, before casting to the option's type.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Boolean(bool),
    Integer(i64),
    Text(String),
}

impl SettingValue {
    fn cast_bool(&self, name: &str) -> Result<bool, ConfigError> {
        match self {
            SettingValue::Boolean(b) => Ok(*b),
            SettingValue::Integer(0) => Ok(false),
            SettingValue::Integer(1) => Ok(true),
            SettingValue::Text(t) => match t.to_ascii_lowercase().as_str() {
                "true" | "on" | "1" => Ok(true),
                "false" | "off" | "0" => Ok(false),
                _ => Err(ConfigError::InvalidValue {
                    name: name.to_owned(),
                    reason: format!("cannot cast '{t}' to BOOLEAN"),
                }),
            },
            other => Err(ConfigError::InvalidValue {
                name: name.to_owned(),
                reason: format!("cannot cast {other:?} to BOOLEAN"),
            }),
        }
    }

    fn cast_integer(&self, name: &str) -> Result<i64, ConfigError> {
        match self {
            SettingValue::Integer(v) => Ok(*v),
            SettingValue::Text(t) => t.parse().map_err(|_| ConfigError::InvalidValue {
                name: name.to_owned(),
                reason: format!("cannot cast '{t}' to BIGINT"),
            }),
            other => Err(ConfigError::InvalidValue {
                name: name.to_owned(),
                reason: format!("cannot cast {other:?} to BIGINT"),
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot SET GLOBAL {0}: this setting is session-local")]
    SessionOnly(String),

    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("unrecognized configuration parameter \"{0}\"")]
    UnknownOption(String),
}

/// Per-session configuration read by the expression executor.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub enable_jit: bool,
    pub jit_complexity_threshold: u64,
    pub jit_trigger_count: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            enable_jit: true,
            jit_complexity_threshold: DEFAULT_JIT_COMPLEXITY_THRESHOLD,
            jit_trigger_count: DEFAULT_JIT_TRIGGER_COUNT,
        }
    }
}

impl SessionConfig {
    /// Apply `SET [scope] name = value` for the JIT options.
    pub fn set_option(
        &mut self,
        name: &str,
        scope: SetScope,
        value: &SettingValue,
    ) -> Result<(), ConfigError> {
        let lowered = name.to_ascii_lowercase();
        let session_only = |name: &str| -> Result<(), ConfigError> {
            if scope == SetScope::Global {
                Err(ConfigError::SessionOnly(name.to_owned()))
            } else {
                Ok(())
            }
        };
        let non_negative = |name: &str, v: i64| -> Result<u64, ConfigError> {
            u64::try_from(v).map_err(|_| ConfigError::InvalidValue {
                name: name.to_owned(),
                reason: format!("must be non-negative, got {v}"),
            })
        };
        match lowered.as_str() {
            "enable_jit" => {
                session_only(&lowered)?;
                self.enable_jit = value.cast_bool(&lowered)?;
            }
            "jit_complexity_threshold" => {
                session_only(&lowered)?;
                let v = value.cast_integer(&lowered)?;
                self.jit_complexity_threshold = non_negative(&lowered, v)?;
            }
            "jit_trigger_count" => {
                session_only(&lowered)?;
                let v = value.cast_integer(&lowered)?;
                self.jit_trigger_count = non_negative(&lowered, v)?;
            }
            _ => return Err(ConfigError::UnknownOption(name.to_owned())),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_scope_is_rejected() {
        let mut config = SessionConfig::default();
        for name in ["enable_jit", "jit_complexity_threshold", "jit_trigger_count"] {
            let err = config
                .set_option(name, SetScope::Global, &SettingValue::Integer(1))
                .unwrap_err();
            assert!(matches!(err, ConfigError::SessionOnly(_)), "{name}");
        }
    }

    #[test]
    fn boolean_casts() {
        let mut config = SessionConfig::default();
        config
            .set_option(
                "enable_jit",
                SetScope::Session,
                &SettingValue::Text("false".to_owned()),
            )
            .unwrap();
        assert!(!config.enable_jit);

        config
            .set_option("ENABLE_JIT", SetScope::Session, &SettingValue::Integer(1))
            .unwrap();
        assert!(config.enable_jit);

        let err = config
            .set_option(
                "enable_jit",
                SetScope::Session,
                &SettingValue::Text("maybe".to_owned()),
            )
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn integer_knobs_validate_at_set_time() {
        let mut config = SessionConfig::default();
        config
            .set_option(
                "jit_trigger_count",
                SetScope::Session,
                &SettingValue::Integer(0),
            )
            .unwrap();
        assert_eq!(config.jit_trigger_count, 0);

        let err = config
            .set_option(
                "jit_complexity_threshold",
                SetScope::Session,
                &SettingValue::Integer(-5),
            )
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        assert_eq!(
            config.jit_complexity_threshold,
            DEFAULT_JIT_COMPLEXITY_THRESHOLD
        );
    }

    #[test]
    fn unknown_option_is_rejected() {
        let mut config = SessionConfig::default();
        let err = config
            .set_option("jit_warp_factor", SetScope::Session, &SettingValue::Integer(9))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownOption(_)));
    }
}
