//! Logical type tags and fixed-width physical layouts.
//!
//! The discriminants are part of the FFI contract: the tag is stored in
//! `FFIVector.logical_type_id` and read back by generated code, so the enum
//! is `#[repr(i32)]` and the values are stable.

/// Logical type of a column or expression result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum LogicalTypeId {
    Boolean = 0,
    TinyInt = 1,
    SmallInt = 2,
    Integer = 3,
    BigInt = 4,
    Float = 5,
    Double = 6,
    Date = 7,
    Timestamp = 8,
    Interval = 9,
    Varchar = 10,
}

impl LogicalTypeId {
    /// Physical width in bytes of one slot, or `None` for variable-width
    /// types (VARCHAR is stored as per-slot strings engine-side).
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            LogicalTypeId::Boolean => Some(1),
            LogicalTypeId::TinyInt => Some(1),
            LogicalTypeId::SmallInt => Some(2),
            LogicalTypeId::Integer => Some(4),
            LogicalTypeId::BigInt => Some(8),
            LogicalTypeId::Float => Some(4),
            LogicalTypeId::Double => Some(8),
            LogicalTypeId::Date => Some(4),
            LogicalTypeId::Timestamp => Some(8),
            LogicalTypeId::Interval => Some(std::mem::size_of::<Interval>()),
            LogicalTypeId::Varchar => None,
        }
    }

    /// True for the numeric family (arithmetic operands).
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            LogicalTypeId::TinyInt
                | LogicalTypeId::SmallInt
                | LogicalTypeId::Integer
                | LogicalTypeId::BigInt
                | LogicalTypeId::Float
                | LogicalTypeId::Double
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            LogicalTypeId::Boolean => "BOOLEAN",
            LogicalTypeId::TinyInt => "TINYINT",
            LogicalTypeId::SmallInt => "SMALLINT",
            LogicalTypeId::Integer => "INTEGER",
            LogicalTypeId::BigInt => "BIGINT",
            LogicalTypeId::Float => "FLOAT",
            LogicalTypeId::Double => "DOUBLE",
            LogicalTypeId::Date => "DATE",
            LogicalTypeId::Timestamp => "TIMESTAMP",
            LogicalTypeId::Interval => "INTERVAL",
            LogicalTypeId::Varchar => "VARCHAR",
        }
    }
}

impl std::fmt::Display for LogicalTypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Calendar interval: independent month, day, and microsecond components.
///
/// Layout matches the FFIInterval record that crosses the FFI boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct Interval {
    pub months: i32,
    pub days: i32,
    pub micros: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths_match_layout() {
        assert_eq!(LogicalTypeId::Integer.fixed_width(), Some(4));
        assert_eq!(LogicalTypeId::Timestamp.fixed_width(), Some(8));
        assert_eq!(LogicalTypeId::Interval.fixed_width(), Some(16));
        assert_eq!(LogicalTypeId::Varchar.fixed_width(), None);
    }

    #[test]
    fn tags_are_stable() {
        // The discriminants cross the FFI; a renumbering is a breaking change.
        assert_eq!(LogicalTypeId::Boolean as i32, 0);
        assert_eq!(LogicalTypeId::Integer as i32, 3);
        assert_eq!(LogicalTypeId::Varchar as i32, 10);
    }
}
