//! SQL type definitions.

use serde::{Deserialize, Serialize};

/// Logical SQL column types.
///
/// Each dialect maps these onto its own native type names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlType {
    // Integer types
    TinyInt,
    SmallInt,
    Integer,
    BigInt,

    // Floating point
    Real,
    Double,

    // Fixed precision
    Decimal { precision: u8, scale: u8 },

    // Boolean
    Boolean,

    // String types
    Char(u32),
    VarChar(u32),
    Text,

    // Binary types
    Binary(u32),
    VarBinary(u32),
    Blob,

    // Date/time types
    Date,
    Time,
    DateTime,
    Timestamp,
    TimestampTz,

    Uuid,

    Json,

    Array(Box<SqlType>),

    /// Native type name passed through untouched
    Custom(String),
}

impl SqlType {
    /// Check if this type is text-based.
    pub const fn is_text(&self) -> bool {
        matches!(self, SqlType::Char(_) | SqlType::VarChar(_) | SqlType::Text)
    }

    /// Check if this type is boolean.
    pub const fn is_boolean(&self) -> bool {
        matches!(self, SqlType::Boolean)
    }

    /// Check if this type is a date/time type.
    pub const fn is_temporal(&self) -> bool {
        matches!(
            self,
            SqlType::Date
                | SqlType::Time
                | SqlType::DateTime
                | SqlType::Timestamp
                | SqlType::TimestampTz
        )
    }
}
