//! Dynamic SQL values.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, TypeError};
use crate::types::SqlType;

/// Days between 0001-01-01 (CE day 1) and 1970-01-01.
const UNIX_EPOCH_CE_DAYS: i32 = 719_163;

/// A dynamically-typed SQL value.
///
/// Values are captured when an expression is built and end up either inlined
/// as literals or bound as named parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,

    /// Boolean value
    Bool(bool),

    /// 8-bit signed integer
    TinyInt(i8),

    /// 16-bit signed integer
    SmallInt(i16),

    /// 32-bit signed integer
    Int(i32),

    /// 64-bit signed integer
    BigInt(i64),

    /// 32-bit floating point
    Float(f32),

    /// 64-bit floating point
    Double(f64),

    /// Arbitrary precision decimal (stored as string)
    Decimal(String),

    /// Text string
    Text(String),

    /// Binary data
    Bytes(Vec<u8>),

    /// Date (days since epoch)
    Date(i32),

    /// Time (microseconds since midnight)
    Time(i64),

    /// Timestamp (microseconds since epoch)
    Timestamp(i64),

    /// Timestamp with timezone (microseconds since epoch, UTC)
    TimestampTz(i64),

    /// UUID (as 16 bytes)
    Uuid([u8; 16]),

    /// JSON value
    Json(serde_json::Value),

    /// Captured collection, expanded into an IN list
    Array(Vec<Value>),

    /// SQL DEFAULT keyword
    Default,
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::TinyInt(_) => "TINYINT",
            Value::SmallInt(_) => "SMALLINT",
            Value::Int(_) => "INTEGER",
            Value::BigInt(_) => "BIGINT",
            Value::Float(_) => "REAL",
            Value::Double(_) => "DOUBLE",
            Value::Decimal(_) => "DECIMAL",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::Date(_) => "DATE",
            Value::Time(_) => "TIME",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::TimestampTz(_) => "TIMESTAMPTZ",
            Value::Uuid(_) => "UUID",
            Value::Json(_) => "JSON",
            Value::Array(_) => "ARRAY",
            Value::Default => "DEFAULT",
        }
    }

    /// The SQL type a value of this variant binds as, if it has one.
    pub fn sql_type(&self) -> Option<SqlType> {
        let ty = match self {
            Value::Null | Value::Default => return None,
            Value::Bool(_) => SqlType::Boolean,
            Value::TinyInt(_) => SqlType::TinyInt,
            Value::SmallInt(_) => SqlType::SmallInt,
            Value::Int(_) => SqlType::Integer,
            Value::BigInt(_) => SqlType::BigInt,
            Value::Float(_) => SqlType::Real,
            Value::Double(_) => SqlType::Double,
            Value::Decimal(_) => SqlType::Decimal {
                precision: 38,
                scale: 10,
            },
            Value::Text(_) => SqlType::Text,
            Value::Bytes(_) => SqlType::Blob,
            Value::Date(_) => SqlType::Date,
            Value::Time(_) => SqlType::Time,
            Value::Timestamp(_) => SqlType::Timestamp,
            Value::TimestampTz(_) => SqlType::TimestampTz,
            Value::Uuid(_) => SqlType::Uuid,
            Value::Json(_) => SqlType::Json,
            Value::Array(items) => {
                let inner = items
                    .iter()
                    .find_map(Value::sql_type)
                    .unwrap_or(SqlType::Text);
                SqlType::Array(Box::new(inner))
            }
        };
        Some(ty)
    }

    /// Try to convert this value to an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::TinyInt(v) => Some(i64::from(*v)),
            Value::SmallInt(v) => Some(i64::from(*v)),
            Value::Int(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            Value::Bool(v) => Some(if *v { 1 } else { 0 }),
            _ => None,
        }
    }

    /// Try to convert this value to an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            Value::TinyInt(v) => Some(f64::from(*v)),
            Value::SmallInt(v) => Some(f64::from(*v)),
            Value::Int(v) => Some(f64::from(*v)),
            Value::BigInt(v) => Some(*v as f64),
            Value::Decimal(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    /// True for integer-valued variants.
    pub const fn is_integer(&self) -> bool {
        matches!(
            self,
            Value::TinyInt(_) | Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_)
        )
    }

    /// Interpret this value as a calendar date.
    ///
    /// Timestamps are truncated to their date; text must be `YYYY-MM-DD` or an
    /// ISO-8601 date-time.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(days) => {
                NaiveDate::from_num_days_from_ce_opt(days.checked_add(UNIX_EPOCH_CE_DAYS)?)
            }
            Value::Timestamp(_) | Value::TimestampTz(_) | Value::Text(_) => {
                self.as_datetime().map(|dt| dt.date())
            }
            _ => None,
        }
    }

    /// Interpret this value as a date-time (UTC for `TimestampTz`).
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Timestamp(micros) | Value::TimestampTz(micros) => {
                DateTime::from_timestamp_micros(*micros).map(|dt| dt.naive_utc())
            }
            Value::Date(_) => self.as_date().map(|d| d.and_time(NaiveTime::MIN)),
            Value::Text(s) => {
                if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
                    return Some(dt);
                }
                if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
                    return Some(dt);
                }
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .map(|d| d.and_time(NaiveTime::MIN))
            }
            _ => None,
        }
    }

    /// Render the value as bare text, as used in physical shard table names.
    pub fn to_plain_text(&self) -> crate::Result<String> {
        match self {
            Value::Text(s) | Value::Decimal(s) => Ok(s.clone()),
            Value::Bool(v) => Ok(if *v { "1" } else { "0" }.to_string()),
            v if v.is_integer() => Ok(v.as_i64().unwrap_or_default().to_string()),
            Value::Date(_) => Ok(self
                .as_date()
                .map(|d| d.format("%Y%m%d").to_string())
                .unwrap_or_default()),
            Value::Uuid(bytes) => Ok(bytes.iter().map(|b| format!("{b:02x}")).collect()),
            other => Err(Error::Type(TypeError {
                expected: "text, integer or date",
                actual: other.type_name().to_string(),
                column: None,
                rust_type: None,
            })),
        }
    }

    /// Convert a `u64` to `Value`, clamping to `i64::MAX` if it overflows.
    ///
    /// A warning is logged when clamping occurs.
    fn from_u64_clamped(v: u64) -> Self {
        if let Ok(signed) = i64::try_from(v) {
            Value::BigInt(signed)
        } else {
            tracing::warn!(
                value = v,
                clamped_to = i64::MAX,
                "u64 value exceeds i64::MAX; clamping to i64::MAX"
            );
            Value::BigInt(i64::MAX)
        }
    }
}

// Conversion implementations
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::TinyInt(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::SmallInt(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::BigInt(i64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::from_u64_clamped(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v.num_days_from_ce() - UNIX_EPOCH_CE_DAYS)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v.and_utc().timestamp_micros())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::TimestampTz(v.timestamp_micros())
    }
}

/// Convert a `Vec<String>` into a captured collection.
impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::Array(v.into_iter().map(Value::Text).collect())
    }
}

impl From<Vec<&str>> for Value {
    fn from(v: Vec<&str>) -> Self {
        Value::Array(v.into_iter().map(Value::from).collect())
    }
}

impl From<Vec<i32>> for Value {
    fn from(v: Vec<i32>) -> Self {
        Value::Array(v.into_iter().map(Value::Int).collect())
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::Array(v.into_iter().map(Value::BigInt).collect())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_integers() {
        assert_eq!(Value::from(42i8), Value::TinyInt(42));
        assert_eq!(Value::from(42i32), Value::Int(42));
        assert_eq!(Value::from(42i64), Value::BigInt(42));
        assert_eq!(Value::from(7u32), Value::BigInt(7));
    }

    #[test]
    fn test_from_option() {
        assert_eq!(Value::from(Some(3i32)), Value::Int(3));
        assert_eq!(Value::from(None::<i32>), Value::Null);
    }

    #[test]
    fn test_collections_become_arrays() {
        let v = Value::from(vec![1i32, 2, 3]);
        assert_eq!(
            v,
            Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
        assert_eq!(
            v.sql_type(),
            Some(SqlType::Array(Box::new(SqlType::Integer)))
        );
    }

    #[test]
    fn test_date_round_trip_through_chrono() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let value = Value::from(date);
        assert_eq!(value.as_date(), Some(date));

        assert_eq!(Value::Date(0).as_date(), NaiveDate::from_ymd_opt(1970, 1, 1));
    }

    #[test]
    fn test_timestamp_truncates_to_date() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(23, 59, 0)
            .unwrap();
        let value = Value::from(dt);
        assert_eq!(value.as_date(), NaiveDate::from_ymd_opt(2024, 3, 15));
    }

    #[test]
    fn test_text_dates_parse() {
        assert_eq!(
            Value::from("2024-01-31").as_date(),
            NaiveDate::from_ymd_opt(2024, 1, 31)
        );
        assert_eq!(
            Value::from("2024-01-31T08:30:00").as_date(),
            NaiveDate::from_ymd_opt(2024, 1, 31)
        );
        assert_eq!(Value::from("not a date").as_date(), None);
    }

    #[test]
    fn test_plain_text() {
        assert_eq!(Value::Int(7).to_plain_text().unwrap(), "7");
        assert_eq!(Value::from("eu").to_plain_text().unwrap(), "eu");
        assert!(Value::Double(1.5).to_plain_text().is_err());
    }

    #[test]
    fn test_from_u64_clamped() {
        assert_eq!(Value::from(42_u64), Value::BigInt(42));
        assert_eq!(Value::from(u64::MAX), Value::BigInt(i64::MAX));
        assert_eq!(Value::from(Some(u64::MAX)), Value::BigInt(i64::MAX));
    }

    #[test]
    fn test_type_name() {
        assert_eq!(Value::Null.type_name(), "NULL");
        assert_eq!(Value::Text(String::new()).type_name(), "TEXT");
        assert_eq!(Value::Array(vec![]).type_name(), "ARRAY");
    }
}
