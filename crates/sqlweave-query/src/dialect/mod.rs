//! SQL dialect providers.
//!
//! Each supported database family gets one stateless [`DialectProvider`]
//! implementation supplying identifier quoting, parameter markers, operator
//! text, paging, casts, literal rendering, native-type mapping and the two
//! formatter registries (member access, method calls) used by the visitor.

pub(crate) mod functions;
mod mysql;
mod postgres;
mod registry;
mod sqlite;
mod sqlserver;

pub use mysql::MySqlDialect;
pub use postgres::PostgresDialect;
pub use registry::{FormatterRegistry, MemberFormatter, MethodEntry, MethodFormatter};
pub use sqlite::SqliteDialect;
pub use sqlserver::SqlServerDialect;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use sqlweave_core::{Error, Result, SqlType, TypeError, Value};

use crate::ast::{BinaryOp, Owner};

/// Supported database families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Postgres,
    Sqlite,
    Mysql,
    SqlServer,
}

impl Dialect {
    pub const ALL: [Dialect; 4] = [
        Dialect::Postgres,
        Dialect::Sqlite,
        Dialect::Mysql,
        Dialect::SqlServer,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Sqlite => "sqlite",
            Dialect::Mysql => "mysql",
            Dialect::SqlServer => "sqlserver",
        }
    }

    /// Shared provider for this dialect.
    pub fn provider(self) -> Arc<dyn DialectProvider> {
        provider_for(self)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Create the built-in provider for a dialect.
///
/// Providers are unit structs; their formatter registries are built once per
/// process and shared read-only.
pub fn provider_for(dialect: Dialect) -> Arc<dyn DialectProvider> {
    match dialect {
        Dialect::Postgres => Arc::new(PostgresDialect),
        Dialect::Sqlite => Arc::new(SqliteDialect),
        Dialect::Mysql => Arc::new(MySqlDialect),
        Dialect::SqlServer => Arc::new(SqlServerDialect),
    }
}

/// Paging fragments: `top` goes after `SELECT [DISTINCT]`, `suffix` at the end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Paging {
    pub top: Option<String>,
    pub suffix: Option<String>,
}

/// Where joined tables go in an UPDATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateJoinStyle {
    /// `UPDATE t AS a SET … FROM t2 AS b WHERE …` (PostgreSQL, SQLite)
    FromClause,
    /// `UPDATE t a INNER JOIN t2 b ON … SET …` (MySQL)
    JoinBeforeSet,
    /// `UPDATE a SET … FROM t a INNER JOIN t2 b ON …` (SQL Server)
    FromAfterSet,
}

/// How an INSERT hands back the generated identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityReturn {
    /// Appended clause, e.g. `RETURNING "Id"`
    Returning(String),
    /// Clause between the column list and VALUES, e.g. `OUTPUT INSERTED.[Id]`
    Output(String),
    /// Follow-up statement, e.g. `SELECT LAST_INSERT_ID()`
    Trailing(String),
}

/// Per-dialect SQL syntax strategy.
pub trait DialectProvider: Send + Sync + fmt::Debug {
    fn dialect(&self) -> Dialect;

    /// Quote an identifier, doubling embedded quote characters.
    fn quote_identifier(&self, name: &str) -> String;

    fn parameter_prefix(&self) -> &'static str {
        "@"
    }

    fn quote_table(&self, schema: Option<&str>, table: &str) -> String {
        match schema {
            Some(schema) => format!(
                "{}.{}",
                self.quote_identifier(schema),
                self.quote_identifier(table)
            ),
            None => self.quote_identifier(table),
        }
    }

    /// Operator text for arithmetic, comparison, boolean and bitwise operators.
    fn binary_operator(&self, op: BinaryOp) -> Result<&'static str> {
        match op {
            BinaryOp::Coalesce => Err(Error::unsupported("COALESCE is rendered as a function")),
            other => Ok(other.as_str()),
        }
    }

    /// Infix concatenation operator, or `None` when the dialect uses `CONCAT(…)`.
    fn concat_operator(&self) -> Option<&'static str> {
        Some("||")
    }

    fn paging(&self, skip: Option<u64>, take: Option<u64>, ordered: bool) -> Result<Paging>;

    /// Type name used inside `CAST(… AS …)`.
    fn cast_type(&self, ty: &SqlType) -> String {
        self.native_type(ty)
    }

    fn cast(&self, expr: &str, ty: &SqlType) -> String {
        format!("CAST({expr} AS {})", self.cast_type(ty))
    }

    fn boolean_literal(&self, value: bool) -> &'static str {
        if value { "TRUE" } else { "FALSE" }
    }

    /// Whether a bare predicate may appear in a SELECT list.
    fn supports_boolean_projection(&self) -> bool {
        true
    }

    fn quote_string(&self, s: &str) -> String {
        format!("'{}'", s.replace('\'', "''"))
    }

    fn blob_literal(&self, bytes: &[u8]) -> String {
        format!("X'{}'", hex(bytes))
    }

    /// Inline literal for non-parameterized mode.
    fn literal(&self, value: &Value) -> Result<String> {
        let sql = match value {
            Value::Null => "NULL".to_string(),
            Value::Default => "DEFAULT".to_string(),
            Value::Bool(b) => self.boolean_literal(*b).to_string(),
            Value::TinyInt(_) | Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_) => {
                value.as_i64().unwrap_or_default().to_string()
            }
            Value::Float(_) | Value::Double(_) => {
                let f = value.as_f64().unwrap_or(f64::NAN);
                if !f.is_finite() {
                    return Err(Error::unsupported(format!(
                        "non-finite number {f} has no SQL literal"
                    )));
                }
                format!("{f:?}")
            }
            Value::Decimal(s) => {
                if !is_decimal_text(s) {
                    return Err(Error::Type(TypeError {
                        expected: "numeric text",
                        actual: s.clone(),
                        column: None,
                        rust_type: None,
                    }));
                }
                s.clone()
            }
            Value::Text(s) => self.quote_string(s),
            Value::Bytes(b) => self.blob_literal(b),
            Value::Date(_) => match value.as_date() {
                Some(d) => format!("'{}'", d.format("%Y-%m-%d")),
                None => return Err(out_of_range(value)),
            },
            Value::Time(micros) => {
                let secs = micros.div_euclid(1_000_000);
                let nanos = micros.rem_euclid(1_000_000) * 1_000;
                let time = u32::try_from(secs)
                    .ok()
                    .zip(u32::try_from(nanos).ok())
                    .and_then(|(s, n)| NaiveTime::from_num_seconds_from_midnight_opt(s, n))
                    .ok_or_else(|| out_of_range(value))?;
                format!("'{}'", time.format("%H:%M:%S%.f"))
            }
            Value::Timestamp(micros) => match DateTime::from_timestamp_micros(*micros) {
                Some(dt) => format!("'{}'", dt.naive_utc().format("%Y-%m-%d %H:%M:%S%.f")),
                None => return Err(out_of_range(value)),
            },
            Value::TimestampTz(micros) => match DateTime::from_timestamp_micros(*micros) {
                Some(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S%.f+00:00")),
                None => return Err(out_of_range(value)),
            },
            Value::Uuid(bytes) => format!("'{}'", format_uuid(bytes)),
            Value::Json(json) => self.quote_string(&json.to_string()),
            Value::Array(_) => {
                return Err(Error::unsupported(
                    "collection values can only be used with IN / Contains",
                ));
            }
        };
        Ok(sql)
    }

    /// Native type name for a logical type.
    fn native_type(&self, ty: &SqlType) -> String;

    /// Logical type for a native type name.
    fn sql_type_of(&self, native: &str) -> Option<SqlType> {
        parse_native_type(native)
    }

    /// Type tag for a parameter with no column type to go by.
    fn native_type_of_value(&self, value: &Value) -> String {
        value
            .sql_type()
            .map_or_else(|| "NULL".to_string(), |ty| self.native_type(&ty))
    }

    fn recursive_keyword(&self) -> &'static str {
        "WITH RECURSIVE"
    }

    fn update_join_style(&self) -> UpdateJoinStyle {
        UpdateJoinStyle::FromClause
    }

    fn identity_return(&self, quoted_column: &str) -> IdentityReturn {
        IdentityReturn::Returning(format!("RETURNING {quoted_column}"))
    }

    /// Separator between statements sharing one command text.
    fn statement_separator(&self) -> &'static str {
        ";\n"
    }

    fn registry(&self) -> &FormatterRegistry;

    fn member_formatter(&self, owner: Owner, name: &str) -> Option<MemberFormatter> {
        self.registry().member(owner, name)
    }

    fn method_formatter(&self, owner: Owner, name: &str) -> Option<MethodEntry> {
        self.registry().method(owner, name)
    }
}

// ============================================================================
// Shared Helpers
// ============================================================================

fn out_of_range(value: &Value) -> Error {
    Error::Type(TypeError {
        expected: "value within the supported date/time range",
        actual: format!("{value:?}"),
        column: None,
        rust_type: None,
    })
}

/// `[+-]digits[.digits]`, with at least one digit on either side of the point.
fn is_decimal_text(s: &str) -> bool {
    let unsigned = s.strip_prefix(['+', '-']).unwrap_or(s);
    let (whole, frac) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    !(whole.is_empty() && frac.is_empty()) && digits(whole) && digits(frac)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

fn format_uuid(bytes: &[u8; 16]) -> String {
    let h: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &h[0..8],
        &h[8..12],
        &h[12..16],
        &h[16..20],
        &h[20..32]
    )
}

/// Shared paging for dialects using `LIMIT n OFFSET m`.
fn limit_offset(skip: Option<u64>, take: Option<u64>, unbounded: Option<&str>) -> Paging {
    let suffix = match (skip, take) {
        (None, None) => None,
        (None, Some(take)) => Some(format!("LIMIT {take}")),
        (Some(skip), Some(take)) => Some(format!("LIMIT {take} OFFSET {skip}")),
        (Some(skip), None) => Some(match unbounded {
            Some(limit) => format!("LIMIT {limit} OFFSET {skip}"),
            None => format!("OFFSET {skip}"),
        }),
    };
    Paging { top: None, suffix }
}

/// Parse a native type name from any of the supported dialects.
///
/// Unknown names come back as [`SqlType::Custom`]; only blank input yields `None`.
pub fn parse_native_type(native: &str) -> Option<SqlType> {
    let trimmed = native.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(inner) = trimmed.strip_suffix("[]") {
        return parse_native_type(inner).map(|t| SqlType::Array(Box::new(t)));
    }

    let lower = trimmed.to_ascii_lowercase();
    let (name, args) = match lower.find('(') {
        Some(open) => (
            lower[..open].trim(),
            lower[open + 1..].trim_end_matches(')').trim(),
        ),
        None => (lower.as_str(), ""),
    };
    let mut numbers = args.split(',').filter_map(|a| a.trim().parse::<u32>().ok());
    let first = numbers.next();
    let second = numbers.next();
    let is_max = args == "max";

    let ty = match name {
        "tinyint" if first == Some(1) => SqlType::Boolean,
        "tinyint" => SqlType::TinyInt,
        "smallint" | "int2" => SqlType::SmallInt,
        "int" | "integer" | "int4" | "mediumint" => SqlType::Integer,
        "bigint" | "int8" => SqlType::BigInt,
        "real" | "float4" => SqlType::Real,
        "float" | "double" | "double precision" | "float8" => SqlType::Double,
        "decimal" | "numeric" | "money" => SqlType::Decimal {
            precision: first.and_then(|p| u8::try_from(p).ok()).unwrap_or(18),
            scale: second.and_then(|s| u8::try_from(s).ok()).unwrap_or(0),
        },
        "bool" | "boolean" | "bit" => SqlType::Boolean,
        "char" | "nchar" | "character" => SqlType::Char(first.unwrap_or(1)),
        "varchar" | "nvarchar" | "character varying" if is_max => SqlType::Text,
        "varchar" | "nvarchar" | "character varying" => match first {
            Some(n) => SqlType::VarChar(n),
            None => SqlType::Text,
        },
        "text" | "ntext" | "clob" | "mediumtext" | "longtext" | "tinytext" => SqlType::Text,
        "binary" => SqlType::Binary(first.unwrap_or(1)),
        "varbinary" if is_max => SqlType::Blob,
        "varbinary" => SqlType::VarBinary(first.unwrap_or(1)),
        "blob" | "bytea" | "longblob" | "mediumblob" | "image" => SqlType::Blob,
        "date" => SqlType::Date,
        "time" => SqlType::Time,
        "datetime" | "datetime2" | "smalldatetime" => SqlType::DateTime,
        "timestamp" | "timestamp without time zone" => SqlType::Timestamp,
        "timestamptz" | "timestamp with time zone" | "datetimeoffset" => SqlType::TimestampTz,
        "uuid" | "uniqueidentifier" => SqlType::Uuid,
        "json" | "jsonb" => SqlType::Json,
        _ => SqlType::Custom(trimmed.to_string()),
    };
    Some(ty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_serde_names() {
        let d: Dialect = serde_json::from_str("\"sqlserver\"").unwrap();
        assert_eq!(d, Dialect::SqlServer);
        assert_eq!(serde_json::to_string(&Dialect::Mysql).unwrap(), "\"mysql\"");
        assert_eq!(Dialect::default(), Dialect::Postgres);
    }

    #[test]
    fn test_provider_for_matches_dialect() {
        for dialect in Dialect::ALL {
            assert_eq!(provider_for(dialect).dialect(), dialect);
        }
    }

    #[test]
    fn test_parse_native_type() {
        assert_eq!(parse_native_type("INT"), Some(SqlType::Integer));
        assert_eq!(parse_native_type("nvarchar(50)"), Some(SqlType::VarChar(50)));
        assert_eq!(parse_native_type("NVARCHAR(MAX)"), Some(SqlType::Text));
        assert_eq!(parse_native_type("tinyint(1)"), Some(SqlType::Boolean));
        assert_eq!(
            parse_native_type("numeric(10, 2)"),
            Some(SqlType::Decimal {
                precision: 10,
                scale: 2
            })
        );
        assert_eq!(
            parse_native_type("integer[]"),
            Some(SqlType::Array(Box::new(SqlType::Integer)))
        );
        assert_eq!(
            parse_native_type("geometry"),
            Some(SqlType::Custom("geometry".into()))
        );
        assert_eq!(parse_native_type("  "), None);
    }

    #[test]
    fn test_common_literals() {
        let p = PostgresDialect;
        assert_eq!(p.literal(&Value::Int(5)).unwrap(), "5");
        assert_eq!(p.literal(&Value::Double(1.5)).unwrap(), "1.5");
        assert_eq!(p.literal(&Value::Text("O'Brien".into())).unwrap(), "'O''Brien'");
        assert_eq!(p.literal(&Value::Date(0)).unwrap(), "'1970-01-01'");
        assert_eq!(
            p.literal(&Value::Timestamp(1_500_000)).unwrap(),
            "'1970-01-01 00:00:01.500'"
        );
        assert_eq!(p.literal(&Value::Time(3_600_000_000)).unwrap(), "'01:00:00'");
        assert_eq!(
            p.literal(&Value::Uuid([0xab; 16])).unwrap(),
            "'abababab-abab-abab-abab-abababababab'"
        );
        assert!(p.literal(&Value::Double(f64::NAN)).unwrap_err().is_unsupported());
        assert!(p.literal(&Value::Array(vec![])).is_err());
    }

    #[test]
    fn test_decimal_literal_is_plain_numeric() {
        let p = PostgresDialect;
        assert_eq!(p.literal(&Value::Decimal("12.50".into())).unwrap(), "12.50");
        assert_eq!(p.literal(&Value::Decimal("-0.5".into())).unwrap(), "-0.5");
        assert_eq!(p.literal(&Value::Decimal("7".into())).unwrap(), "7");
        for bad in ["NaN", "inf", "-infinity", "1e5", "", ".", "1.2.3", "12 OR 1=1"] {
            assert!(p.literal(&Value::Decimal(bad.into())).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_limit_offset() {
        assert_eq!(limit_offset(None, None, None), Paging::default());
        assert_eq!(
            limit_offset(Some(20), Some(10), None).suffix.as_deref(),
            Some("LIMIT 10 OFFSET 20")
        );
        assert_eq!(
            limit_offset(Some(5), None, Some("-1")).suffix.as_deref(),
            Some("LIMIT -1 OFFSET 5")
        );
    }
}
