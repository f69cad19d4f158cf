//! MySQL dialect.

use std::sync::OnceLock;

use sqlweave_core::{Result, SqlType, quote_ident_mysql};

use super::functions::{add_days_operands, date_part, member_function};
use super::registry::FormatterRegistry;
use super::{Dialect, DialectProvider, IdentityReturn, Paging, UpdateJoinStyle};
use crate::ast::Owner;
use crate::segment::SqlSegment;

/// Largest row count MySQL accepts; `LIMIT offset, count` has no "all rows" form.
const MAX_ROWS: &str = "18446744073709551615";

/// MySQL 8: backtick identifiers, `CONCAT(…)`, `LIMIT offset, count`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

fn build_registry() -> FormatterRegistry {
    let mut r = FormatterRegistry::with_common();
    r.register_member(Owner::String, "Length", |cx, t| {
        member_function(cx, "CHAR_LENGTH", t, Some(SqlType::Integer))
    });
    r.register_member(Owner::DateTime, "Year", |cx, t| date_part(cx, t, |x| format!("YEAR({x})")));
    r.register_member(Owner::DateTime, "Month", |cx, t| date_part(cx, t, |x| format!("MONTH({x})")));
    r.register_member(Owner::DateTime, "Day", |cx, t| date_part(cx, t, |x| format!("DAY({x})")));
    r.register_member(Owner::DateTime, "Hour", |cx, t| date_part(cx, t, |x| format!("HOUR({x})")));
    r.register_member(Owner::DateTime, "Minute", |cx, t| {
        date_part(cx, t, |x| format!("MINUTE({x})"))
    });
    r.register_member(Owner::DateTime, "Second", |cx, t| {
        date_part(cx, t, |x| format!("SECOND({x})"))
    });
    r.register_member(Owner::DateTime, "Date", |cx, t| {
        member_function(cx, "DATE", t, Some(SqlType::Date))
    });
    r.register_method(Owner::DateTime, "AddDays", |cx, ops| {
        let (date, days, ty) = add_days_operands(cx, ops)?;
        let days = cx.render(days)?;
        Ok(SqlSegment::atom(format!("DATE_ADD({date}, INTERVAL {days} DAY)")).with_type(ty))
    });
    r
}

impl DialectProvider for MySqlDialect {
    fn dialect(&self) -> Dialect {
        Dialect::Mysql
    }

    fn quote_identifier(&self, name: &str) -> String {
        quote_ident_mysql(name)
    }

    fn concat_operator(&self) -> Option<&'static str> {
        None
    }

    fn paging(&self, skip: Option<u64>, take: Option<u64>, _ordered: bool) -> Result<Paging> {
        let suffix = match (skip, take) {
            (None, None) => None,
            (None, Some(take)) => Some(format!("LIMIT {take}")),
            (Some(skip), Some(take)) => Some(format!("LIMIT {skip}, {take}")),
            (Some(skip), None) => Some(format!("LIMIT {skip}, {MAX_ROWS}")),
        };
        Ok(Paging { top: None, suffix })
    }

    fn cast_type(&self, ty: &SqlType) -> String {
        match ty {
            SqlType::TinyInt | SqlType::SmallInt | SqlType::Integer | SqlType::BigInt => {
                "SIGNED".into()
            }
            SqlType::Boolean => "UNSIGNED".into(),
            SqlType::Real | SqlType::Double => "DOUBLE".into(),
            SqlType::Char(_) | SqlType::VarChar(_) | SqlType::Text | SqlType::Uuid => "CHAR".into(),
            SqlType::Binary(_) | SqlType::VarBinary(_) | SqlType::Blob => "BINARY".into(),
            SqlType::DateTime | SqlType::Timestamp | SqlType::TimestampTz => "DATETIME".into(),
            other => self.native_type(other),
        }
    }

    fn quote_string(&self, s: &str) -> String {
        format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''"))
    }

    fn native_type(&self, ty: &SqlType) -> String {
        match ty {
            SqlType::TinyInt => "TINYINT".into(),
            SqlType::SmallInt => "SMALLINT".into(),
            SqlType::Integer => "INT".into(),
            SqlType::BigInt => "BIGINT".into(),
            SqlType::Real => "FLOAT".into(),
            SqlType::Double => "DOUBLE".into(),
            SqlType::Decimal { precision, scale } => format!("DECIMAL({precision},{scale})"),
            SqlType::Boolean => "TINYINT(1)".into(),
            SqlType::Char(n) => format!("CHAR({n})"),
            SqlType::VarChar(n) => format!("VARCHAR({n})"),
            SqlType::Text => "TEXT".into(),
            SqlType::Binary(n) => format!("BINARY({n})"),
            SqlType::VarBinary(n) => format!("VARBINARY({n})"),
            SqlType::Blob => "BLOB".into(),
            SqlType::Date => "DATE".into(),
            SqlType::Time => "TIME".into(),
            SqlType::DateTime => "DATETIME".into(),
            SqlType::Timestamp | SqlType::TimestampTz => "TIMESTAMP".into(),
            SqlType::Uuid => "CHAR(36)".into(),
            SqlType::Json | SqlType::Array(_) => "JSON".into(),
            SqlType::Custom(name) => name.clone(),
        }
    }

    fn update_join_style(&self) -> UpdateJoinStyle {
        UpdateJoinStyle::JoinBeforeSet
    }

    fn identity_return(&self, _quoted_column: &str) -> IdentityReturn {
        IdentityReturn::Trailing("SELECT LAST_INSERT_ID()".into())
    }

    fn registry(&self) -> &FormatterRegistry {
        static REGISTRY: OnceLock<FormatterRegistry> = OnceLock::new();
        REGISTRY.get_or_init(build_registry)
    }
}
