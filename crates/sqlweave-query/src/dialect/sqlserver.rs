//! SQL Server dialect.

use std::sync::OnceLock;

use sqlweave_core::{Error, Result, SqlType, quote_ident_mssql};

use super::functions::{add_days_operands, date_part, function, member_function, substring};
use super::registry::FormatterRegistry;
use super::{Dialect, DialectProvider, IdentityReturn, Paging, UpdateJoinStyle, hex};
use crate::ast::Owner;
use crate::segment::SqlSegment;

/// SQL Server 2017+: `[bracketed]` identifiers, `TOP`/`OFFSET … FETCH`, `+` concatenation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerDialect;

fn build_registry() -> FormatterRegistry {
    let mut r = FormatterRegistry::with_common();
    r.register_member(Owner::String, "Length", |cx, t| {
        member_function(cx, "LEN", t, Some(SqlType::Integer))
    });
    r.register_method(Owner::String, "Substring", |cx, ops| {
        substring(cx, ops, "SUBSTRING", true)
    });
    r.register_member(Owner::DateTime, "Year", |cx, t| {
        date_part(cx, t, |x| format!("DATEPART(year, {x})"))
    });
    r.register_member(Owner::DateTime, "Month", |cx, t| {
        date_part(cx, t, |x| format!("DATEPART(month, {x})"))
    });
    r.register_member(Owner::DateTime, "Day", |cx, t| {
        date_part(cx, t, |x| format!("DATEPART(day, {x})"))
    });
    r.register_member(Owner::DateTime, "Hour", |cx, t| {
        date_part(cx, t, |x| format!("DATEPART(hour, {x})"))
    });
    r.register_member(Owner::DateTime, "Minute", |cx, t| {
        date_part(cx, t, |x| format!("DATEPART(minute, {x})"))
    });
    r.register_member(Owner::DateTime, "Second", |cx, t| {
        date_part(cx, t, |x| format!("DATEPART(second, {x})"))
    });
    r.register_method(Owner::DateTime, "AddDays", |cx, ops| {
        let (date, days, ty) = add_days_operands(cx, ops)?;
        let days = cx.render(days)?;
        Ok(SqlSegment::atom(format!("DATEADD(day, {days}, {date})")).with_type(ty))
    });
    // ROUND needs an explicit precision here
    r.register_method(Owner::Math, "Round", |cx, mut ops| {
        if ops.args.len() + usize::from(ops.target.is_some()) == 1 {
            ops.args.push(SqlSegment::atom("0".into()));
        }
        function(cx, "ROUND", ops, None)
    });
    r
}

impl DialectProvider for SqlServerDialect {
    fn dialect(&self) -> Dialect {
        Dialect::SqlServer
    }

    fn quote_identifier(&self, name: &str) -> String {
        quote_ident_mssql(name)
    }

    fn concat_operator(&self) -> Option<&'static str> {
        Some("+")
    }

    fn paging(&self, skip: Option<u64>, take: Option<u64>, ordered: bool) -> Result<Paging> {
        match (skip, take) {
            (None, None) => Ok(Paging::default()),
            (None, Some(take)) => Ok(Paging {
                top: Some(format!("TOP ({take})")),
                suffix: None,
            }),
            (Some(_), _) if !ordered => Err(Error::dialect_mismatch(
                "sqlserver requires ORDER BY for OFFSET paging",
            )),
            (Some(skip), take) => {
                let mut suffix = format!("OFFSET {skip} ROWS");
                if let Some(take) = take {
                    suffix.push_str(&format!(" FETCH NEXT {take} ROWS ONLY"));
                }
                Ok(Paging {
                    top: None,
                    suffix: Some(suffix),
                })
            }
        }
    }

    fn boolean_literal(&self, value: bool) -> &'static str {
        if value { "1" } else { "0" }
    }

    fn supports_boolean_projection(&self) -> bool {
        false
    }

    fn quote_string(&self, s: &str) -> String {
        format!("N'{}'", s.replace('\'', "''"))
    }

    fn blob_literal(&self, bytes: &[u8]) -> String {
        format!("0x{}", hex(bytes))
    }

    fn native_type(&self, ty: &SqlType) -> String {
        match ty {
            SqlType::TinyInt => "TINYINT".into(),
            SqlType::SmallInt => "SMALLINT".into(),
            SqlType::Integer => "INT".into(),
            SqlType::BigInt => "BIGINT".into(),
            SqlType::Real => "REAL".into(),
            SqlType::Double => "FLOAT".into(),
            SqlType::Decimal { precision, scale } => format!("DECIMAL({precision},{scale})"),
            SqlType::Boolean => "BIT".into(),
            SqlType::Char(n) => format!("NCHAR({n})"),
            SqlType::VarChar(n) => format!("NVARCHAR({n})"),
            SqlType::Text | SqlType::Json | SqlType::Array(_) => "NVARCHAR(MAX)".into(),
            SqlType::Binary(n) => format!("BINARY({n})"),
            SqlType::VarBinary(n) => format!("VARBINARY({n})"),
            SqlType::Blob => "VARBINARY(MAX)".into(),
            SqlType::Date => "DATE".into(),
            SqlType::Time => "TIME".into(),
            SqlType::DateTime | SqlType::Timestamp => "DATETIME2".into(),
            SqlType::TimestampTz => "DATETIMEOFFSET".into(),
            SqlType::Uuid => "UNIQUEIDENTIFIER".into(),
            SqlType::Custom(name) => name.clone(),
        }
    }

    fn recursive_keyword(&self) -> &'static str {
        "WITH"
    }

    fn update_join_style(&self) -> UpdateJoinStyle {
        UpdateJoinStyle::FromAfterSet
    }

    fn identity_return(&self, quoted_column: &str) -> IdentityReturn {
        IdentityReturn::Output(format!("OUTPUT INSERTED.{quoted_column}"))
    }

    fn registry(&self) -> &FormatterRegistry {
        static REGISTRY: OnceLock<FormatterRegistry> = OnceLock::new();
        REGISTRY.get_or_init(build_registry)
    }
}
