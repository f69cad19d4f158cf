//! PostgreSQL dialect.

use std::sync::OnceLock;

use sqlweave_core::{Result, SqlType, quote_ident};

use super::functions::{add_days_operands, date_part, like_operator};
use super::registry::FormatterRegistry;
use super::{Dialect, DialectProvider, Paging, hex, limit_offset};
use crate::ast::{BinaryOp, Owner};
use crate::segment::SqlSegment;

/// PostgreSQL: `"quoted"` identifiers, `@name` parameters, `LIMIT/OFFSET`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

fn build_registry() -> FormatterRegistry {
    let mut r = FormatterRegistry::with_common();
    r.register_member(Owner::DateTime, "Year", |cx, t| {
        date_part(cx, t, |x| format!("EXTRACT(YEAR FROM {x})"))
    });
    r.register_member(Owner::DateTime, "Month", |cx, t| {
        date_part(cx, t, |x| format!("EXTRACT(MONTH FROM {x})"))
    });
    r.register_member(Owner::DateTime, "Day", |cx, t| {
        date_part(cx, t, |x| format!("EXTRACT(DAY FROM {x})"))
    });
    r.register_member(Owner::DateTime, "Hour", |cx, t| {
        date_part(cx, t, |x| format!("EXTRACT(HOUR FROM {x})"))
    });
    r.register_member(Owner::DateTime, "Minute", |cx, t| {
        date_part(cx, t, |x| format!("EXTRACT(MINUTE FROM {x})"))
    });
    r.register_member(Owner::DateTime, "Second", |cx, t| {
        date_part(cx, t, |x| format!("EXTRACT(SECOND FROM {x})"))
    });
    r.register_method(Owner::DateTime, "AddDays", |cx, ops| {
        let (date, days, ty) = add_days_operands(cx, ops)?;
        let days = cx.render_operand(days, BinaryOp::Mul.precedence(), false)?;
        Ok(SqlSegment::expression(
            format!("{date} + {days} * INTERVAL '1 day'"),
            BinaryOp::Add.precedence(),
        )
        .with_type(ty))
    });
    r.register_deferred(Owner::Sql, "ILike", |cx, ops| like_operator(cx, ops, "ILIKE"));
    r
}

impl DialectProvider for PostgresDialect {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn quote_identifier(&self, name: &str) -> String {
        quote_ident(name)
    }

    fn binary_operator(&self, op: BinaryOp) -> Result<&'static str> {
        match op {
            BinaryOp::BitXor => Ok("#"),
            BinaryOp::Coalesce => Err(sqlweave_core::Error::unsupported(
                "COALESCE is rendered as a function",
            )),
            other => Ok(other.as_str()),
        }
    }

    fn paging(&self, skip: Option<u64>, take: Option<u64>, _ordered: bool) -> Result<Paging> {
        Ok(limit_offset(skip, take, None))
    }

    fn blob_literal(&self, bytes: &[u8]) -> String {
        format!("'\\x{}'::bytea", hex(bytes))
    }

    fn native_type(&self, ty: &SqlType) -> String {
        match ty {
            SqlType::TinyInt | SqlType::SmallInt => "smallint".into(),
            SqlType::Integer => "integer".into(),
            SqlType::BigInt => "bigint".into(),
            SqlType::Real => "real".into(),
            SqlType::Double => "double precision".into(),
            SqlType::Decimal { precision, scale } => format!("numeric({precision},{scale})"),
            SqlType::Boolean => "boolean".into(),
            SqlType::Char(n) => format!("char({n})"),
            SqlType::VarChar(n) => format!("varchar({n})"),
            SqlType::Text => "text".into(),
            SqlType::Binary(_) | SqlType::VarBinary(_) | SqlType::Blob => "bytea".into(),
            SqlType::Date => "date".into(),
            SqlType::Time => "time".into(),
            SqlType::DateTime | SqlType::Timestamp => "timestamp".into(),
            SqlType::TimestampTz => "timestamptz".into(),
            SqlType::Uuid => "uuid".into(),
            SqlType::Json => "jsonb".into(),
            SqlType::Array(inner) => format!("{}[]", self.native_type(inner)),
            SqlType::Custom(name) => name.clone(),
        }
    }

    fn registry(&self) -> &FormatterRegistry {
        static REGISTRY: OnceLock<FormatterRegistry> = OnceLock::new();
        REGISTRY.get_or_init(build_registry)
    }
}
