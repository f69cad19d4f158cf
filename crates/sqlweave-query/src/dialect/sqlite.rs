//! SQLite dialect.

use std::sync::OnceLock;

use sqlweave_core::{Error, Result, SqlType, quote_ident};

use super::functions::{add_days_operands, date_part, member_function, substring};
use super::registry::FormatterRegistry;
use super::{Dialect, DialectProvider, Paging, limit_offset};
use crate::ast::{BinaryOp, Owner};
use crate::segment::SqlSegment;

/// SQLite 3.35+: `:name` parameters, `LIMIT -1 OFFSET m`, type affinities.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

fn build_registry() -> FormatterRegistry {
    let mut r = FormatterRegistry::with_common();
    // Math functions are a compile-time option in SQLite builds
    r.remove_method(Owner::Math, "Floor");
    r.remove_method(Owner::Math, "Ceiling");

    r.register_method(Owner::String, "Substring", |cx, ops| substring(cx, ops, "SUBSTR", false));
    r.register_member(Owner::DateTime, "Year", |cx, t| {
        date_part(cx, t, |x| format!("CAST(strftime('%Y', {x}) AS INTEGER)"))
    });
    r.register_member(Owner::DateTime, "Month", |cx, t| {
        date_part(cx, t, |x| format!("CAST(strftime('%m', {x}) AS INTEGER)"))
    });
    r.register_member(Owner::DateTime, "Day", |cx, t| {
        date_part(cx, t, |x| format!("CAST(strftime('%d', {x}) AS INTEGER)"))
    });
    r.register_member(Owner::DateTime, "Hour", |cx, t| {
        date_part(cx, t, |x| format!("CAST(strftime('%H', {x}) AS INTEGER)"))
    });
    r.register_member(Owner::DateTime, "Minute", |cx, t| {
        date_part(cx, t, |x| format!("CAST(strftime('%M', {x}) AS INTEGER)"))
    });
    r.register_member(Owner::DateTime, "Second", |cx, t| {
        date_part(cx, t, |x| format!("CAST(strftime('%S', {x}) AS INTEGER)"))
    });
    r.register_member(Owner::DateTime, "Date", |cx, t| {
        member_function(cx, "date", t, Some(SqlType::Date))
    });
    r.register_method(Owner::DateTime, "AddDays", |cx, ops| {
        let (date, days, ty) = add_days_operands(cx, ops)?;
        let days = cx.render(days)?;
        Ok(SqlSegment::atom(format!("datetime({date}, printf('%+d days', {days}))")).with_type(ty))
    });
    r
}

impl DialectProvider for SqliteDialect {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn quote_identifier(&self, name: &str) -> String {
        quote_ident(name)
    }

    fn parameter_prefix(&self) -> &'static str {
        ":"
    }

    fn binary_operator(&self, op: BinaryOp) -> Result<&'static str> {
        match op {
            BinaryOp::BitXor => Err(Error::dialect_mismatch(
                "sqlite has no bitwise XOR operator; supported on postgres, mysql, sqlserver",
            )),
            BinaryOp::Coalesce => Err(Error::unsupported("COALESCE is rendered as a function")),
            other => Ok(other.as_str()),
        }
    }

    fn paging(&self, skip: Option<u64>, take: Option<u64>, _ordered: bool) -> Result<Paging> {
        Ok(limit_offset(skip, take, Some("-1")))
    }

    fn boolean_literal(&self, value: bool) -> &'static str {
        if value { "1" } else { "0" }
    }

    fn native_type(&self, ty: &SqlType) -> String {
        match ty {
            SqlType::TinyInt
            | SqlType::SmallInt
            | SqlType::Integer
            | SqlType::BigInt
            | SqlType::Boolean => "INTEGER".into(),
            SqlType::Real | SqlType::Double => "REAL".into(),
            SqlType::Decimal { .. } => "NUMERIC".into(),
            SqlType::Binary(_) | SqlType::VarBinary(_) | SqlType::Blob => "BLOB".into(),
            SqlType::Custom(name) => name.clone(),
            _ => "TEXT".into(),
        }
    }

    fn registry(&self) -> &FormatterRegistry {
        static REGISTRY: OnceLock<FormatterRegistry> = OnceLock::new();
        REGISTRY.get_or_init(build_registry)
    }
}
