//! Translations shared by every dialect, and helpers the dialect modules
//! build their overrides from.

use sqlweave_core::{Error, Result, SqlType, Value};

use super::registry::FormatterRegistry;
use crate::ast::{ATOM, BinaryOp, Owner};
use crate::context::StatementContext;
use crate::segment::{CallOperands, SegmentKind, SqlSegment};

const COMPARISON: u8 = BinaryOp::Eq.precedence();
const ADDITIVE: u8 = BinaryOp::Add.precedence();

pub(super) fn register_common(r: &mut FormatterRegistry) {
    // String
    r.register_member(Owner::String, "Length", |cx, t| {
        member_function(cx, "LENGTH", t, Some(SqlType::Integer))
    });
    r.register_deferred(Owner::String, "Contains", |cx, ops| like(cx, ops, true, true));
    r.register_deferred(Owner::String, "StartsWith", |cx, ops| like(cx, ops, false, true));
    r.register_deferred(Owner::String, "EndsWith", |cx, ops| like(cx, ops, true, false));
    r.register_method(Owner::String, "Substring", |cx, ops| {
        substring(cx, ops, "SUBSTRING", false)
    });
    r.register_method(Owner::String, "ToUpper", |cx, ops| function(cx, "UPPER", ops, None));
    r.register_method(Owner::String, "ToLower", |cx, ops| function(cx, "LOWER", ops, None));
    r.register_method(Owner::String, "Trim", |cx, ops| function(cx, "TRIM", ops, None));
    r.register_method(Owner::String, "TrimStart", |cx, ops| function(cx, "LTRIM", ops, None));
    r.register_method(Owner::String, "TrimEnd", |cx, ops| function(cx, "RTRIM", ops, None));
    r.register_method(Owner::String, "Replace", |cx, ops| function(cx, "REPLACE", ops, None));
    r.register_method(Owner::String, "Concat", |cx, ops| {
        concat(cx, ops.target.into_iter().chain(ops.args).collect())
    });
    r.register_method(Owner::String, "IsNullOrEmpty", is_null_or_empty);

    // DateTime
    r.register_member(Owner::DateTime, "Now", |_, _| {
        Ok(SqlSegment::atom("CURRENT_TIMESTAMP".into()).with_type(Some(SqlType::Timestamp)))
    });
    r.register_member(Owner::DateTime, "Date", |cx, t| {
        let sql = cx.render(receiver(t, "Date")?)?;
        Ok(SqlSegment::atom(cx.provider().cast(&sql, &SqlType::Date)).with_type(Some(SqlType::Date)))
    });

    // Convert
    r.register_method(Owner::Convert, "ToString", |cx, ops| {
        let sql = cx.render(subject(ops, "ToString")?)?;
        Ok(SqlSegment::atom(cx.provider().cast(&sql, &SqlType::Text)).with_type(Some(SqlType::Text)))
    });

    // Math
    r.register_method(Owner::Math, "Abs", |cx, ops| function(cx, "ABS", ops, None));
    r.register_method(Owner::Math, "Floor", |cx, ops| function(cx, "FLOOR", ops, None));
    r.register_method(Owner::Math, "Ceiling", |cx, ops| function(cx, "CEILING", ops, None));
    r.register_method(Owner::Math, "Round", |cx, ops| function(cx, "ROUND", ops, None));

    // Aggregates
    r.register_method(Owner::Sql, "Count", |cx, ops| aggregate(cx, "COUNT", ops, false));
    r.register_method(Owner::Sql, "CountDistinct", |cx, ops| aggregate(cx, "COUNT", ops, true));
    r.register_method(Owner::Sql, "Sum", |cx, ops| aggregate(cx, "SUM", ops, false));
    r.register_method(Owner::Sql, "Avg", |cx, ops| aggregate(cx, "AVG", ops, false));
    r.register_method(Owner::Sql, "Min", |cx, ops| aggregate(cx, "MIN", ops, false));
    r.register_method(Owner::Sql, "Max", |cx, ops| aggregate(cx, "MAX", ops, false));

    // Predicates
    r.register_deferred(Owner::Sql, "Exists", exists);
    r.register_deferred(Owner::Sql, "In", |cx, ops| {
        let CallOperands { target, args, negated } = ops;
        let target = receiver(target, "In")?;
        let list = args
            .into_iter()
            .next()
            .ok_or_else(|| Error::unsupported("In requires a collection or sub-query"))?;
        in_values(cx, target, list, negated)
    });
    r.register_deferred(Owner::Sql, "Like", |cx, ops| like_operator(cx, ops, "LIKE"));
}

// ============================================================================
// Operand Helpers
// ============================================================================

pub(super) fn receiver(target: Option<SqlSegment>, what: &str) -> Result<SqlSegment> {
    target.ok_or_else(|| Error::unsupported(format!("{what} requires a receiver")))
}

/// Receiver if present, else the first argument (`Math.Abs(x)` vs `x.ToString()`).
pub(super) fn subject(ops: CallOperands, what: &str) -> Result<SqlSegment> {
    ops.target
        .or_else(|| ops.args.into_iter().next())
        .ok_or_else(|| Error::unsupported(format!("{what} requires an operand")))
}

/// `NAME(receiver, args…)`
pub(super) fn function(
    cx: &mut StatementContext<'_>,
    name: &str,
    ops: CallOperands,
    ty: Option<SqlType>,
) -> Result<SqlSegment> {
    let operands: Vec<SqlSegment> = ops.target.into_iter().chain(ops.args).collect();
    let ty = ty.or_else(|| operands.first().and_then(|o| o.ty.clone()));
    let is_aggregate = operands.iter().any(|o| o.is_aggregate);
    let mut rendered = Vec::with_capacity(operands.len());
    for operand in operands {
        rendered.push(cx.render(operand)?);
    }
    Ok(SqlSegment::atom(format!("{name}({})", rendered.join(", ")))
        .with_type(ty)
        .with_aggregate(is_aggregate))
}

/// `NAME(receiver)` for property-style members.
pub(super) fn member_function(
    cx: &mut StatementContext<'_>,
    name: &str,
    target: Option<SqlSegment>,
    ty: Option<SqlType>,
) -> Result<SqlSegment> {
    let target = receiver(target, name)?;
    let is_aggregate = target.is_aggregate;
    let sql = cx.render(target)?;
    Ok(SqlSegment::atom(format!("{name}({sql})"))
        .with_type(ty)
        .with_aggregate(is_aggregate))
}

/// Integer-valued date part; `render` wraps the receiver's SQL.
pub(super) fn date_part(
    cx: &mut StatementContext<'_>,
    target: Option<SqlSegment>,
    render: impl FnOnce(&str) -> String,
) -> Result<SqlSegment> {
    let target = receiver(target, "date part")?;
    let is_aggregate = target.is_aggregate;
    let sql = cx.render(target)?;
    Ok(SqlSegment::atom(render(&sql))
        .with_type(Some(SqlType::Integer))
        .with_aggregate(is_aggregate))
}

/// Receiver and day count of `AddDays`, rendered.
pub(super) fn add_days_operands(
    cx: &mut StatementContext<'_>,
    ops: CallOperands,
) -> Result<(String, SqlSegment, Option<SqlType>)> {
    let CallOperands { target, args, .. } = ops;
    let target = receiver(target, "AddDays")?;
    let ty = target.ty.clone();
    let date = cx.render_operand(target, ADDITIVE, false)?;
    let days = args
        .into_iter()
        .next()
        .ok_or_else(|| Error::unsupported("AddDays requires a day count"))?;
    Ok((date, days, ty))
}

// ============================================================================
// Strings
// ============================================================================

fn percent() -> SqlSegment {
    SqlSegment::atom("'%'".to_string()).with_type(Some(SqlType::Text))
}

/// Concatenate text operands with the dialect's operator or `CONCAT(…)`.
pub(crate) fn concat(cx: &mut StatementContext<'_>, parts: Vec<SqlSegment>) -> Result<SqlSegment> {
    let is_aggregate = parts.iter().any(|p| p.is_aggregate);
    let mut rendered = Vec::with_capacity(parts.len());
    let segment = match cx.provider().concat_operator() {
        Some(op) => {
            for (i, part) in parts.into_iter().enumerate() {
                rendered.push(cx.render_operand(part, ADDITIVE, i > 0)?);
            }
            SqlSegment::expression(rendered.join(&format!(" {op} ")), ADDITIVE)
        }
        None => {
            for part in parts {
                rendered.push(cx.render(part)?);
            }
            SqlSegment::atom(format!("CONCAT({})", rendered.join(", ")))
        }
    };
    Ok(segment
        .with_type(Some(SqlType::Text))
        .with_aggregate(is_aggregate))
}

/// `Contains` / `StartsWith` / `EndsWith` as LIKE with leading/trailing wildcards.
///
/// `%` and `_` inside the pattern value are not escaped, so they still act as
/// wildcards: `StartsWith("50%")` matches `"500"`.
fn like(cx: &mut StatementContext<'_>, ops: CallOperands, lead: bool, trail: bool) -> Result<SqlSegment> {
    let CallOperands { target, args, negated } = ops;
    let target = receiver(target, "LIKE")?;
    let pattern = args
        .into_iter()
        .next()
        .ok_or_else(|| Error::unsupported("LIKE requires a pattern"))?;

    // list.Contains(x) is membership, not a substring test
    if lead && trail && matches!(target.value, Some(Value::Array(_))) {
        return in_values(cx, pattern, target, negated);
    }

    let hints = target.clone();
    let target_sql = cx.render_operand(target, COMPARISON, true)?;
    let pattern_sql = if let Some(Value::Text(text)) = &pattern.value {
        let wrapped = format!(
            "{}{}{}",
            if lead { "%" } else { "" },
            text,
            if trail { "%" } else { "" }
        );
        let mut seg = SqlSegment::constant(Value::Text(wrapped));
        seg.adopt_hints(&hints);
        cx.render(seg)?
    } else {
        let mut pattern = pattern;
        pattern.adopt_hints(&hints);
        let mut parts = Vec::with_capacity(3);
        if lead {
            parts.push(percent());
        }
        parts.push(pattern);
        if trail {
            parts.push(percent());
        }
        let joined = concat(cx, parts)?;
        cx.render(joined)?
    };
    let keyword = if negated { "NOT LIKE" } else { "LIKE" };
    Ok(SqlSegment::comparison(format!("{target_sql} {keyword} {pattern_sql}")))
}

/// `x LIKE p` / `x ILIKE p` with a caller-supplied pattern.
pub(super) fn like_operator(
    cx: &mut StatementContext<'_>,
    ops: CallOperands,
    keyword: &str,
) -> Result<SqlSegment> {
    let CallOperands { target, args, negated } = ops;
    let target = receiver(target, keyword)?;
    let mut pattern = args
        .into_iter()
        .next()
        .ok_or_else(|| Error::unsupported(format!("{keyword} requires a pattern")))?;
    pattern.adopt_hints(&target);
    let target_sql = cx.render_operand(target, COMPARISON, true)?;
    let pattern_sql = cx.render_operand(pattern, COMPARISON, true)?;
    let not = if negated { "NOT " } else { "" };
    Ok(SqlSegment::comparison(format!("{target_sql} {not}{keyword} {pattern_sql}")))
}

/// Zero-based `Substring(start[, length])` over the dialect's one-based function.
pub(super) fn substring(
    cx: &mut StatementContext<'_>,
    ops: CallOperands,
    name: &str,
    require_length: bool,
) -> Result<SqlSegment> {
    let CallOperands { target, args, .. } = ops;
    let target = receiver(target, "Substring")?;
    let ty = target.ty.clone();
    let mut args = args.into_iter();
    let start = args
        .next()
        .ok_or_else(|| Error::unsupported("Substring requires a start index"))?;
    let length = args.next();

    let text = cx.render(target)?;
    let constant_start = match &start.value {
        Some(v) if v.is_integer() => v.as_i64().and_then(|n| n.checked_add(1)),
        _ => None,
    };
    let start_sql = match constant_start {
        Some(one_based) => cx.render(SqlSegment::constant(Value::BigInt(one_based)))?,
        None => format!("{} + 1", cx.render_operand(start, ADDITIVE, false)?),
    };
    let sql = match length {
        Some(length) => format!("{name}({text}, {start_sql}, {})", cx.render(length)?),
        None if require_length => format!("{name}({text}, {start_sql}, LEN({text}))"),
        None => format!("{name}({text}, {start_sql})"),
    };
    Ok(SqlSegment::atom(sql).with_type(ty))
}

fn is_null_or_empty(cx: &mut StatementContext<'_>, ops: CallOperands) -> Result<SqlSegment> {
    let value = subject(ops, "IsNullOrEmpty")?;
    let sql = cx.render_operand(value, COMPARISON, true)?;
    Ok(SqlSegment::predicate(
        format!("{sql} IS NULL OR {sql} = ''"),
        BinaryOp::Or.precedence(),
    ))
}

// ============================================================================
// Aggregates & Predicates
// ============================================================================

fn aggregate(cx: &mut StatementContext<'_>, name: &str, ops: CallOperands, distinct: bool) -> Result<SqlSegment> {
    let CallOperands { target, args, .. } = ops;
    let Some(operand) = target.or_else(|| args.into_iter().next()) else {
        if name == "COUNT" {
            return Ok(SqlSegment::aggregate("COUNT(*)".into(), Some(SqlType::BigInt)));
        }
        return Err(Error::unsupported(format!("{name} requires an argument")));
    };
    if operand.is_aggregate {
        return Err(Error::unsupported(format!("{name} over an aggregate is not allowed")));
    }
    let ty = match name {
        "COUNT" => Some(SqlType::BigInt),
        "AVG" => Some(SqlType::Double),
        _ => operand.ty.clone(),
    };
    let sql = cx.render(operand)?;
    let distinct = if distinct { "DISTINCT " } else { "" };
    Ok(SqlSegment::aggregate(format!("{name}({distinct}{sql})"), ty))
}

fn exists(cx: &mut StatementContext<'_>, ops: CallOperands) -> Result<SqlSegment> {
    let negated = ops.negated;
    let sub = subject(ops, "Exists")?;
    if sub.kind != SegmentKind::SubQuery {
        return Err(Error::unsupported("Exists requires a sub-query"));
    }
    let sql = cx.render(sub)?;
    let keyword = if negated { "NOT EXISTS" } else { "EXISTS" };
    Ok(SqlSegment::predicate(format!("{keyword} {sql}"), ATOM))
}

/// `x IN (…)` over a collection constant, a sub-query or a single expression.
pub(crate) fn in_values(
    cx: &mut StatementContext<'_>,
    target: SqlSegment,
    list: SqlSegment,
    negated: bool,
) -> Result<SqlSegment> {
    let keyword = if negated { "NOT IN" } else { "IN" };
    let kind = list.kind;
    let items = match (kind, list.value.clone()) {
        (SegmentKind::SubQuery, _) => {
            let target_sql = cx.render_operand(target, COMPARISON, true)?;
            let sub = cx.render(list)?;
            return Ok(SqlSegment::comparison(format!("{target_sql} {keyword} {sub}")));
        }
        (_, Some(Value::Array(items))) => items,
        (_, Some(single)) => vec![single],
        (_, None) => {
            let target_sql = cx.render_operand(target, COMPARISON, true)?;
            let item = cx.render(list)?;
            return Ok(SqlSegment::comparison(format!("{target_sql} {keyword} ({item})")));
        }
    };
    if items.is_empty() {
        let sql = if negated { "1 = 1" } else { "1 = 0" };
        return Ok(SqlSegment::comparison(sql.to_string()));
    }

    let hint = target.member.clone().unwrap_or_else(|| "p".to_string());
    let ty = if target.kind == SegmentKind::Column {
        target.ty.clone()
    } else {
        None
    };
    let target_sql = cx.render_operand(target, COMPARISON, true)?;
    let mut markers = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        let item_ty = if matches!(item, Value::Null) { None } else { ty.clone() };
        markers.push(cx.render_value(Some(&format!("{hint}{i}")), item, item_ty.as_ref())?);
    }
    Ok(SqlSegment::comparison(format!(
        "{target_sql} {keyword} ({})",
        markers.join(", ")
    )))
}
