//! Constant folding.
//!
//! Nodes whose operands are all captured values are evaluated in-process
//! and emitted as a single constant. Anything that cannot be evaluated
//! exactly (NULL semantics, overflow, division by zero, mixed types) is left
//! to the database.

use std::cmp::Ordering;

use chrono::{Datelike, Timelike};
use sqlweave_core::Value;

use crate::ast::{BinaryOp, Owner, UnaryOp};

pub(crate) fn fold_binary(op: BinaryOp, left: &Value, right: &Value) -> Option<Value> {
    if op == BinaryOp::Coalesce {
        return Some(if matches!(left, Value::Null) {
            right.clone()
        } else {
            left.clone()
        });
    }
    if matches!(left, Value::Null) || matches!(right, Value::Null) {
        return None;
    }

    match op {
        BinaryOp::And => Some(Value::Bool(left.as_bool_strict()? && right.as_bool_strict()?)),
        BinaryOp::Or => Some(Value::Bool(left.as_bool_strict()? || right.as_bool_strict()?)),
        BinaryOp::Eq
        | BinaryOp::Ne
        | BinaryOp::Lt
        | BinaryOp::Le
        | BinaryOp::Gt
        | BinaryOp::Ge => {
            let ordering = compare(left, right)?;
            let result = match op {
                BinaryOp::Eq => ordering == Ordering::Equal,
                BinaryOp::Ne => ordering != Ordering::Equal,
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            Some(Value::Bool(result))
        }
        BinaryOp::Add => match (left, right) {
            (Value::Text(a), Value::Text(b)) => Some(Value::Text(format!("{a}{b}"))),
            _ => arithmetic(op, left, right),
        },
        _ => arithmetic(op, left, right),
    }
}

pub(crate) fn fold_unary(op: UnaryOp, value: &Value) -> Option<Value> {
    match (op, value) {
        (UnaryOp::Not, Value::Bool(b)) => Some(Value::Bool(!b)),
        (UnaryOp::Neg, Value::Float(f)) => Some(Value::Float(-f)),
        (UnaryOp::Neg, Value::Double(f)) => Some(Value::Double(-f)),
        (UnaryOp::Neg, v) if v.is_integer() => v.as_i64()?.checked_neg().map(narrow(v)),
        (UnaryOp::BitNot, v) if v.is_integer() => Some(narrow(v)(!v.as_i64()?)),
        _ => None,
    }
}

/// Property access on a constant, e.g. `"abc".Length`.
pub(crate) fn fold_property(owner: Owner, name: &str, target: Option<&Value>) -> Option<Value> {
    let target = target?;
    match (owner, name) {
        (Owner::String, "Length") => {
            let len = target.as_str()?.chars().count();
            Some(Value::Int(i32::try_from(len).ok()?))
        }
        (Owner::DateTime, "Date") => target.as_date().map(Value::from),
        (Owner::DateTime, part) => {
            let dt = target.as_datetime()?;
            let n = match part {
                "Year" => dt.year(),
                "Month" => i32::try_from(dt.month()).ok()?,
                "Day" => i32::try_from(dt.day()).ok()?,
                "Hour" => i32::try_from(dt.hour()).ok()?,
                "Minute" => i32::try_from(dt.minute()).ok()?,
                "Second" => i32::try_from(dt.second()).ok()?,
                _ => return None,
            };
            Some(Value::Int(n))
        }
        _ => None,
    }
}

/// Method call with constant receiver and arguments.
pub(crate) fn fold_call(owner: Owner, name: &str, target: Option<&Value>, args: &[Value]) -> Option<Value> {
    match owner {
        Owner::String => fold_string(name, target, args),
        Owner::Math => {
            let x = target.or_else(|| args.first())?;
            fold_math(name, x, args.get(1))
        }
        Owner::Convert if name == "ToString" => {
            let x = target.or_else(|| args.first())?;
            match x {
                Value::Float(f) => Some(Value::Text(f.to_string())),
                Value::Double(f) => Some(Value::Text(f.to_string())),
                other => other.to_plain_text().ok().map(Value::Text),
            }
        }
        _ => None,
    }
}

fn fold_string(name: &str, target: Option<&Value>, args: &[Value]) -> Option<Value> {
    if name == "Concat" {
        let mut out = String::new();
        for part in target.into_iter().chain(args) {
            out.push_str(part.as_str()?);
        }
        return Some(Value::Text(out));
    }
    if name == "IsNullOrEmpty" {
        let x = target.or_else(|| args.first())?;
        return match x {
            Value::Null => Some(Value::Bool(true)),
            Value::Text(s) => Some(Value::Bool(s.is_empty())),
            _ => None,
        };
    }

    let s = target?.as_str()?;
    let text = |i: usize| args.get(i).and_then(Value::as_str);
    let folded = match name {
        "ToUpper" => Value::Text(s.to_uppercase()),
        "ToLower" => Value::Text(s.to_lowercase()),
        "Trim" => Value::Text(s.trim().to_string()),
        "TrimStart" => Value::Text(s.trim_start().to_string()),
        "TrimEnd" => Value::Text(s.trim_end().to_string()),
        "Replace" => Value::Text(s.replace(text(0)?, text(1)?)),
        "Contains" => Value::Bool(s.contains(text(0)?)),
        "StartsWith" => Value::Bool(s.starts_with(text(0)?)),
        "EndsWith" => Value::Bool(s.ends_with(text(0)?)),
        "Substring" => {
            let start = usize::try_from(args.first()?.as_i64()?).ok()?;
            let chars = s.chars().skip(start);
            match args.get(1) {
                Some(len) => Value::Text(chars.take(usize::try_from(len.as_i64()?).ok()?).collect()),
                None => Value::Text(chars.collect()),
            }
        }
        _ => return None,
    };
    Some(folded)
}

fn fold_math(name: &str, x: &Value, digits: Option<&Value>) -> Option<Value> {
    if x.is_integer() {
        let n = x.as_i64()?;
        return match name {
            "Abs" => n.checked_abs().map(narrow(x)),
            "Floor" | "Ceiling" | "Round" => Some(x.clone()),
            _ => None,
        };
    }
    let f = match x {
        Value::Float(f) => f64::from(*f),
        Value::Double(f) => *f,
        _ => return None,
    };
    let result = match name {
        "Abs" => f.abs(),
        "Floor" => f.floor(),
        "Ceiling" => f.ceil(),
        "Round" => {
            let digits = digits.map_or(Some(0), Value::as_i64)?;
            let scale = 10f64.powi(i32::try_from(digits).ok()?);
            (f * scale).round() / scale
        }
        _ => return None,
    };
    Some(Value::Double(result))
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (a, b) if a.is_integer() && b.is_integer() => Some(a.as_i64()?.cmp(&b.as_i64()?)),
        (a, b) if is_number(a) && is_number(b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        _ => None,
    }
}

fn is_number(v: &Value) -> bool {
    v.is_integer() || matches!(v, Value::Float(_) | Value::Double(_))
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Option<Value> {
    if left.is_integer() && right.is_integer() {
        let (a, b) = (left.as_i64()?, right.as_i64()?);
        let n = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div => a.checked_div(b),
            BinaryOp::Mod => a.checked_rem(b),
            BinaryOp::BitAnd => Some(a & b),
            BinaryOp::BitOr => Some(a | b),
            BinaryOp::BitXor => Some(a ^ b),
            _ => None,
        }?;
        // keep 32-bit results 32-bit when both operands were
        return Some(match (left, right) {
            (Value::Int(_), Value::Int(_)) => i32::try_from(n).map_or(Value::BigInt(n), Value::Int),
            _ => Value::BigInt(n),
        });
    }
    if !is_number(left) || !is_number(right) {
        return None;
    }
    let (a, b) = (left.as_f64()?, right.as_f64()?);
    let f = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div if b != 0.0 => a / b,
        _ => return None,
    };
    Some(Value::Double(f))
}

/// Rebuild an integer result in the width of the original value where it fits.
fn narrow(original: &Value) -> impl Fn(i64) -> Value + '_ {
    move |n| match original {
        Value::Int(_) => i32::try_from(n).map_or(Value::BigInt(n), Value::Int),
        _ => Value::BigInt(n),
    }
}

trait StrictBool {
    fn as_bool_strict(&self) -> Option<bool>;
}

impl StrictBool for Value {
    fn as_bool_strict(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}
