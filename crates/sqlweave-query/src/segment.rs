//! Intermediate SQL fragments produced while visiting one expression node.

use sqlweave_core::{SqlType, Value};

use crate::ast::{ATOM, BinaryOp};
use crate::dialect::MethodFormatter;

/// What a fragment is, as far as the parent node cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// `alias.column`
    Column,
    /// Captured value not yet materialized as a marker or literal
    Constant,
    /// Any value-producing fragment
    Expression,
    /// Boolean-valued fragment usable directly in WHERE/ON/HAVING
    Predicate,
    /// Parenthesized SELECT
    SubQuery,
    /// Caller-supplied SQL
    Raw,
}

/// Operands handed to a method formatter once they have been visited.
#[derive(Debug, Clone)]
pub struct CallOperands {
    pub target: Option<SqlSegment>,
    pub args: Vec<SqlSegment>,
    /// Set when the call sits directly under `NOT`
    pub negated: bool,
}

impl CallOperands {
    pub fn arg(&self, index: usize) -> Option<&SqlSegment> {
        self.args.get(index)
    }
}

/// A predicate-shaped call whose final text depends on the parent node.
#[derive(Debug, Clone)]
pub struct PendingCall {
    pub name: String,
    pub formatter: MethodFormatter,
    pub operands: CallOperands,
}

/// SQL fragment plus the metadata the visitor needs to combine it.
#[derive(Debug, Clone)]
pub struct SqlSegment {
    pub sql: String,
    /// Constant awaiting materialization; `sql` is empty while this is set
    pub value: Option<Value>,
    pub ty: Option<SqlType>,
    pub kind: SegmentKind,
    pub precedence: u8,
    pub is_aggregate: bool,
    /// Member name, used to name parameters compared with or assigned to it
    pub member: Option<String>,
    /// Physical column name for bare column references
    pub column: Option<String>,
    pub pending: Option<Box<PendingCall>>,
}

impl SqlSegment {
    fn new(sql: String, kind: SegmentKind, precedence: u8) -> Self {
        Self {
            sql,
            value: None,
            ty: None,
            kind,
            precedence,
            is_aggregate: false,
            member: None,
            column: None,
            pending: None,
        }
    }

    pub fn constant(value: Value) -> Self {
        let ty = value.sql_type();
        Self {
            value: Some(value),
            ty,
            ..Self::new(String::new(), SegmentKind::Constant, ATOM)
        }
    }

    pub fn column(sql: String, member: &str, column: &str, ty: Option<SqlType>) -> Self {
        Self {
            ty,
            member: Some(member.to_string()),
            column: Some(column.to_string()),
            ..Self::new(sql, SegmentKind::Column, ATOM)
        }
    }

    /// Self-delimiting expression: function call, CASE, cast.
    pub fn atom(sql: String) -> Self {
        Self::new(sql, SegmentKind::Expression, ATOM)
    }

    pub fn expression(sql: String, precedence: u8) -> Self {
        Self::new(sql, SegmentKind::Expression, precedence)
    }

    pub fn predicate(sql: String, precedence: u8) -> Self {
        Self {
            ty: Some(SqlType::Boolean),
            ..Self::new(sql, SegmentKind::Predicate, precedence)
        }
    }

    /// Comparison-level predicate (`x LIKE y`, `x IN (...)`, `x IS NULL`).
    pub fn comparison(sql: String) -> Self {
        Self::predicate(sql, BinaryOp::Eq.precedence())
    }

    pub fn aggregate(sql: String, ty: Option<SqlType>) -> Self {
        Self {
            ty,
            is_aggregate: true,
            ..Self::atom(sql)
        }
    }

    pub fn subquery(sql: String) -> Self {
        Self::new(format!("({sql})"), SegmentKind::SubQuery, ATOM)
    }

    pub fn raw(sql: String) -> Self {
        Self::new(sql, SegmentKind::Raw, 0)
    }

    pub fn pending(call: PendingCall) -> Self {
        Self {
            pending: Some(Box::new(call)),
            ty: Some(SqlType::Boolean),
            ..Self::new(String::new(), SegmentKind::Predicate, BinaryOp::Eq.precedence())
        }
    }

    #[must_use]
    pub fn with_type(mut self, ty: Option<SqlType>) -> Self {
        self.ty = ty;
        self
    }

    #[must_use]
    pub fn with_aggregate(mut self, is_aggregate: bool) -> Self {
        self.is_aggregate = self.is_aggregate || is_aggregate;
        self
    }

    pub fn is_constant(&self) -> bool {
        self.value.is_some() && self.pending.is_none()
    }

    pub fn is_null_constant(&self) -> bool {
        matches!(self.value, Some(Value::Null))
    }

    pub fn is_predicate(&self) -> bool {
        self.kind == SegmentKind::Predicate
    }

    pub fn is_text(&self) -> bool {
        self.ty.as_ref().is_some_and(SqlType::is_text)
            || matches!(self.value, Some(Value::Text(_)))
    }

    pub fn is_boolean(&self) -> bool {
        self.ty.as_ref().is_some_and(SqlType::is_boolean)
    }

    /// Copy the naming and type hints of the column this constant is paired with.
    pub fn adopt_hints(&mut self, column: &SqlSegment) {
        if !self.is_constant() || column.kind != SegmentKind::Column {
            return;
        }
        if self.member.is_none() {
            self.member.clone_from(&column.member);
        }
        if column.ty.is_some() && !self.is_null_constant() {
            self.ty.clone_from(&column.ty);
        }
    }
}
