//! Expression visitor.
//!
//! Every compound node is visited in two phases: children are first turned
//! into [`SqlSegment`]s, then the node itself is resolved by constant
//! folding, a dialect formatter, or an error. Predicate-shaped calls come
//! back from the first phase as pending segments and are only formatted once
//! the parent is known, so `NOT` can select `NOT LIKE`, `NOT IN` or
//! `NOT EXISTS`.

use std::collections::BTreeSet;

use sqlweave_core::{Error, Result, SqlType, Value};

use crate::ast::{ATOM, BinaryOp, Expr, MemberPath, MemberRoot, Owner, PREFIX, TableRef, UnaryOp};
use crate::context::StatementContext;
use crate::dialect::functions::concat;
use crate::fold::{fold_binary, fold_call, fold_property, fold_unary};
use crate::query::{QuerySpec, compile_select};
use crate::scope::{ProjectedField, Scope, TableSegment, TableSource};
use crate::segment::{CallOperands, PendingCall, SegmentKind, SqlSegment};

const COMPARISON: u8 = BinaryOp::Eq.precedence();

/// Clause an expression is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Clause {
    Where,
    JoinOn,
    GroupBy,
    Having,
    Select,
    OrderBy,
    Assign,
}

impl Clause {
    const fn allows_aggregates(self) -> bool {
        matches!(self, Clause::Having | Clause::Select | Clause::OrderBy)
    }

    const fn as_str(self) -> &'static str {
        match self {
            Clause::Where => "WHERE",
            Clause::JoinOn => "a JOIN predicate",
            Clause::GroupBy => "GROUP BY",
            Clause::Having => "HAVING",
            Clause::Select => "SELECT",
            Clause::OrderBy => "ORDER BY",
            Clause::Assign => "SET",
        }
    }
}

pub(crate) struct Visitor<'v, 'c> {
    cx: &'v mut StatementContext<'c>,
    scope: &'v Scope<'v, 'c>,
    clause: Clause,
    referenced: BTreeSet<usize>,
}

impl<'v, 'c> Visitor<'v, 'c> {
    pub fn new(cx: &'v mut StatementContext<'c>, scope: &'v Scope<'v, 'c>, clause: Clause) -> Self {
        Self {
            cx,
            scope,
            clause,
            referenced: BTreeSet::new(),
        }
    }

    /// Indexes of current-level tables the visited expressions touched.
    pub fn into_referenced(self) -> BTreeSet<usize> {
        self.referenced
    }

    /// Compile a condition for WHERE, ON or HAVING.
    pub fn predicate(&mut self, expr: &Expr) -> Result<String> {
        let seg = self.condition(expr)?;
        self.cx.render(seg)
    }

    /// Condition as an unrendered segment, for callers that splice it next
    /// to other conditions.
    pub fn condition(&mut self, expr: &Expr) -> Result<SqlSegment> {
        let seg = self.visit(expr)?;
        self.as_predicate(seg)
    }

    /// Compile a value (ORDER BY item, SET right-hand side).
    pub fn value(&mut self, expr: &Expr) -> Result<SqlSegment> {
        let seg = self.visit(expr)?;
        self.value_position(seg)
    }

    /// Compile a SELECT list or a set of grouping keys.
    ///
    /// Objects yield one field per member in declaration order, whole tables
    /// and the whole grouping expand to all their columns, and any other
    /// expression becomes a single field named after its member or `fallback`.
    pub fn projection(&mut self, expr: &Expr, fallback: &str) -> Result<Vec<ProjectedField>> {
        match expr {
            Expr::Object(members) => {
                let mut fields = Vec::with_capacity(members.len());
                for (name, member) in members {
                    if is_whole(member) {
                        fields.extend(self.expand(member)?);
                    } else {
                        fields.push(self.field(name, member)?);
                    }
                }
                Ok(fields)
            }
            whole if is_whole(whole) => self.expand(whole),
            other => {
                let name = other.member_name().unwrap_or(fallback).to_string();
                Ok(vec![self.field(&name, other)?])
            }
        }
    }

    // ========================================================================
    // Phase 1: children into segments
    // ========================================================================

    fn visit(&mut self, expr: &Expr) -> Result<SqlSegment> {
        let seg = self.visit_raw(expr)?;
        self.settle(seg, false)
    }

    /// Format a pending call now that its parent is known.
    fn settle(&mut self, mut seg: SqlSegment, negated: bool) -> Result<SqlSegment> {
        match seg.pending.take() {
            Some(pending) => {
                let PendingCall {
                    name,
                    formatter,
                    mut operands,
                } = *pending;
                operands.negated = negated;
                tracing::trace!(call = %name, negated, "formatted deferred call");
                formatter(self.cx, operands)
            }
            None => Ok(seg),
        }
    }

    fn visit_raw(&mut self, expr: &Expr) -> Result<SqlSegment> {
        match expr {
            Expr::Constant(value) => Ok(SqlSegment::constant(value.clone())),
            Expr::Raw(sql) => Ok(SqlSegment::raw(sql.clone())),
            Expr::Member(path) => self.visit_member(path),
            Expr::Binary { op, left, right } => self.visit_binary(*op, left, right),
            Expr::Unary { op, operand } => self.visit_unary(*op, operand),
            Expr::Property {
                owner,
                name,
                target,
            } => self.visit_property(*owner, name, target.as_deref()),
            Expr::Call {
                owner,
                name,
                target,
                args,
            } => self.visit_call(*owner, name, target.as_deref(), args),
            Expr::Conditional {
                test,
                then,
                otherwise,
            } => self.visit_conditional(test, then, otherwise),
            Expr::Cast { operand, to } => {
                let seg = self.visit(operand)?;
                let seg = self.value_position(seg)?;
                let is_aggregate = seg.is_aggregate;
                let sql = self.cx.render(seg)?;
                Ok(SqlSegment::atom(self.cx.provider().cast(&sql, to))
                    .with_type(Some(to.clone()))
                    .with_aggregate(is_aggregate))
            }
            Expr::Object(_) => Err(Error::unsupported(
                "object construction is only allowed in projections",
            )),
            Expr::SubQuery(spec) => self.visit_subquery(spec),
        }
    }

    // ========================================================================
    // Members
    // ========================================================================

    fn visit_member(&mut self, path: &MemberPath) -> Result<SqlSegment> {
        let Some((first, rest)) = path.path.split_first() else {
            return Err(Error::unsupported(
                "a whole table or grouping can only appear in a projection",
            ));
        };
        let mut seg = match &path.root {
            MemberRoot::Grouping => {
                let key = self.scope.grouping_key(first)?;
                match &key.natural {
                    Some(column) => SqlSegment::column(key.sql.clone(), &key.target, column, key.ty.clone()),
                    None => {
                        let mut seg = SqlSegment::expression(key.sql.clone(), key.precedence)
                            .with_type(key.ty.clone())
                            .with_aggregate(key.is_aggregate);
                        seg.member = Some(key.target.clone());
                        seg
                    }
                }
            }
            MemberRoot::Table(table) => self.column(*table, first)?,
        };
        // Remaining path elements are properties of the value, e.g. Name.Length
        for name in rest {
            let owner = match seg.ty.as_ref() {
                Some(ty) if ty.is_text() => Owner::String,
                Some(ty) if ty.is_temporal() => Owner::DateTime,
                _ => Owner::Sql,
            };
            let formatter = self.cx.member_formatter(owner, name)?;
            seg = formatter(self.cx, Some(seg))?;
        }
        Ok(seg)
    }

    fn column(&mut self, table: TableRef, member: &str) -> Result<SqlSegment> {
        let outer = self.scope;
        let scope = outer.at_depth(table.depth)?;
        let segment = scope.table(table.index)?;
        if table.depth == 0 {
            self.referenced.insert(table.index);
        }
        let (column, ty) = match &segment.source {
            TableSource::Entity(map) => {
                let col = map.require_member(member)?;
                (col.column_name().to_string(), Some(col.db_type.clone()))
            }
            TableSource::Derived(columns) => {
                let col = columns.iter().find(|c| c.name == member).ok_or_else(|| {
                    Error::unresolved(format!(
                        "member `{member}` is not projected by {}",
                        segment.describe()
                    ))
                })?;
                (col.name.clone(), col.ty.clone())
            }
        };
        let sql = self.qualified(scope, segment, table.depth, &column);
        Ok(SqlSegment::column(sql, member, &column, ty))
    }

    fn qualified(&self, scope: &Scope<'_, 'c>, segment: &TableSegment<'c>, depth: usize, column: &str) -> String {
        let quoted = self.cx.quote(column);
        if scope.qualify {
            format!("{}.{quoted}", segment.alias)
        } else if depth > 0 {
            format!("{}.{quoted}", segment.source_sql)
        } else {
            quoted
        }
    }

    /// Every column of a table or grouping, in declaration order.
    fn expand(&mut self, expr: &Expr) -> Result<Vec<ProjectedField>> {
        let Expr::Member(MemberPath { root, .. }) = expr else {
            return Err(Error::unsupported("only tables and groupings can be expanded"));
        };
        let table = match root {
            MemberRoot::Grouping => {
                if self.scope.grouping.is_empty() {
                    return Err(Error::unresolved("grouping projected without GROUP BY"));
                }
                return Ok(self.scope.grouping.clone());
            }
            MemberRoot::Table(table) => *table,
        };
        let outer = self.scope;
        let scope = outer.at_depth(table.depth)?;
        let segment = scope.table(table.index)?;
        if table.depth == 0 {
            self.referenced.insert(table.index);
        }
        let columns: Vec<(String, String, Option<SqlType>)> = match &segment.source {
            TableSource::Entity(map) => map
                .columns
                .iter()
                .map(|c| (c.member.clone(), c.column_name().to_string(), Some(c.db_type.clone())))
                .collect(),
            TableSource::Derived(columns) => columns
                .iter()
                .map(|c| (c.name.clone(), c.name.clone(), c.ty.clone()))
                .collect(),
        };
        if columns.is_empty() {
            return Err(Error::unresolved(format!(
                "{} exposes no named columns",
                segment.describe()
            )));
        }
        Ok(columns
            .into_iter()
            .map(|(member, column, ty)| ProjectedField {
                sql: self.qualified(scope, segment, table.depth, &column),
                target: member,
                natural: Some(column),
                precedence: ATOM,
                ty,
                is_aggregate: false,
            })
            .collect())
    }

    fn field(&mut self, target: &str, expr: &Expr) -> Result<ProjectedField> {
        let seg = self.visit(expr)?;
        let seg = self.value_position(seg)?;
        if seg.is_aggregate && !self.clause.allows_aggregates() {
            return Err(Error::unsupported(format!(
                "aggregates are not allowed in {}",
                self.clause.as_str()
            )));
        }
        let natural = if seg.kind == SegmentKind::Column {
            seg.column.clone()
        } else {
            None
        };
        let (precedence, ty, is_aggregate) = (seg.precedence, seg.ty.clone(), seg.is_aggregate);
        let sql = self.cx.render(seg)?;
        Ok(ProjectedField {
            target: target.to_string(),
            natural,
            sql,
            precedence,
            ty,
            is_aggregate,
        })
    }

    // ========================================================================
    // Operators
    // ========================================================================

    fn visit_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<SqlSegment> {
        let l = self.visit(left)?;
        if op.is_logical() {
            if let Some(b) = bool_constant(&l) {
                // true AND x, false OR x => x; false AND x, true OR x => constant
                return if b == (op == BinaryOp::And) {
                    self.visit(right)
                } else {
                    Ok(SqlSegment::constant(Value::Bool(b)))
                };
            }
        }
        let r = self.visit(right)?;

        if let (Some(a), Some(b)) = (&l.value, &r.value) {
            if let Some(folded) = fold_binary(op, a, b) {
                return Ok(SqlSegment::constant(folded));
            }
        }

        match op {
            BinaryOp::And | BinaryOp::Or => self.logical(op, l, r),
            BinaryOp::Coalesce => self.coalesce(l, r),
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => self.comparison(op, l, r),
            BinaryOp::Add if l.is_text() || r.is_text() => concat(self.cx, vec![l, r]),
            _ => self.arithmetic(op, l, r),
        }
    }

    fn logical(&mut self, op: BinaryOp, l: SqlSegment, r: SqlSegment) -> Result<SqlSegment> {
        // x AND true, x OR false => x
        if bool_constant(&r) == Some(op == BinaryOp::And) {
            return Ok(l);
        }
        let precedence = op.precedence();
        let is_aggregate = l.is_aggregate || r.is_aggregate;
        let l = self.as_predicate(l)?;
        let r = self.as_predicate(r)?;
        let ls = self.cx.render_operand(l, precedence, false)?;
        let rs = self.cx.render_operand(r, precedence, false)?;
        Ok(SqlSegment::predicate(format!("{ls} {} {rs}", op.as_str()), precedence)
            .with_aggregate(is_aggregate))
    }

    fn comparison(&mut self, op: BinaryOp, mut l: SqlSegment, mut r: SqlSegment) -> Result<SqlSegment> {
        if matches!(op, BinaryOp::Eq | BinaryOp::Ne) && (l.is_null_constant() || r.is_null_constant()) {
            let subject = if r.is_null_constant() { l } else { r };
            let is_aggregate = subject.is_aggregate;
            let subject = self.value_position(subject)?;
            let sql = self.cx.render_operand(subject, COMPARISON, true)?;
            let keyword = if op == BinaryOp::Eq { "IS NULL" } else { "IS NOT NULL" };
            return Ok(SqlSegment::comparison(format!("{sql} {keyword}")).with_aggregate(is_aggregate));
        }
        l.adopt_hints(&r);
        r.adopt_hints(&l);
        let is_aggregate = l.is_aggregate || r.is_aggregate;
        let l = self.value_position(l)?;
        let r = self.value_position(r)?;
        let operator = self.cx.provider().binary_operator(op)?;
        // comparisons do not chain, so both sides are strict
        let ls = self.cx.render_operand(l, COMPARISON, true)?;
        let rs = self.cx.render_operand(r, COMPARISON, true)?;
        Ok(SqlSegment::comparison(format!("{ls} {operator} {rs}")).with_aggregate(is_aggregate))
    }

    fn coalesce(&mut self, mut l: SqlSegment, mut r: SqlSegment) -> Result<SqlSegment> {
        l.adopt_hints(&r);
        r.adopt_hints(&l);
        let ty = l.ty.clone().or_else(|| r.ty.clone());
        let is_aggregate = l.is_aggregate || r.is_aggregate;
        let l = self.value_position(l)?;
        let r = self.value_position(r)?;
        let a = self.cx.render(l)?;
        let b = self.cx.render(r)?;
        Ok(SqlSegment::atom(format!("COALESCE({a}, {b})"))
            .with_type(ty)
            .with_aggregate(is_aggregate))
    }

    fn arithmetic(&mut self, op: BinaryOp, l: SqlSegment, r: SqlSegment) -> Result<SqlSegment> {
        let operator = self.cx.provider().binary_operator(op)?;
        let precedence = op.precedence();
        let ty = l.ty.clone().or_else(|| r.ty.clone());
        let is_aggregate = l.is_aggregate || r.is_aggregate;
        let ls = self.cx.render_operand(l, precedence, false)?;
        let rs = self.cx.render_operand(r, precedence, !op.is_associative())?;
        Ok(SqlSegment::expression(format!("{ls} {operator} {rs}"), precedence)
            .with_type(ty)
            .with_aggregate(is_aggregate))
    }

    fn visit_unary(&mut self, op: UnaryOp, operand: &Expr) -> Result<SqlSegment> {
        let seg = self.visit_raw(operand)?;
        if op == UnaryOp::Not && seg.pending.is_some() {
            return self.settle(seg, true);
        }
        let seg = self.settle(seg, false)?;
        if let Some(folded) = seg.value.as_ref().and_then(|v| fold_unary(op, v)) {
            return Ok(SqlSegment::constant(folded));
        }

        let is_aggregate = seg.is_aggregate;
        match op {
            UnaryOp::Not => {
                if seg.kind == SegmentKind::Column && seg.is_boolean() {
                    let sql = self.cx.render(seg)?;
                    let literal = self.cx.provider().boolean_literal(false);
                    return Ok(SqlSegment::comparison(format!("{sql} = {literal}")));
                }
                let seg = self.as_predicate(seg)?;
                let sql = self.cx.render_operand(seg, ATOM, false)?;
                Ok(SqlSegment::predicate(format!("NOT {sql}"), BinaryOp::And.precedence())
                    .with_aggregate(is_aggregate))
            }
            UnaryOp::Neg | UnaryOp::BitNot => {
                let sign = if op == UnaryOp::Neg { "-" } else { "~" };
                let ty = seg.ty.clone();
                // strict so that -(-x) never renders as the comment `--x`
                let sql = self.cx.render_operand(seg, PREFIX, true)?;
                Ok(SqlSegment::expression(format!("{sign}{sql}"), PREFIX)
                    .with_type(ty)
                    .with_aggregate(is_aggregate))
            }
        }
    }

    // ========================================================================
    // Phase 2: formatter resolution
    // ========================================================================

    fn visit_property(&mut self, owner: Owner, name: &str, target: Option<&Expr>) -> Result<SqlSegment> {
        let target = match target {
            Some(expr) => Some(self.visit(expr)?),
            None => None,
        };
        if let Some(folded) = target
            .as_ref()
            .and_then(|t| t.value.as_ref())
            .and_then(|v| fold_property(owner, name, Some(v)))
        {
            return Ok(SqlSegment::constant(folded));
        }
        let formatter = self.cx.member_formatter(owner, name)?;
        formatter(self.cx, target)
    }

    fn visit_call(&mut self, owner: Owner, name: &str, target: Option<&Expr>, args: &[Expr]) -> Result<SqlSegment> {
        let target = match target {
            Some(expr) => Some(self.visit(expr)?),
            None => None,
        };
        let mut visited = Vec::with_capacity(args.len());
        for arg in args {
            visited.push(self.visit(arg)?);
        }

        if let Some(folded) = fold_constant_call(owner, name, target.as_ref(), &visited) {
            return Ok(SqlSegment::constant(folded));
        }

        let entry = self.cx.method_formatter(owner, name)?;
        let operands = CallOperands {
            target,
            args: visited,
            negated: false,
        };
        if entry.deferred {
            return Ok(SqlSegment::pending(PendingCall {
                name: format!("{owner}.{name}"),
                formatter: entry.formatter,
                operands,
            }));
        }
        let seg = (entry.formatter)(self.cx, operands)?;
        if seg.is_aggregate && !self.clause.allows_aggregates() {
            return Err(Error::unsupported(format!(
                "aggregate {owner}.{name} is not allowed in {}",
                self.clause.as_str()
            )));
        }
        Ok(seg)
    }

    fn visit_conditional(&mut self, test: &Expr, then: &Expr, otherwise: &Expr) -> Result<SqlSegment> {
        let test = self.visit(test)?;
        if let Some(b) = bool_constant(&test) {
            return self.visit(if b { then } else { otherwise });
        }
        let test = self.as_predicate(test)?;
        let test_sql = self.cx.render(test)?;

        let mut then = self.visit(then)?;
        let mut otherwise = self.visit(otherwise)?;
        then.adopt_hints(&otherwise);
        otherwise.adopt_hints(&then);
        let ty = then.ty.clone().or_else(|| otherwise.ty.clone());
        let is_aggregate = then.is_aggregate || otherwise.is_aggregate;
        let then = self.value_position(then)?;
        let otherwise = self.value_position(otherwise)?;
        let a = self.cx.render(then)?;
        let b = self.cx.render(otherwise)?;
        Ok(SqlSegment::atom(format!("CASE WHEN {test_sql} THEN {a} ELSE {b} END"))
            .with_type(ty)
            .with_aggregate(is_aggregate))
    }

    fn visit_subquery(&mut self, spec: &QuerySpec) -> Result<SqlSegment> {
        let compiled = compile_select(self.cx, spec, Some(self.scope))?;
        let ty = match compiled.columns.as_slice() {
            [only] => only.ty.clone(),
            _ => None,
        };
        Ok(SqlSegment::subquery(compiled.sql).with_type(ty))
    }

    // ========================================================================
    // Positions
    // ========================================================================

    /// Coerce a segment into something usable as a condition.
    fn as_predicate(&mut self, seg: SqlSegment) -> Result<SqlSegment> {
        if seg.is_predicate() || seg.kind == SegmentKind::Raw {
            return Ok(seg);
        }
        if let Some(value) = &seg.value {
            return match value {
                Value::Bool(b) => Ok(SqlSegment::comparison(
                    if *b { "1 = 1" } else { "1 = 0" }.to_string(),
                )),
                other => Err(Error::unsupported(format!(
                    "a {} constant cannot be used as a condition",
                    other.type_name()
                ))),
            };
        }
        if seg.is_boolean() {
            let is_aggregate = seg.is_aggregate;
            let literal = self.cx.provider().boolean_literal(true);
            let sql = self.cx.render_operand(seg, COMPARISON, true)?;
            return Ok(SqlSegment::comparison(format!("{sql} = {literal}")).with_aggregate(is_aggregate));
        }
        Err(Error::unsupported(format!("`{}` is not a boolean condition", seg.sql)).with_fragment(seg.sql))
    }

    /// Wrap predicates used as values on dialects that cannot select them.
    fn value_position(&mut self, seg: SqlSegment) -> Result<SqlSegment> {
        if !seg.is_predicate() || self.cx.provider().supports_boolean_projection() {
            return Ok(seg);
        }
        let is_aggregate = seg.is_aggregate;
        let sql = self.cx.render(seg)?;
        Ok(SqlSegment::atom(format!("CASE WHEN {sql} THEN 1 ELSE 0 END"))
            .with_type(Some(SqlType::Boolean))
            .with_aggregate(is_aggregate))
    }
}

fn is_whole(expr: &Expr) -> bool {
    matches!(expr, Expr::Member(MemberPath { path, .. }) if path.is_empty())
}

fn bool_constant(seg: &SqlSegment) -> Option<bool> {
    match seg.value {
        Some(Value::Bool(b)) if seg.pending.is_none() => Some(b),
        _ => None,
    }
}

fn fold_constant_call(owner: Owner, name: &str, target: Option<&SqlSegment>, args: &[SqlSegment]) -> Option<Value> {
    if target.is_none() && args.is_empty() {
        return None;
    }
    if target.is_some_and(|t| !t.is_constant()) || args.iter().any(|a| !a.is_constant()) {
        return None;
    }
    let values: Vec<Value> = args.iter().filter_map(|a| a.value.clone()).collect();
    fold_call(owner, name, target.and_then(|t| t.value.as_ref()), &values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Tables;
    use crate::dialect::Dialect;
    use crate::options::CompileOptions;
    use sqlweave_core::{ColumnMap, EntityMap, EntityMapRegistry};

    fn order_map() -> EntityMap {
        EntityMap::new("Order", "orders")
            .column(ColumnMap::new("Id", SqlType::BigInt).key().identity())
            .column(ColumnMap::new("Status", SqlType::Integer))
            .column(ColumnMap::new("Name", SqlType::VarChar(50)))
            .column(ColumnMap::new("IsPaid", SqlType::Boolean).column("is_paid"))
            .column(ColumnMap::new("Total", SqlType::Double))
    }

    fn compile(dialect: Dialect, clause: Clause, f: impl FnOnce(&Tables) -> Expr) -> Result<(String, Vec<String>)> {
        let provider = dialect.provider();
        let maps = EntityMapRegistry::new();
        let options = CompileOptions::default();
        let map = order_map();
        let mut cx = StatementContext::new(provider.as_ref(), &maps, &options);
        let scope = Scope::new(
            vec![TableSegment {
                alias: "a".into(),
                source: TableSource::Entity(&map),
                source_sql: "\"orders\"".into(),
                join: None,
            }],
            None,
        );
        let expr = f(&Tables::new(1));
        let sql = {
            let mut visitor = Visitor::new(&mut cx, &scope, clause);
            if clause == Clause::Select {
                let fields = visitor.projection(&expr, "Value")?;
                fields.iter().map(|f| f.sql.clone()).collect::<Vec<_>>().join(", ")
            } else {
                visitor.predicate(&expr)?
            }
        };
        let names = cx.parameters().iter().map(|p| p.name.clone()).collect();
        Ok((sql, names))
    }

    fn filter(f: impl FnOnce(&Tables) -> Expr) -> (String, Vec<String>) {
        compile(Dialect::Postgres, Clause::Where, f).unwrap()
    }

    // ==================== Comparisons ====================

    #[test]
    fn test_parameter_named_after_column() {
        let (sql, names) = filter(|t| t[0].field("Status").eq(42));
        assert_eq!(sql, "a.\"Status\" = @Status");
        assert_eq!(names, vec!["@Status"]);
    }

    #[test]
    fn test_null_comparison() {
        let (sql, names) = filter(|t| t[0].field("Name").eq(Expr::null()));
        assert_eq!(sql, "a.\"Name\" IS NULL");
        assert!(names.is_empty());
        let (sql, _) = filter(|t| t[0].field("Name").is_not_null());
        assert_eq!(sql, "a.\"Name\" IS NOT NULL");
    }

    #[test]
    fn test_precedence_parentheses() {
        let (sql, _) = filter(|t| {
            t[0].field("Status")
                .eq(1)
                .or(t[0].field("Status").eq(2))
                .and(t[0].field("Total").gt(10.0))
        });
        assert_eq!(
            sql,
            "(a.\"Status\" = @Status OR a.\"Status\" = @Status_1) AND a.\"Total\" > @Total"
        );
    }

    #[test]
    fn test_non_associative_right_operand() {
        let (sql, _) = filter(|t| {
            t[0].field("Total")
                .sub(t[0].field("Status").sub(1))
                .gt(0)
        });
        assert_eq!(sql, "a.\"Total\" - (a.\"Status\" - @p) > @p_1");
    }

    // ==================== Booleans ====================

    #[test]
    fn test_bare_boolean_column() {
        let (sql, _) = filter(|t| t[0].field("IsPaid"));
        assert_eq!(sql, "a.\"is_paid\" = TRUE");
        let (sql, _) = compile(Dialect::SqlServer, Clause::Where, |t| t[0].field("IsPaid").not()).unwrap();
        assert_eq!(sql, "a.[is_paid] = 0");
    }

    #[test]
    fn test_boolean_constants() {
        let (sql, _) = filter(|_| Expr::lit(true));
        assert_eq!(sql, "1 = 1");
        let (sql, names) = filter(|t| Expr::lit(false).and(t[0].field("Status").eq(1)));
        assert_eq!(sql, "1 = 0");
        assert!(names.is_empty());
        let (sql, _) = filter(|t| t[0].field("Status").eq(1).and(true));
        assert_eq!(sql, "a.\"Status\" = @Status");
    }

    #[test]
    fn test_constant_folding() {
        let (sql, names) = filter(|t| t[0].field("Status").eq(Expr::lit(2) * 3));
        assert_eq!(sql, "a.\"Status\" = @Status");
        assert_eq!(names.len(), 1);
    }

    // ==================== Deferred calls ====================

    #[test]
    fn test_not_contains() {
        let (sql, _) = filter(|t| t[0].field("Name").contains("ab").not());
        assert_eq!(sql, "a.\"Name\" NOT LIKE @Name");
    }

    #[test]
    fn test_in_list_and_negation() {
        let (sql, names) = filter(|t| t[0].field("Status").in_list(vec![1, 2, 3]));
        assert_eq!(sql, "a.\"Status\" IN (@Status0, @Status1, @Status2)");
        assert_eq!(names.len(), 3);
        let (sql, _) = filter(|t| !t[0].field("Status").in_list(vec![1]));
        assert_eq!(sql, "a.\"Status\" NOT IN (@Status0)");
    }

    #[test]
    fn test_not_over_plain_predicate() {
        let (sql, _) = filter(|t| t[0].field("Status").gt(1).not());
        assert_eq!(sql, "NOT (a.\"Status\" > @Status)");
    }

    // ==================== Strings & functions ====================

    #[test]
    fn test_text_addition_concatenates() {
        let (sql, _) = compile(Dialect::Mysql, Clause::Where, |t| {
            (t[0].field("Name") + "!").eq("x!")
        })
        .unwrap();
        assert_eq!(sql, "CONCAT(a.`Name`, @p) = @p_1");
    }

    #[test]
    fn test_member_chain_property() {
        let (sql, _) = filter(|t| t[0].field("Name").member("Length").gt(3));
        assert_eq!(sql, "LENGTH(a.\"Name\") > @p");
    }

    #[test]
    fn test_unknown_member() {
        let err = compile(Dialect::Postgres, Clause::Where, |t| t[0].field("Nope").eq(1)).unwrap_err();
        assert!(err.is_unresolved());
    }

    #[test]
    fn test_aggregate_in_where_rejected() {
        let err = compile(Dialect::Postgres, Clause::Where, |t| {
            Expr::sum(t[0].field("Total")).gt(10)
        })
        .unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_non_boolean_condition_rejected() {
        let err = compile(Dialect::Postgres, Clause::Where, |t| t[0].field("Status")).unwrap_err();
        assert!(err.is_unsupported());
    }

    // ==================== Projections ====================

    #[test]
    fn test_whole_entity_expansion() {
        let (sql, _) = compile(Dialect::Postgres, Clause::Select, |t| t[0].all()).unwrap();
        assert_eq!(
            sql,
            "a.\"Id\", a.\"Status\", a.\"Name\", a.\"is_paid\", a.\"Total\""
        );
    }

    #[test]
    fn test_boolean_projection_on_sqlserver() {
        let (sql, _) = compile(Dialect::SqlServer, Clause::Select, |t| {
            Expr::object([("Big", t[0].field("Total").gt(100))])
        })
        .unwrap();
        assert_eq!(sql, "CASE WHEN a.[Total] > @Total THEN 1 ELSE 0 END");
    }

    #[test]
    fn test_case_when_and_coalesce() {
        let (sql, _) = compile(Dialect::Postgres, Clause::Select, |t| {
            Expr::object([
                ("Label", Expr::case_when(t[0].field("IsPaid"), "paid", "open")),
                ("Named", t[0].field("Name").coalesce("?")),
            ])
        })
        .unwrap();
        assert_eq!(
            sql,
            "CASE WHEN a.\"is_paid\" = TRUE THEN @p ELSE @p_1 END, COALESCE(a.\"Name\", @Name)"
        );
    }
}
