//! UPDATE builder.
//!
//! Single-table updates emit bare column names. Joined updates follow the
//! dialect's [`UpdateJoinStyle`]:
//!
//! - PostgreSQL/SQLite: `UPDATE t AS a SET … FROM t2 b WHERE <on> AND …`
//! - MySQL: `UPDATE t a INNER JOIN t2 b ON … SET a.c = … WHERE …`
//! - SQL Server: `UPDATE a SET a.c = … FROM t a INNER JOIN t2 b ON … WHERE …`

use std::collections::HashSet;

use sqlweave_core::{ColumnMap, Entity, EntityMap, Error, Result, Value};

use crate::ast::{BinaryOp, Expr, Tables};
use crate::cache::fingerprint;
use crate::compiler::SqlCompiler;
use crate::context::{CompiledStatement, ParameterEntry, StatementContext};
use crate::create::{Row, row_of};
use crate::dialect::UpdateJoinStyle;
use crate::scope::{JoinType, Scope, TableSegment, TableSource};
use crate::segment::SqlSegment;
use crate::sharding::{ShardKey, write_table};
use crate::visitor::{Clause, Visitor};

const AND: u8 = BinaryOp::And.precedence();

#[derive(Debug, Clone)]
enum Assignment {
    Value(String, Value),
    Expr(String, Expr),
    /// `Expr::object` whose members name the assigned columns
    Fields(Expr),
    /// Row values; key and identity members are skipped
    Object(Row),
}

#[derive(Debug, Clone)]
struct JoinSpec {
    entity: String,
    kind: JoinType,
    on: Expr,
}

/// UPDATE builder.
#[derive(Debug, Clone)]
pub struct Update<'a> {
    compiler: &'a SqlCompiler,
    entity: String,
    assignments: Vec<Assignment>,
    filters: Vec<Expr>,
    joins: Vec<JoinSpec>,
    /// Row whose key columns form the predicate
    key_row: Option<Row>,
    bulk: Vec<Row>,
    all_rows: bool,
    shard: Option<ShardKey>,
    mismatch: Option<String>,
    /// Members `set_diff` found changed; none may be a key
    diff_members: Vec<String>,
}

impl<'a> Update<'a> {
    pub(crate) fn new(compiler: &'a SqlCompiler, entity: impl Into<String>) -> Self {
        Self {
            compiler,
            entity: entity.into(),
            assignments: Vec::new(),
            filters: Vec::new(),
            joins: Vec::new(),
            key_row: None,
            bulk: Vec::new(),
            all_rows: false,
            shard: None,
            mismatch: None,
            diff_members: Vec::new(),
        }
    }

    fn tables(&self) -> Tables {
        Tables::new(self.joins.len() + 1)
    }

    fn check_entity(&mut self, entity: &str) {
        if entity != self.entity && self.mismatch.is_none() {
            self.mismatch = Some(entity.to_string());
        }
    }

    // ==================== Assignments ====================

    /// Every non-key column of `obj`, matched on its key.
    pub fn set_obj<E: Entity>(mut self, obj: &E) -> Self {
        self.check_entity(E::ENTITY);
        let row = row_of(obj);
        self.assignments.push(Assignment::Object(row.clone()));
        self.key_row = Some(row);
        self
    }

    /// Only the columns whose values differ between `old` and `new`.
    ///
    /// The row is matched on the key values of `old`. A key that differs
    /// between the two fails at build time; assign it with [`Update::set`].
    pub fn set_diff<E: Entity>(mut self, old: &E, new: &E) -> Self {
        self.check_entity(E::ENTITY);
        let before = row_of(old);
        let after = row_of(new);
        let changed: Row = after
            .iter()
            .filter(|(member, value)| !before.iter().any(|(m, v)| m == member && v == value))
            .cloned()
            .collect();
        self.diff_members.extend(changed.iter().map(|(member, _)| member.clone()));
        self.assignments.push(Assignment::Object(changed));
        self.key_row = Some(before);
        self
    }

    pub fn set(mut self, member: impl Into<String>, value: impl Into<Value>) -> Self {
        self.assignments.push(Assignment::Value(member.into(), value.into()));
        self
    }

    /// Assign a computed value: arithmetic on columns, a scalar sub-query, …
    pub fn set_with(mut self, member: impl Into<String>, f: impl FnOnce(&Tables) -> Expr) -> Self {
        let expr = f(&self.tables());
        self.assignments.push(Assignment::Expr(member.into(), expr));
        self
    }

    /// Assign every member of an `Expr::object`.
    pub fn set_fields(mut self, f: impl FnOnce(&Tables) -> Expr) -> Self {
        let expr = f(&self.tables());
        self.assignments.push(Assignment::Fields(expr));
        self
    }

    /// One UPDATE per object, matched on its key, in a single command text.
    pub fn with_bulk<E: Entity>(mut self, rows: &[E]) -> Self {
        self.check_entity(E::ENTITY);
        self.bulk.extend(rows.iter().map(row_of));
        self
    }

    // ==================== Filters & joins ====================

    pub fn where_(mut self, f: impl FnOnce(&Tables) -> Expr) -> Self {
        let filter = f(&self.tables());
        self.filters.push(filter);
        self
    }

    /// Add the filter only when `condition` holds.
    pub fn and_where(self, condition: bool, f: impl FnOnce(&Tables) -> Expr) -> Self {
        if condition { self.where_(f) } else { self }
    }

    fn join(mut self, entity: String, kind: JoinType, on: impl FnOnce(&Tables) -> Expr) -> Self {
        let on = on(&Tables::new(self.joins.len() + 2));
        self.joins.push(JoinSpec { entity, kind, on });
        self
    }

    pub fn inner_join<E: Entity>(self, on: impl FnOnce(&Tables) -> Expr) -> Self {
        self.join(E::ENTITY.to_string(), JoinType::Inner, on)
    }

    pub fn left_join<E: Entity>(self, on: impl FnOnce(&Tables) -> Expr) -> Self {
        self.join(E::ENTITY.to_string(), JoinType::Left, on)
    }

    pub fn inner_join_entity(self, entity: impl Into<String>, on: impl FnOnce(&Tables) -> Expr) -> Self {
        self.join(entity.into(), JoinType::Inner, on)
    }

    pub fn left_join_entity(self, entity: impl Into<String>, on: impl FnOnce(&Tables) -> Expr) -> Self {
        self.join(entity.into(), JoinType::Left, on)
    }

    /// Allow an UPDATE without any predicate.
    pub fn all_rows(mut self) -> Self {
        self.all_rows = true;
        self
    }

    pub fn use_shard(mut self, key: ShardKey) -> Self {
        self.shard = Some(key);
        self
    }

    // ==================== Build ====================

    pub(crate) fn compiler(&self) -> &'a SqlCompiler {
        self.compiler
    }

    pub(crate) fn fingerprint(&self) -> u64 {
        fingerprint(
            self.compiler,
            &(
                "update",
                &self.entity,
                &self.assignments,
                &self.filters,
                &self.joins,
                &self.key_row,
                &self.bulk,
                self.all_rows,
                &self.shard,
            ),
        )
    }

    #[tracing::instrument(level = "trace", skip(self), fields(entity = %self.entity))]
    pub fn build_sql(&self) -> Result<(String, Vec<ParameterEntry>)> {
        Ok(self.compile(None)?.into_parts())
    }

    pub fn build(&self) -> Result<CompiledStatement> {
        self.compile(None)
    }

    pub(crate) fn compile(&self, namespace: Option<&str>) -> Result<CompiledStatement> {
        if let Some(other) = &self.mismatch {
            return Err(Error::config(format!(
                "cannot update a `{other}` through a builder for `{}`",
                self.entity
            )));
        }
        let map = self.compiler.entity(&self.entity)?;
        if let Some(key) = map
            .key_columns()
            .find(|key| self.diff_members.contains(&key.member))
        {
            return Err(Error::config(format!(
                "set_diff changes key `{}` of `{}`; assign it explicitly with set",
                key.member, self.entity
            )));
        }
        let mut cx = self.compiler.context(namespace);
        if !self.bulk.is_empty() {
            let sql = self.compile_bulk(&mut cx, map)?;
            return Ok(cx.finish(sql));
        }
        let table = write_table(map, self.shard.as_ref(), self.key_row.iter().map(Vec::as_slice))?;
        let sql = self.statement(&mut cx, map, &table, &self.assignments, self.key_row.as_ref())?;
        Ok(cx.finish(sql))
    }

    fn compile_bulk<'c>(&self, cx: &mut StatementContext<'c>, map: &'c EntityMap) -> Result<String> {
        if !self.assignments.is_empty() || !self.filters.is_empty() || !self.joins.is_empty() {
            return Err(Error::config(
                "bulk updates take no extra assignments, filters or joins",
            ));
        }
        let numbered = self.bulk.len() > 1;
        let mut statements = Vec::with_capacity(self.bulk.len());
        for (index, row) in self.bulk.iter().enumerate() {
            cx.set_row(numbered.then_some(index));
            let table = write_table(map, self.shard.as_ref(), [row.as_slice()])?;
            let assignments = [Assignment::Object(row.clone())];
            statements.push(self.statement(cx, map, &table, &assignments, Some(row))?);
        }
        cx.set_row(None);
        tracing::debug!(entity = %map.entity, rows = self.bulk.len(), "bulk update by key");
        Ok(statements.join(cx.provider().statement_separator()))
    }

    fn statement<'c>(
        &self,
        cx: &mut StatementContext<'c>,
        map: &'c EntityMap,
        table: &str,
        assignments: &[Assignment],
        key_row: Option<&Row>,
    ) -> Result<String> {
        if self.filters.is_empty() && key_row.is_none() && !self.all_rows {
            return Err(Error::missing_predicate(format!(
                "UPDATE of `{}` has no WHERE clause; call all_rows() to update every row",
                map.entity
            )));
        }
        let style = cx.provider().update_join_style();
        let joined = !self.joins.is_empty();
        if joined
            && style == UpdateJoinStyle::FromClause
            && self.joins.iter().any(|j| j.kind == JoinType::Left)
        {
            return Err(Error::dialect_mismatch(format!(
                "UPDATE with LEFT JOIN is not supported on {}",
                cx.dialect().as_str()
            )));
        }

        // Tables: the target first, then the joins
        let target_sql = cx.provider().quote_table(map.schema.as_deref(), table);
        let alias = if joined { cx.next_alias() } else { String::new() };
        let mut segments = vec![TableSegment {
            alias,
            source: TableSource::Entity(map),
            source_sql: target_sql.clone(),
            join: None,
        }];
        for join in &self.joins {
            let joined_map = cx.entity(&join.entity)?;
            if joined_map.is_sharded() {
                return Err(Error::ambiguous_shard(format!(
                    "sharded entity `{}` cannot be joined into an UPDATE",
                    joined_map.entity
                )));
            }
            segments.push(TableSegment {
                alias: cx.next_alias(),
                source: TableSource::Entity(joined_map),
                source_sql: cx.provider().quote_table(joined_map.schema.as_deref(), &joined_map.table),
                join: Some(join.kind),
            });
        }
        let mut scope = Scope::new(segments, None);
        scope.qualify = joined;

        // Join predicates must reference the table they join
        let mut ons = Vec::with_capacity(self.joins.len());
        for (offset, join) in self.joins.iter().enumerate() {
            let index = offset + 1;
            let (seg, referenced) = {
                let mut visitor = Visitor::new(cx, &scope, Clause::JoinOn);
                let seg = visitor.condition(&join.on)?;
                (seg, visitor.into_referenced())
            };
            if !referenced.contains(&index) {
                return Err(Error::missing_predicate(format!(
                    "join predicate of {} does not reference it",
                    scope.tables[index].describe()
                )));
            }
            ons.push(seg);
        }
        let mut ons = ons.into_iter();

        let qualify_targets = joined && style != UpdateJoinStyle::FromClause;
        let sets = assign(cx, &scope, map, assignments, qualify_targets)?;

        let mut conditions = Vec::new();
        let mut from = String::new();
        if joined {
            if style == UpdateJoinStyle::FromClause {
                // the first joined table moves to FROM and its ON to WHERE
                let first = &scope.tables[1];
                from = format!("{} {}", first.source_sql, first.alias);
                if let Some(on) = ons.next() {
                    conditions.push(conjunct(cx, on)?);
                }
            }
            let skip = if style == UpdateJoinStyle::FromClause { 2 } else { 1 };
            for (table, on) in scope.tables.iter().skip(skip).zip(ons) {
                let join = table.join.unwrap_or(JoinType::Inner);
                let on = cx.render(on)?;
                from.push_str(&format!(" {} {} {} ON {on}", join.as_str(), table.source_sql, table.alias));
            }
        }
        if let Some(row) = key_row {
            let qualifier = joined.then(|| scope.tables[0].alias.as_str());
            conditions.extend(key_conditions(cx, map, qualifier, row)?);
        }
        for filter in &self.filters {
            let seg = Visitor::new(cx, &scope, Clause::Where).condition(filter)?;
            conditions.push(conjunct(cx, seg)?);
        }

        let alias = &scope.tables[0].alias;
        let mut sql = match (joined, style) {
            (false, _) => format!("UPDATE {target_sql} SET {sets}"),
            (true, UpdateJoinStyle::FromClause) => {
                format!("UPDATE {target_sql} AS {alias} SET {sets} FROM {}", from.trim_start())
            }
            (true, UpdateJoinStyle::JoinBeforeSet) => format!("UPDATE {target_sql} {alias}{from} SET {sets}"),
            (true, UpdateJoinStyle::FromAfterSet) => {
                format!("UPDATE {alias} SET {sets} FROM {target_sql} {alias}{from}")
            }
        };
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        Ok(sql)
    }
}

/// Render one side of an `AND` chain.
fn conjunct(cx: &mut StatementContext<'_>, seg: SqlSegment) -> Result<String> {
    cx.render_operand(seg, AND, false)
}

fn assign<'c>(
    cx: &mut StatementContext<'c>,
    scope: &Scope<'_, 'c>,
    map: &EntityMap,
    assignments: &[Assignment],
    qualify: bool,
) -> Result<String> {
    let mut pairs: Vec<(&ColumnMap, Rhs<'_>)> = Vec::new();
    for assignment in assignments {
        match assignment {
            Assignment::Value(member, value) => {
                pairs.push((map.require_member(member)?, Rhs::Value(value.clone())));
            }
            Assignment::Expr(member, expr) => pairs.push((map.require_member(member)?, Rhs::Expr(expr))),
            Assignment::Fields(Expr::Object(members)) => {
                for (member, expr) in members {
                    pairs.push((map.require_member(member)?, Rhs::Expr(expr)));
                }
            }
            Assignment::Fields(_) => {
                return Err(Error::unsupported("set_fields expects an Expr::object of assignments"));
            }
            Assignment::Object(row) => {
                for (member, _) in row {
                    map.require_member(member)?;
                }
                for column in map.columns.iter().filter(|c| !c.is_key && !c.is_identity) {
                    if let Some((_, value)) = row.iter().find(|(m, _)| *m == column.member) {
                        pairs.push((column, Rhs::Value(value.clone())));
                    }
                }
            }
        }
    }
    if pairs.is_empty() {
        return Err(Error::empty_statement(format!("UPDATE of `{}` assigns nothing", map.entity)));
    }

    let mut seen = HashSet::new();
    let mut sets = Vec::with_capacity(pairs.len());
    for (column, rhs) in pairs {
        if column.is_identity {
            return Err(Error::config(format!(
                "identity column `{}` of `{}` cannot be assigned",
                column.member, map.entity
            )));
        }
        if !seen.insert(column.member.as_str()) {
            return Err(Error::config(format!("column `{}` is assigned twice", column.member)));
        }
        let quoted = cx.quote(column.column_name());
        let target = if qualify {
            format!("{}.{quoted}", scope.tables[0].alias)
        } else {
            quoted
        };
        let value = match rhs {
            Rhs::Value(value) => cx.render_value(Some(&column.member), value, Some(&column.db_type))?,
            Rhs::Expr(expr) => {
                let hints = SqlSegment::column(
                    target.clone(),
                    &column.member,
                    column.column_name(),
                    Some(column.db_type.clone()),
                );
                let mut seg = Visitor::new(cx, scope, Clause::Assign).value(expr)?;
                seg.adopt_hints(&hints);
                cx.render(seg)?
            }
        };
        sets.push(format!("{target} = {value}"));
    }
    Ok(sets.join(", "))
}

enum Rhs<'e> {
    Value(Value),
    Expr(&'e Expr),
}

/// `key = @key` for every key column of `map`, taking values from `row`.
pub(crate) fn key_conditions(
    cx: &mut StatementContext<'_>,
    map: &EntityMap,
    qualifier: Option<&str>,
    row: &[(String, Value)],
) -> Result<Vec<String>> {
    let keys: Vec<&ColumnMap> = map.key_columns().collect();
    if keys.is_empty() {
        return Err(Error::config(format!("entity `{}` has no key columns", map.entity)));
    }
    let mut conditions = Vec::with_capacity(keys.len());
    for key in keys {
        let value = row
            .iter()
            .find(|(member, _)| *member == key.member)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| Error::config(format!("no value for key `{}` of `{}`", key.member, map.entity)))?;
        if matches!(value, Value::Null) {
            return Err(Error::config(format!("key `{}` of `{}` is NULL", key.member, map.entity)));
        }
        let quoted = cx.quote(key.column_name());
        let column = match qualifier {
            Some(alias) => format!("{alias}.{quoted}"),
            None => quoted,
        };
        let marker = cx.render_value(Some(&key.member), value, Some(&key.db_type))?;
        conditions.push(format!("{column} = {marker}"));
    }
    Ok(conditions)
}
