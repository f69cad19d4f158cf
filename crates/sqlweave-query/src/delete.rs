//! DELETE builder.

use sqlweave_core::{Entity, EntityMap, Error, Result, Value};

use crate::ast::{BinaryOp, Expr, Tables};
use crate::cache::fingerprint;
use crate::compiler::SqlCompiler;
use crate::context::{CompiledStatement, ParameterEntry, StatementContext};
use crate::create::{Row, row_of};
use crate::dialect::functions::in_values;
use crate::scope::{Scope, TableSegment, TableSource};
use crate::segment::SqlSegment;
use crate::sharding::{ShardKey, write_table};
use crate::update::key_conditions;
use crate::visitor::{Clause, Visitor};

#[derive(Debug, Clone)]
enum KeyFilter {
    /// Values of the single key column
    Values(Vec<Value>),
    /// Full row of an object; every key column must be present
    Row(Row),
}

/// DELETE builder.
#[derive(Debug, Clone)]
pub struct Delete<'a> {
    compiler: &'a SqlCompiler,
    entity: String,
    filters: Vec<Expr>,
    keys: Option<KeyFilter>,
    all_rows: bool,
    shard: Option<ShardKey>,
    mismatch: Option<String>,
}

impl<'a> Delete<'a> {
    pub(crate) fn new(compiler: &'a SqlCompiler, entity: impl Into<String>) -> Self {
        Self {
            compiler,
            entity: entity.into(),
            filters: Vec::new(),
            keys: None,
            all_rows: false,
            shard: None,
            mismatch: None,
        }
    }

    pub fn where_(mut self, f: impl FnOnce(&Tables) -> Expr) -> Self {
        let filter = f(&Tables::new(1));
        self.filters.push(filter);
        self
    }

    /// Add the filter only when `condition` holds.
    pub fn and_where(self, condition: bool, f: impl FnOnce(&Tables) -> Expr) -> Self {
        if condition { self.where_(f) } else { self }
    }

    /// Delete the row with this key; the entity needs exactly one key column.
    pub fn where_key(mut self, key: impl Into<Value>) -> Self {
        self.keys = Some(KeyFilter::Values(vec![key.into()]));
        self
    }

    /// Delete every row whose single key is in `keys`.
    pub fn where_keys<I, V>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.keys = Some(KeyFilter::Values(keys.into_iter().map(Into::into).collect()));
        self
    }

    /// Delete the row matching the key members of `obj`.
    pub fn where_by<E: Entity>(mut self, obj: &E) -> Self {
        if E::ENTITY != self.entity && self.mismatch.is_none() {
            self.mismatch = Some(E::ENTITY.to_string());
        }
        self.keys = Some(KeyFilter::Row(row_of(obj)));
        self
    }

    /// Allow a DELETE without any predicate.
    pub fn all_rows(mut self) -> Self {
        self.all_rows = true;
        self
    }

    pub fn use_shard(mut self, key: ShardKey) -> Self {
        self.shard = Some(key);
        self
    }

    pub(crate) fn compiler(&self) -> &'a SqlCompiler {
        self.compiler
    }

    pub(crate) fn fingerprint(&self) -> u64 {
        fingerprint(
            self.compiler,
            &("delete", &self.entity, &self.filters, &self.keys, self.all_rows, &self.shard),
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
                "cannot delete a `{other}` through a builder for `{}`",
                self.entity
            )));
        }
        let map = self.compiler.entity(&self.entity)?;
        if self.filters.is_empty() && self.keys.is_none() && !self.all_rows {
            return Err(Error::missing_predicate(format!(
                "DELETE from `{}` has no WHERE clause; call all_rows() to delete every row",
                map.entity
            )));
        }
        let key_row = match &self.keys {
            Some(KeyFilter::Row(row)) => Some(row.as_slice()),
            _ => None,
        };
        let table = write_table(map, self.shard.as_ref(), key_row)?;
        let table_sql = self.compiler.provider().quote_table(map.schema.as_deref(), &table);

        let mut cx = self.compiler.context(namespace);
        let scope = Scope {
            qualify: false,
            ..Scope::new(
                vec![TableSegment {
                    alias: String::new(),
                    source: TableSource::Entity(map),
                    source_sql: table_sql.clone(),
                    join: None,
                }],
                None,
            )
        };

        let mut conditions = match &self.keys {
            Some(KeyFilter::Row(row)) => key_conditions(&mut cx, map, None, row)?,
            Some(KeyFilter::Values(values)) => vec![key_list(&mut cx, map, values)?],
            None => Vec::new(),
        };
        for filter in &self.filters {
            let seg = Visitor::new(&mut cx, &scope, Clause::Where).condition(filter)?;
            conditions.push(cx.render_operand(seg, BinaryOp::And.precedence(), false)?);
        }

        let mut sql = format!("DELETE FROM {table_sql}");
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        Ok(cx.finish(sql))
    }
}

/// `key = @key` for one value, `key IN (…)` for several.
fn key_list(cx: &mut StatementContext<'_>, map: &EntityMap, values: &[Value]) -> Result<String> {
    let mut keys = map.key_columns();
    let (Some(key), None) = (keys.next(), keys.next()) else {
        return Err(Error::config(format!(
            "where_key needs exactly one key column on `{}`; use where_by",
            map.entity
        )));
    };
    if let [value] = values {
        let row = vec![(key.member.clone(), value.clone())];
        return Ok(key_conditions(cx, map, None, &row)?.join(" AND "));
    }
    let target = SqlSegment::column(
        cx.quote(key.column_name()),
        &key.member,
        key.column_name(),
        Some(key.db_type.clone()),
    );
    let list = SqlSegment::constant(Value::Array(values.to_vec()));
    let seg = in_values(cx, target, list, false)?;
    cx.render(seg)
}
