//! INSERT builder.
//!
//! Rows are captured as `(member, value)` pairs and rendered against the
//! entity map when the statement is built. Bulk inserts split into several
//! statements once they exceed the batch size.

use sqlweave_core::{ColumnMap, Entity, EntityMap, Error, Result, Value};

use crate::cache::fingerprint;
use crate::compiler::SqlCompiler;
use crate::context::{CompiledStatement, ParameterEntry, StatementContext};
use crate::dialect::IdentityReturn;
use crate::query::{QuerySpec, compile_select};
use crate::sharding::{ShardKey, write_table};

/// One captured row: member name and value.
pub(crate) type Row = Vec<(String, Value)>;

pub(crate) fn row_of<E: Entity>(obj: &E) -> Row {
    obj.to_row()
        .into_iter()
        .map(|(member, value)| (member.to_string(), value))
        .collect()
}

/// INSERT builder.
#[derive(Debug, Clone)]
pub struct Create<'a> {
    compiler: &'a SqlCompiler,
    entity: String,
    rows: Vec<Row>,
    source: Option<QuerySpec>,
    only: Option<Vec<String>>,
    ignore: Vec<String>,
    batch_size: Option<usize>,
    returning_identity: bool,
    shard: Option<ShardKey>,
    /// Entity of an object passed to `with_by` that does not match
    mismatch: Option<String>,
}

impl<'a> Create<'a> {
    pub(crate) fn new(compiler: &'a SqlCompiler, entity: impl Into<String>) -> Self {
        Self {
            compiler,
            entity: entity.into(),
            rows: Vec::new(),
            source: None,
            only: None,
            ignore: Vec::new(),
            batch_size: None,
            returning_identity: false,
            shard: None,
            mismatch: None,
        }
    }

    /// Insert one object.
    pub fn with_by<E: Entity>(mut self, obj: &E) -> Self {
        self.check_entity(E::ENTITY);
        self.rows.push(row_of(obj));
        self
    }

    /// Insert one row given as member/value pairs; unlisted columns are omitted.
    pub fn with_values<I, S, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, V)>,
        S: Into<String>,
        V: Into<Value>,
    {
        self.rows
            .push(pairs.into_iter().map(|(m, v)| (m.into(), v.into())).collect());
        self
    }

    /// Insert many objects, split by the batch size.
    pub fn with_bulk<E: Entity>(mut self, rows: &[E]) -> Self {
        self.check_entity(E::ENTITY);
        self.rows.extend(rows.iter().map(row_of));
        self
    }

    /// Rows per statement for bulk inserts; overrides the compiler option.
    pub fn batch_size(mut self, rows: usize) -> Self {
        self.batch_size = Some(rows);
        self
    }

    /// `INSERT INTO t (…) SELECT …`; projection names map to members.
    pub fn from_query(mut self, query: impl Into<QuerySpec>) -> Self {
        self.source = Some(query.into());
        self
    }

    /// Restrict the inserted columns to these members.
    pub fn only_fields<I, S>(mut self, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only = Some(members.into_iter().map(Into::into).collect());
        self
    }

    /// Leave these members out of the column list.
    pub fn ignore_fields<I, S>(mut self, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore.extend(members.into_iter().map(Into::into));
        self
    }

    /// Return the generated identity value in the dialect's way.
    pub fn returning_identity(mut self) -> Self {
        self.returning_identity = true;
        self
    }

    /// Target table for a sharded entity; otherwise it is derived per row.
    pub fn use_shard(mut self, key: ShardKey) -> Self {
        self.shard = Some(key);
        self
    }

    fn check_entity(&mut self, entity: &str) {
        if entity != self.entity && self.mismatch.is_none() {
            self.mismatch = Some(entity.to_string());
        }
    }

    pub(crate) fn compiler(&self) -> &'a SqlCompiler {
        self.compiler
    }

    pub(crate) fn returns_identity(&self) -> bool {
        self.returning_identity
    }

    pub(crate) fn fingerprint(&self) -> u64 {
        fingerprint(
            self.compiler,
            &(
                "insert",
                &self.entity,
                &self.rows,
                &self.source,
                &self.only,
                &self.ignore,
                self.batch_size,
                self.returning_identity,
                &self.shard,
            ),
        )
    }

    // ==================== Build ====================

    /// Render one statement; fails when the rows split into several batches.
    #[tracing::instrument(level = "trace", skip(self), fields(entity = %self.entity))]
    pub fn build_sql(&self) -> Result<(String, Vec<ParameterEntry>)> {
        let mut statements = self.compile(None)?;
        if statements.len() != 1 {
            return Err(Error::config(format!(
                "insert splits into {} statements; use build_batches",
                statements.len()
            )));
        }
        Ok(statements.remove(0).into_parts())
    }

    /// One statement per batch, in row order.
    pub fn build_batches(&self) -> Result<Vec<CompiledStatement>> {
        self.compile(None)
    }

    pub(crate) fn compile(&self, namespace: Option<&str>) -> Result<Vec<CompiledStatement>> {
        if let Some(other) = &self.mismatch {
            return Err(Error::config(format!(
                "cannot insert a `{other}` through a builder for `{}`",
                self.entity
            )));
        }
        let map = self.compiler.entity(&self.entity)?;
        if let Some(source) = &self.source {
            if !self.rows.is_empty() {
                return Err(Error::config("an insert takes either rows or a query, not both"));
            }
            return Ok(vec![self.compile_from_query(map, source, namespace)?]);
        }
        self.compile_rows(map, namespace)
    }

    fn compile_rows(&self, map: &EntityMap, namespace: Option<&str>) -> Result<Vec<CompiledStatement>> {
        if self.rows.is_empty() {
            return Err(Error::empty_statement(format!("no rows to insert into `{}`", map.entity)));
        }
        for row in &self.rows {
            for (member, _) in row {
                map.require_member(member)?;
            }
        }
        let columns: Vec<&ColumnMap> = map
            .columns
            .iter()
            .filter(|c| !c.is_identity && self.includes(&c.member))
            .filter(|c| self.rows.iter().any(|row| row.iter().any(|(m, _)| *m == c.member)))
            .collect();
        if columns.is_empty() {
            return Err(Error::empty_statement(format!(
                "no insertable columns for `{}`",
                map.entity
            )));
        }

        let size = self.batch_size.unwrap_or(self.compiler.options().batch_size);
        if size == 0 {
            return Err(Error::config("batch_size must be at least 1"));
        }
        let table = write_table(map, self.shard.as_ref(), self.rows.iter().map(Vec::as_slice))?;
        let batches = self.rows.len().div_ceil(size);
        if batches > 1 {
            tracing::debug!(
                entity = %map.entity,
                rows = self.rows.len(),
                batch_size = size,
                batches,
                "splitting bulk insert"
            );
        }
        let numbered = self.rows.len() > 1;

        self.rows
            .chunks(size)
            .enumerate()
            .map(|(batch, chunk)| {
                let namespace = match namespace {
                    Some(ns) if batches > 1 => Some(format!("{ns}_{batch}")),
                    other => other.map(str::to_string),
                };
                let mut cx = self.compiler.context(namespace.as_deref());
                let mut tuples = Vec::with_capacity(chunk.len());
                for (index, row) in chunk.iter().enumerate() {
                    cx.set_row(numbered.then_some(index));
                    let mut values = Vec::with_capacity(columns.len());
                    for column in &columns {
                        let value = row
                            .iter()
                            .find(|(m, _)| *m == column.member)
                            .map_or(Value::Null, |(_, v)| v.clone());
                        values.push(cx.render_value(Some(&column.member), value, Some(&column.db_type))?);
                    }
                    tuples.push(format!("({})", values.join(", ")));
                }
                cx.set_row(None);
                let head = insert_head(&cx, map, &table, &columns);
                let sql = self.with_identity(&cx, map, head, &format!("VALUES {}", tuples.join(", ")))?;
                Ok(cx.finish(sql))
            })
            .collect()
    }

    fn compile_from_query(
        &self,
        map: &EntityMap,
        source: &QuerySpec,
        namespace: Option<&str>,
    ) -> Result<CompiledStatement> {
        let table = write_table(map, self.shard.as_ref(), std::iter::empty::<&[(String, Value)]>())?;
        let mut cx = self.compiler.context(namespace);
        let select = compile_select(&mut cx, source, None)?;
        if select.columns.is_empty() {
            return Err(Error::empty_statement(
                "INSERT … SELECT needs a projection with named columns",
            ));
        }
        let mut columns = Vec::with_capacity(select.columns.len());
        for projected in &select.columns {
            let column = map.require_member(&projected.name)?;
            if column.is_identity {
                return Err(Error::config(format!(
                    "identity column `{}` of `{}` cannot be inserted",
                    column.member, map.entity
                )));
            }
            columns.push(column);
        }
        let head = insert_head(&cx, map, &table, &columns);
        let sql = self.with_identity(&cx, map, head, &select.sql)?;
        Ok(cx.finish(sql))
    }

    fn includes(&self, member: &str) -> bool {
        let listed = self
            .only
            .as_ref()
            .is_none_or(|only| only.iter().any(|m| m == member));
        listed && !self.ignore.iter().any(|m| m == member)
    }

    /// Place the identity clause around `body` (VALUES list or SELECT).
    fn with_identity(&self, cx: &StatementContext<'_>, map: &EntityMap, head: String, body: &str) -> Result<String> {
        if !self.returning_identity {
            return Ok(format!("{head} {body}"));
        }
        let identity = map.identity_column().ok_or_else(|| {
            Error::config(format!("entity `{}` has no identity column to return", map.entity))
        })?;
        let quoted = cx.quote(identity.column_name());
        Ok(match cx.provider().identity_return(&quoted) {
            IdentityReturn::Returning(clause) => format!("{head} {body} {clause}"),
            IdentityReturn::Output(clause) => format!("{head} {clause} {body}"),
            IdentityReturn::Trailing(statement) => {
                format!("{head} {body}{}{statement}", cx.provider().statement_separator())
            }
        })
    }
}

/// `INSERT INTO t (c1, c2)`
fn insert_head(cx: &StatementContext<'_>, map: &EntityMap, table: &str, columns: &[&ColumnMap]) -> String {
    let names: Vec<String> = columns.iter().map(|c| cx.quote(c.column_name())).collect();
    format!(
        "INSERT INTO {} ({})",
        cx.provider().quote_table(map.schema.as_deref(), table),
        names.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;
    use crate::dialect::Dialect;
    use crate::fixtures::{LogEntry, Order, compiler, date};
    use crate::query::Query;

    const ORDER_COLUMNS: &str = "(\"CustomerId\", \"Status\", \"Name\", \"is_paid\", \"Total\")";

    // ==================== Single rows ====================

    #[test]
    fn test_insert_object_skips_identity() {
        let c = compiler(Dialect::Postgres);
        let (sql, params) = c.create_entity("Order").with_by(&Order::sample(1)).build_sql().unwrap();
        assert_eq!(
            sql,
            format!("INSERT INTO \"orders\" {ORDER_COLUMNS} VALUES (@CustomerId, @Status, @Name, @IsPaid, @Total)")
        );
        assert_eq!(params.len(), 5);
        assert_eq!(params[2].value, Value::from("order-1"));
        assert_eq!(params[3].value, Value::Bool(false));
    }

    #[test]
    fn test_insert_partial_values() {
        let c = compiler(Dialect::Sqlite);
        let (sql, _) = c
            .create_entity("Order")
            .with_values([("Status", Value::from(2)), ("Name", Value::from("x"))])
            .build_sql()
            .unwrap();
        assert_eq!(sql, "INSERT INTO \"orders\" (\"Status\", \"Name\") VALUES (:Status, :Name)");

        let (sql, _) = c
            .create_entity("Order")
            .with_by(&Order::sample(1))
            .only_fields(["Status", "Name", "Total"])
            .ignore_fields(["Name"])
            .build_sql()
            .unwrap();
        assert_eq!(sql, "INSERT INTO \"orders\" (\"Status\", \"Total\") VALUES (:Status, :Total)");
    }

    #[test]
    fn test_insert_literal_mode() {
        let c = compiler(Dialect::Postgres)
            .with_options(crate::options::CompileOptions::default().parameterized(false))
            .unwrap();
        let (sql, params) = c.create_entity("Order").with_by(&Order::sample(3)).build_sql().unwrap();
        assert!(params.is_empty());
        assert!(sql.contains("'order-3'"), "{sql}");
    }

    // ==================== Identity ====================

    #[test]
    fn test_returning_identity_per_dialect() {
        let order = Order::sample(1);
        let pg = compiler(Dialect::Postgres);
        let (sql, _) = pg.create_entity("Order").with_by(&order).returning_identity().build_sql().unwrap();
        assert!(sql.ends_with("@Total) RETURNING \"Id\""), "{sql}");

        let ms = compiler(Dialect::SqlServer);
        let (sql, _) = ms.create_entity("Order").with_by(&order).returning_identity().build_sql().unwrap();
        assert_eq!(
            sql,
            "INSERT INTO [orders] ([CustomerId], [Status], [Name], [is_paid], [Total]) OUTPUT INSERTED.[Id] VALUES (@CustomerId, @Status, @Name, @IsPaid, @Total)"
        );

        let my = compiler(Dialect::Mysql);
        let (sql, _) = my.create_entity("Order").with_by(&order).returning_identity().build_sql().unwrap();
        assert!(sql.ends_with(";\nSELECT LAST_INSERT_ID()"), "{sql}");

        let err = pg
            .create_entity("OrderLine")
            .with_values([("OrderId", 1), ("LineNo", 1)])
            .returning_identity()
            .build_sql()
            .unwrap_err();
        assert!(err.to_string().contains("identity"), "{err}");
    }

    // ==================== Bulk ====================

    #[test]
    fn test_bulk_insert_splits_into_batches() {
        let c = compiler(Dialect::Postgres);
        let orders: Vec<Order> = (1..=3).map(Order::sample).collect();
        let create = c.create_entity("Order").with_bulk(&orders).batch_size(2);
        let batches = create.build_batches().unwrap();
        assert_eq!(batches.len(), 2);
        assert!(batches[0].sql.contains(
            "VALUES (@CustomerId0, @Status0, @Name0, @IsPaid0, @Total0), (@CustomerId1, @Status1, @Name1, @IsPaid1, @Total1)"
        ));
        assert!(batches[1].sql.ends_with("VALUES (@CustomerId0, @Status0, @Name0, @IsPaid0, @Total0)"));
        assert_eq!(batches[1].parameter("@Name0").unwrap().value, Value::from("order-3"));
        let err = create.build_sql().unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err}");
        assert!(err.to_string().contains("use build_batches"), "{err}");
    }

    #[test]
    fn test_missing_member_values_render_null() {
        let c = compiler(Dialect::Postgres);
        let (sql, params) = c
            .create_entity("Order")
            .with_values([("Status", Value::from(1))])
            .with_values([("Status", Value::from(2)), ("Name", Value::from("b"))])
            .build_sql()
            .unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"orders\" (\"Status\", \"Name\") VALUES (@Status0, NULL), (@Status1, @Name1)"
        );
        assert_eq!(params.len(), 3);
    }

    // ==================== INSERT … SELECT ====================

    #[test]
    fn test_insert_from_query() {
        let c = compiler(Dialect::Postgres);
        let (sql, params) = c
            .create_entity("OrderLine")
            .from_query(
                Query::subquery_of("Order")
                    .where_(|t| t[0].field("Status").eq(1))
                    .select(|t| Expr::object([("OrderId", t[0].field("Id")), ("Qty", t[0].field("Status"))])),
            )
            .build_sql()
            .unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"order_lines\" (\"OrderId\", \"Qty\") SELECT a.\"Id\" AS \"OrderId\", a.\"Status\" AS \"Qty\" FROM \"orders\" a WHERE a.\"Status\" = @Status"
        );
        assert_eq!(params.len(), 1);

        let err = c
            .create_entity("Order")
            .from_query(Query::subquery_of("Order").select(|t| Expr::object([("Id", t[0].field("Id"))])))
            .build_sql()
            .unwrap_err();
        assert!(err.to_string().contains("identity"), "{err}");
    }

    // ==================== Errors ====================

    #[test]
    fn test_insert_errors() {
        let c = compiler(Dialect::Postgres);
        let err = c.create_entity("Order").build_sql().unwrap_err();
        assert!(err.is_empty_statement());

        let err = c.create_entity("Order").with_values([("Nope", 1)]).build_sql().unwrap_err();
        assert!(err.is_unresolved());

        let err = c.create_entity("Customer").with_by(&Order::sample(1)).build_sql().unwrap_err();
        assert!(err.to_string().contains("Order"), "{err}");
    }

    // ==================== Sharding ====================

    #[test]
    fn test_sharded_insert_targets_row_table() {
        let c = compiler(Dialect::Postgres);
        let rows = vec![
            LogEntry { id: 1, message: "a".into(), created_at: date(2024, 1, 2) },
            LogEntry { id: 2, message: "b".into(), created_at: date(2024, 1, 20) },
        ];
        let (sql, _) = c.create_entity("Log").with_bulk(&rows).build_sql().unwrap();
        assert!(sql.starts_with("INSERT INTO \"log_202401\" (\"Id\", \"Message\", \"CreatedAt\") VALUES"), "{sql}");

        let rows = vec![
            LogEntry { id: 1, message: "a".into(), created_at: date(2024, 1, 2) },
            LogEntry { id: 2, message: "b".into(), created_at: date(2024, 2, 2) },
        ];
        let err = c.create_entity("Log").with_bulk(&rows).build_sql().unwrap_err();
        assert!(err.is_ambiguous_shard());
    }

    #[test]
    fn test_fingerprint_tracks_rows() {
        let c = compiler(Dialect::Postgres);
        let one = c.create_entity("Order").with_by(&Order::sample(1));
        let two = c.create_entity("Order").with_by(&Order::sample(2));
        assert_eq!(one.fingerprint(), one.clone().fingerprint());
        assert_ne!(one.fingerprint(), two.fingerprint());
    }
}
