//! SELECT builder and compiler.
//!
//! [`Query`] records sources, clauses and a projection as a [`QuerySpec`];
//! nothing is rendered until `build_sql`. Builder closures receive the
//! ordered [`Tables`] declared so far and return an [`Expr`].
//!
//! # Example
//!
//! ```ignore
//! let (sql, params) = compiler
//!     .from::<Order>()
//!     .inner_join::<Customer>(|t| t[0].field("CustomerId").eq(t[1].field("Id")))
//!     .where_(|t| t[0].field("Status").eq(1))
//!     .select(|t| Expr::object([("Id", t[0].field("Id")), ("Name", t[1].field("Name"))]))
//!     .build_sql()?;
//! ```

use sqlweave_core::{Entity, Error, Result, SqlType};

use crate::ast::{Expr, TableRef, Tables};
use crate::cache::fingerprint;
use crate::compiler::SqlCompiler;
use crate::context::{CompiledStatement, ParameterEntry, StatementContext};
use crate::cte::{Cte, CteRef};
use crate::scope::{DerivedColumn, JoinType, ProjectedField, Scope, TableSegment, TableSource};
use crate::sharding::{ShardKey, ShardingResolver};
use crate::visitor::{Clause, Visitor};

/// Type of set operation between two queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOpType {
    /// UNION - combines results, removes duplicates
    Union,
    /// UNION ALL - combines results, keeps duplicates
    UnionAll,
}

impl SetOpType {
    /// Get the SQL keyword for this set operation.
    pub const fn as_sql(&self) -> &'static str {
        match self {
            SetOpType::Union => "UNION",
            SetOpType::UnionAll => "UNION ALL",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum SourceKind {
    Entity(String),
    Query(Box<QuerySpec>),
    Cte(String),
    /// Set operation; the first part carries no operator
    Compound(Vec<(Option<SetOpType>, QuerySpec)>),
}

#[derive(Debug, Clone)]
pub(crate) struct SourceSpec {
    pub kind: SourceKind,
    pub join: Option<JoinType>,
    pub on: Option<Expr>,
    pub shard: Option<ShardKey>,
    /// Physical table chosen by `build_per_shard`
    pub pinned: Option<String>,
}

impl SourceSpec {
    fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            join: None,
            on: None,
            shard: None,
            pinned: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) enum Projection {
    /// Grouping keys when grouped, else every column of the first table
    #[default]
    Default,
    Entity(usize),
    Expr(Expr),
    Fields(String),
    Count,
}

/// Captured shape of a SELECT statement.
#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    pub(crate) ctes: Vec<Cte>,
    pub(crate) sources: Vec<SourceSpec>,
    pub(crate) filters: Vec<Expr>,
    pub(crate) group_by: Option<Expr>,
    pub(crate) having: Vec<Expr>,
    pub(crate) order_by: Vec<(Expr, bool)>,
    pub(crate) projection: Projection,
    pub(crate) distinct: bool,
    pub(crate) skip: Option<u64>,
    pub(crate) take: Option<u64>,
}

impl QuerySpec {
    fn from_source(kind: SourceKind) -> Self {
        Self {
            sources: vec![SourceSpec::new(kind)],
            ..Self::default()
        }
    }

    /// Parts of a set operation that needs no outer SELECT.
    fn bare_compound(&self) -> Option<&[(Option<SetOpType>, QuerySpec)]> {
        let [source] = self.sources.as_slice() else {
            return None;
        };
        let SourceKind::Compound(parts) = &source.kind else {
            return None;
        };
        let untouched = self.filters.is_empty()
            && self.group_by.is_none()
            && self.having.is_empty()
            && self.order_by.is_empty()
            && matches!(self.projection, Projection::Default)
            && !self.distinct
            && self.skip.is_none()
            && self.take.is_none();
        untouched.then_some(parts.as_slice())
    }

    /// ORDER BY and paging are not allowed on a bare set-operation member.
    fn needs_wrapping(&self) -> bool {
        !self.order_by.is_empty() || self.skip.is_some() || self.take.is_some() || self.bare_compound().is_some()
    }
}

/// Output of one SELECT compilation: text plus the exposed columns.
#[derive(Debug, Clone)]
pub(crate) struct CompiledSelect {
    pub sql: String,
    pub columns: Vec<DerivedColumn>,
}

/// Fluent SELECT builder.
#[derive(Debug, Clone)]
pub struct Query<'a> {
    compiler: Option<&'a SqlCompiler>,
    spec: QuerySpec,
}

impl Query<'static> {
    /// Detached query for use as a sub-query, CTE body or set-operation member.
    pub fn subquery<E: Entity>() -> Self {
        Self::subquery_of(E::ENTITY)
    }

    pub fn subquery_of(entity: impl Into<String>) -> Self {
        Self::detached(SourceKind::Entity(entity.into()))
    }

    pub fn subquery_from_cte(cte: impl Into<CteRef>) -> Self {
        Self::detached(SourceKind::Cte(cte.into().name().to_string()))
    }

    pub fn subquery_from_query(query: impl Into<QuerySpec>) -> Self {
        Self::detached(SourceKind::Query(Box::new(query.into())))
    }

    fn detached(kind: SourceKind) -> Self {
        Self {
            compiler: None,
            spec: QuerySpec::from_source(kind),
        }
    }
}

impl<'a> Query<'a> {
    pub(crate) fn from_entity(compiler: &'a SqlCompiler, entity: impl Into<String>) -> Self {
        Self::attached(compiler, SourceKind::Entity(entity.into()))
    }

    pub(crate) fn from_query(compiler: &'a SqlCompiler, query: QuerySpec) -> Self {
        Self::attached(compiler, SourceKind::Query(Box::new(query)))
    }

    pub(crate) fn from_cte(compiler: &'a SqlCompiler, cte: CteRef) -> Self {
        Self::attached(compiler, SourceKind::Cte(cte.name().to_string()))
    }

    fn attached(compiler: &'a SqlCompiler, kind: SourceKind) -> Self {
        Self {
            compiler: Some(compiler),
            spec: QuerySpec::from_source(kind),
        }
    }

    /// Handles for every table declared so far.
    fn tables(&self) -> Tables {
        Tables::new(self.spec.sources.len())
    }

    // ==================== Joins ====================

    fn join<F>(mut self, kind: SourceKind, join: JoinType, on: F) -> Self
    where
        F: FnOnce(&Tables) -> Expr,
    {
        let tables = Tables::new(self.spec.sources.len() + 1);
        let predicate = on(&tables);
        self.spec.sources.push(SourceSpec {
            join: Some(join),
            on: Some(predicate),
            ..SourceSpec::new(kind)
        });
        self
    }

    pub fn inner_join<E: Entity>(self, on: impl FnOnce(&Tables) -> Expr) -> Self {
        self.join(SourceKind::Entity(E::ENTITY.to_string()), JoinType::Inner, on)
    }

    pub fn left_join<E: Entity>(self, on: impl FnOnce(&Tables) -> Expr) -> Self {
        self.join(SourceKind::Entity(E::ENTITY.to_string()), JoinType::Left, on)
    }

    pub fn inner_join_entity(self, entity: impl Into<String>, on: impl FnOnce(&Tables) -> Expr) -> Self {
        self.join(SourceKind::Entity(entity.into()), JoinType::Inner, on)
    }

    pub fn left_join_entity(self, entity: impl Into<String>, on: impl FnOnce(&Tables) -> Expr) -> Self {
        self.join(SourceKind::Entity(entity.into()), JoinType::Left, on)
    }

    pub fn inner_join_query(self, query: impl Into<QuerySpec>, on: impl FnOnce(&Tables) -> Expr) -> Self {
        self.join(SourceKind::Query(Box::new(query.into())), JoinType::Inner, on)
    }

    pub fn left_join_query(self, query: impl Into<QuerySpec>, on: impl FnOnce(&Tables) -> Expr) -> Self {
        self.join(SourceKind::Query(Box::new(query.into())), JoinType::Left, on)
    }

    pub fn inner_join_cte(self, cte: impl Into<CteRef>, on: impl FnOnce(&Tables) -> Expr) -> Self {
        self.join(SourceKind::Cte(cte.into().name().to_string()), JoinType::Inner, on)
    }

    pub fn left_join_cte(self, cte: impl Into<CteRef>, on: impl FnOnce(&Tables) -> Expr) -> Self {
        self.join(SourceKind::Cte(cte.into().name().to_string()), JoinType::Left, on)
    }

    /// Shard key for the most recently declared source.
    pub fn use_shard(mut self, key: ShardKey) -> Self {
        if let Some(source) = self.spec.sources.last_mut() {
            source.shard = Some(key);
        }
        self
    }

    // ==================== Clauses ====================

    /// Add a WHERE condition; several calls are combined with AND.
    pub fn where_(mut self, f: impl FnOnce(&Tables) -> Expr) -> Self {
        let condition = f(&self.tables());
        self.spec.filters.push(condition);
        self
    }

    /// Add a WHERE condition only when `condition` holds.
    pub fn and_where(self, condition: bool, f: impl FnOnce(&Tables) -> Expr) -> Self {
        if condition { self.where_(f) } else { self }
    }

    /// Group by one key or an object of named keys.
    pub fn group_by(mut self, f: impl FnOnce(&Tables) -> Expr) -> Self {
        let keys = f(&self.tables());
        self.spec.group_by = Some(keys);
        self
    }

    pub fn having(mut self, f: impl FnOnce(&Tables) -> Expr) -> Self {
        let condition = f(&self.tables());
        self.spec.having.push(condition);
        self
    }

    pub fn order_by(mut self, f: impl FnOnce(&Tables) -> Expr) -> Self {
        let key = f(&self.tables());
        self.spec.order_by.push((key, false));
        self
    }

    pub fn order_by_descending(mut self, f: impl FnOnce(&Tables) -> Expr) -> Self {
        let key = f(&self.tables());
        self.spec.order_by.push((key, true));
        self
    }

    // ==================== Projection ====================

    /// Anonymous projection; `Expr::object` members become named columns.
    pub fn select(mut self, f: impl FnOnce(&Tables) -> Expr) -> Self {
        let projection = f(&self.tables());
        self.spec.projection = Projection::Expr(projection);
        self
    }

    /// Every mapped column of table `index`.
    pub fn select_entity(mut self, index: usize) -> Self {
        self.spec.projection = Projection::Entity(index);
        self
    }

    /// Raw select list, emitted verbatim.
    pub fn select_fields(mut self, fields: impl Into<String>) -> Self {
        self.spec.projection = Projection::Fields(fields.into());
        self
    }

    pub fn select_count(mut self) -> Self {
        self.spec.projection = Projection::Count;
        self
    }

    pub fn distinct(mut self) -> Self {
        self.spec.distinct = true;
        self
    }

    // ==================== Paging ====================

    pub fn skip(mut self, rows: u64) -> Self {
        self.spec.skip = Some(rows);
        self
    }

    pub fn take(mut self, rows: u64) -> Self {
        self.spec.take = Some(rows);
        self
    }

    /// One-based page of `size` rows; page 0 is treated as page 1.
    pub fn page(self, number: u64, size: u64) -> Self {
        let skip = number.saturating_sub(1).saturating_mul(size);
        self.skip(skip).take(size)
    }

    // ==================== Composition ====================

    pub fn union(self, other: impl Into<QuerySpec>) -> Self {
        self.set_operation(SetOpType::Union, other.into())
    }

    pub fn union_all(self, other: impl Into<QuerySpec>) -> Self {
        self.set_operation(SetOpType::UnionAll, other.into())
    }

    /// Wrap the query built so far into a set operation; later clauses
    /// apply to the combined result.
    fn set_operation(mut self, op: SetOpType, other: QuerySpec) -> Self {
        let mut current = std::mem::take(&mut self.spec);
        let ctes = std::mem::take(&mut current.ctes);
        let mut parts = match current.bare_compound() {
            Some(parts) => parts.to_vec(),
            None => vec![(None, current)],
        };
        parts.push((Some(op), other));
        self.spec = QuerySpec {
            ctes,
            ..QuerySpec::from_source(SourceKind::Compound(parts))
        };
        self
    }

    pub fn with_cte(mut self, cte: Cte) -> Self {
        self.spec.ctes.push(cte);
        self
    }

    // ==================== Build ====================

    fn compiler(&self) -> Result<&'a SqlCompiler> {
        self.compiler.ok_or_else(|| {
            Error::config("a detached sub-query cannot be built on its own; start from a compiler")
        })
    }

    pub(crate) fn compile(&self, namespace: Option<&str>) -> Result<CompiledStatement> {
        let compiler = self.compiler()?;
        compile_statement(compiler, &self.spec, namespace)
    }

    /// Render SQL text and parameters.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn build_sql(&self) -> Result<(String, Vec<ParameterEntry>)> {
        Ok(self.compile(None)?.into_parts())
    }

    pub fn build(&self) -> Result<CompiledStatement> {
        self.compile(None)
    }

    /// One statement per physical table of the first sharded source,
    /// instead of a UNION ALL over all of them.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn build_per_shard(&self) -> Result<Vec<CompiledStatement>> {
        let compiler = self.compiler()?;
        let Some(index) = self.spec.sources.iter().position(|s| s.shard.is_some()) else {
            return Ok(vec![self.build()?]);
        };
        let source = &self.spec.sources[index];
        let (SourceKind::Entity(entity), Some(key)) = (&source.kind, &source.shard) else {
            return Err(Error::config("shard keys only apply to entity sources"));
        };
        let tables = ShardingResolver::new(compiler.entity(entity)?)?.resolve(key)?;
        tracing::debug!(entity = %entity, statements = tables.len(), "building one statement per shard");
        tables
            .into_iter()
            .map(|table| {
                let mut spec = self.spec.clone();
                spec.sources[index].pinned = Some(table);
                compile_statement(compiler, &spec, None)
            })
            .collect()
    }

    /// Stable hash of the dialect, options and captured query.
    pub fn fingerprint(&self) -> Result<u64> {
        let compiler = self.compiler()?;
        Ok(fingerprint(compiler, &self.spec))
    }

    pub(crate) fn dialect_of(&self) -> Option<crate::dialect::Dialect> {
        self.compiler.map(SqlCompiler::dialect)
    }
}

impl From<Query<'_>> for QuerySpec {
    fn from(query: Query<'_>) -> Self {
        query.spec
    }
}

impl From<&Query<'_>> for QuerySpec {
    fn from(query: &Query<'_>) -> Self {
        query.spec.clone()
    }
}

fn compile_statement(compiler: &SqlCompiler, spec: &QuerySpec, namespace: Option<&str>) -> Result<CompiledStatement> {
    let mut cx = compiler.context(namespace);
    let compiled = compile_select(&mut cx, spec, None)?;
    Ok(cx.finish(compiled.sql))
}

// ============================================================================
// Compilation
// ============================================================================

/// Compile a SELECT into `cx`, optionally nested inside `parent`.
pub(crate) fn compile_select<'p, 'c>(
    cx: &mut StatementContext<'c>,
    spec: &QuerySpec,
    parent: Option<&'p Scope<'p, 'c>>,
) -> Result<CompiledSelect> {
    if spec.sources.is_empty() {
        return Err(Error::empty_statement("query has no source table"));
    }
    let max = cx.options().max_tables;
    if spec.sources.len() > max {
        return Err(Error::unsupported(format!(
            "query declares {} tables; at most {max} are allowed",
            spec.sources.len()
        )));
    }
    if !spec.ctes.is_empty() && parent.is_some() {
        return Err(Error::unsupported("WITH is only allowed on the outermost query"));
    }

    let bare = spec.bare_compound();
    // this level's aliases come first so they do not depend on CTE or sub-query content
    let aliases: Vec<String> = match bare {
        Some(_) => Vec::new(),
        None => spec.sources.iter().map(|_| cx.next_alias()).collect(),
    };
    let with = compile_ctes(cx, &spec.ctes)?;
    let body = match bare {
        Some(parts) => compile_compound(cx, parts)?,
        None => compile_body(cx, spec, parent, aliases)?,
    };
    Ok(match with {
        Some(with) => CompiledSelect {
            sql: format!("{with} {}", body.sql),
            columns: body.columns,
        },
        None => body,
    })
}

fn compile_ctes(cx: &mut StatementContext<'_>, ctes: &[Cte]) -> Result<Option<String>> {
    if ctes.is_empty() {
        return Ok(None);
    }
    let mut recursive = false;
    let mut parts = Vec::with_capacity(ctes.len());
    for cte in ctes {
        if !cte.anchor.ctes.is_empty() || cte.recursive.as_ref().is_some_and(|r| !r.ctes.is_empty()) {
            return Err(Error::unsupported(format!("CTE `{}` cannot declare its own WITH", cte.name)));
        }
        let anchor = compile_select(cx, &cte.anchor, None)?;
        // the name is visible to the recursive branch and to every later CTE
        cx.define_cte(&cte.name, anchor.columns.clone())?;
        let mut body = anchor.sql;
        if let Some(branch) = &cte.recursive {
            recursive = true;
            let branch = compile_select(cx, branch, None)?;
            if !branch.columns.is_empty() && branch.columns.len() != anchor.columns.len() {
                return Err(Error::config(format!(
                    "recursive branch of CTE `{}` projects {} column(s), anchor projects {}",
                    cte.name,
                    branch.columns.len(),
                    anchor.columns.len()
                )));
            }
            body = format!("{body} UNION ALL {}", branch.sql);
        }
        let names: Vec<String> = anchor.columns.iter().map(|c| cx.quote(&c.name)).collect();
        let head = if names.is_empty() {
            cx.quote(&cte.name)
        } else {
            format!("{} ({})", cx.quote(&cte.name), names.join(", "))
        };
        parts.push(format!("{head} AS ({body})"));
    }
    let keyword = if recursive {
        cx.provider().recursive_keyword()
    } else {
        "WITH"
    };
    Ok(Some(format!("{keyword} {}", parts.join(", "))))
}

fn compile_compound(
    cx: &mut StatementContext<'_>,
    parts: &[(Option<SetOpType>, QuerySpec)],
) -> Result<CompiledSelect> {
    let mut sql = String::new();
    let mut columns = None;
    for (op, part) in parts {
        if !part.ctes.is_empty() {
            return Err(Error::unsupported("WITH is only allowed on the outermost query"));
        }
        let compiled = compile_select(cx, part, None)?;
        if let Some(op) = op {
            sql.push(' ');
            sql.push_str(op.as_sql());
            sql.push(' ');
        }
        if part.needs_wrapping() {
            let alias = cx.next_alias();
            sql.push_str(&format!("SELECT * FROM ({}) {alias}", compiled.sql));
        } else {
            sql.push_str(&compiled.sql);
        }
        columns.get_or_insert(compiled.columns);
    }
    Ok(CompiledSelect {
        sql,
        columns: columns.unwrap_or_default(),
    })
}

fn resolve_source<'c>(cx: &mut StatementContext<'c>, source: &SourceSpec) -> Result<(TableSource<'c>, String)> {
    if source.shard.is_some() && !matches!(source.kind, SourceKind::Entity(_)) {
        return Err(Error::config("shard keys only apply to entity sources"));
    }
    match &source.kind {
        SourceKind::Entity(name) => {
            let map = cx.entity(name)?;
            let schema = map.schema.as_deref();
            let sql = if !map.is_sharded() {
                if source.shard.is_some() {
                    return Err(Error::config(format!("entity `{}` is not sharded", map.entity)));
                }
                cx.provider().quote_table(schema, &map.table)
            } else if let Some(table) = &source.pinned {
                cx.provider().quote_table(schema, table)
            } else {
                let key = source.shard.as_ref().ok_or_else(|| {
                    Error::ambiguous_shard(format!(
                        "sharded entity `{}` needs a shard key (use_shard)",
                        map.entity
                    ))
                })?;
                let tables = ShardingResolver::new(map)?.resolve(key)?;
                match tables.as_slice() {
                    [] => {
                        return Err(Error::ambiguous_shard(format!(
                            "shard key for `{}` resolves to no table",
                            map.entity
                        )));
                    }
                    [only] => cx.provider().quote_table(schema, only),
                    many => {
                        let selects: Vec<String> = many
                            .iter()
                            .map(|t| format!("SELECT * FROM {}", cx.provider().quote_table(schema, t)))
                            .collect();
                        format!("({})", selects.join(" UNION ALL "))
                    }
                }
            };
            Ok((TableSource::Entity(map), sql))
        }
        SourceKind::Query(spec) => {
            let compiled = compile_select(cx, spec, None)?;
            Ok((TableSource::Derived(compiled.columns), format!("({})", compiled.sql)))
        }
        SourceKind::Cte(name) => {
            let columns = cx
                .cte(name)
                .ok_or_else(|| Error::unresolved(format!("CTE `{name}` is not declared on this statement")))?
                .to_vec();
            Ok((TableSource::Derived(columns), cx.quote(name)))
        }
        SourceKind::Compound(parts) => {
            let compiled = compile_compound(cx, parts)?;
            Ok((TableSource::Derived(compiled.columns), format!("({})", compiled.sql)))
        }
    }
}

fn compile_body<'p, 'c>(
    cx: &mut StatementContext<'c>,
    spec: &QuerySpec,
    parent: Option<&'p Scope<'p, 'c>>,
    aliases: Vec<String>,
) -> Result<CompiledSelect> {
    let mut tables = Vec::with_capacity(spec.sources.len());
    for (source, alias) in spec.sources.iter().zip(aliases) {
        let (table_source, source_sql) = resolve_source(cx, source)?;
        tables.push(TableSegment {
            alias,
            source: table_source,
            source_sql,
            join: source.join,
        });
    }
    let mut scope = Scope::new(tables, parent);

    // FROM / JOIN
    let mut from = format!("{} {}", scope.tables[0].source_sql, scope.tables[0].alias);
    for (index, source) in spec.sources.iter().enumerate().skip(1) {
        let (Some(join), Some(on)) = (source.join, source.on.as_ref()) else {
            return Err(Error::missing_predicate(format!(
                "{} is joined without an ON predicate",
                scope.tables[index].describe()
            )));
        };
        let condition = Visitor::new(cx, &scope, Clause::JoinOn).predicate(on)?;
        let table = &scope.tables[index];
        from.push_str(&format!(
            " {} {} {} ON {condition}",
            join.as_str(),
            table.source_sql,
            table.alias
        ));
    }

    let where_sql = match spec.filters.iter().cloned().reduce(Expr::and) {
        Some(filter) => Some(Visitor::new(cx, &scope, Clause::Where).predicate(&filter)?),
        None => None,
    };

    let group_sql = match &spec.group_by {
        Some(keys) => {
            let fields = Visitor::new(cx, &scope, Clause::GroupBy).projection(keys, "Key")?;
            let sql = fields.iter().map(|f| f.sql.as_str()).collect::<Vec<_>>().join(", ");
            scope.grouping = fields;
            Some(sql)
        }
        None => None,
    };

    let having_sql = match spec.having.iter().cloned().reduce(Expr::and) {
        Some(condition) => Some(Visitor::new(cx, &scope, Clause::Having).predicate(&condition)?),
        None => None,
    };

    let (select_list, columns) = project(cx, &scope, &spec.projection)?;

    let mut order = Vec::with_capacity(spec.order_by.len());
    for (key, descending) in &spec.order_by {
        let seg = Visitor::new(cx, &scope, Clause::OrderBy).value(key)?;
        let sql = cx.render(seg)?;
        order.push(if *descending { format!("{sql} DESC") } else { sql });
    }

    let paging = cx.provider().paging(spec.skip, spec.take, !order.is_empty())?;

    let mut sql = String::from("SELECT ");
    if spec.distinct {
        sql.push_str("DISTINCT ");
    }
    if let Some(top) = &paging.top {
        sql.push_str(top);
        sql.push(' ');
    }
    sql.push_str(&select_list);
    sql.push_str(" FROM ");
    sql.push_str(&from);
    if let Some(where_sql) = where_sql {
        sql.push_str(" WHERE ");
        sql.push_str(&where_sql);
    }
    if let Some(group_sql) = group_sql {
        sql.push_str(" GROUP BY ");
        sql.push_str(&group_sql);
    }
    if let Some(having_sql) = having_sql {
        sql.push_str(" HAVING ");
        sql.push_str(&having_sql);
    }
    if !order.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&order.join(", "));
    }
    if let Some(suffix) = &paging.suffix {
        sql.push(' ');
        sql.push_str(suffix);
    }
    Ok(CompiledSelect { sql, columns })
}

/// Render the select list and describe the columns it exposes.
fn project<'c>(
    cx: &mut StatementContext<'c>,
    scope: &Scope<'_, 'c>,
    projection: &Projection,
) -> Result<(String, Vec<DerivedColumn>)> {
    let fields: Vec<ProjectedField> = match projection {
        Projection::Fields(raw) => return Ok((raw.clone(), Vec::new())),
        Projection::Count => {
            let column = DerivedColumn {
                name: "Count".to_string(),
                ty: Some(SqlType::BigInt),
            };
            return Ok(("COUNT(*)".to_string(), vec![column]));
        }
        Projection::Default if !scope.grouping.is_empty() => scope.grouping.clone(),
        Projection::Default => {
            if matches!(&scope.tables[0].source, TableSource::Derived(columns) if columns.is_empty()) {
                return Ok(("*".to_string(), Vec::new()));
            }
            let first = TableRef { index: 0, depth: 0 };
            Visitor::new(cx, scope, Clause::Select).projection(&first.all(), "Value")?
        }
        Projection::Entity(index) => {
            let table = TableRef { index: *index, depth: 0 };
            Visitor::new(cx, scope, Clause::Select).projection(&table.all(), "Value")?
        }
        Projection::Expr(expr) => Visitor::new(cx, scope, Clause::Select).projection(expr, "Value")?,
    };
    let cx = &*cx;
    let list = fields.iter().map(|f| f.render(cx)).collect::<Vec<_>>().join(", ");
    Ok((list, fields.iter().map(ProjectedField::derived).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::fixtures::{compiler, date};
    use sqlweave_core::Value;

    fn sql_of(query: &Query<'_>) -> String {
        query.build_sql().unwrap().0
    }

    // ==================== Basics ====================

    #[test]
    fn test_default_projection_and_filter() {
        let c = compiler(Dialect::Postgres);
        let (sql, params) = c
            .from_entity("Order")
            .where_(|t| t[0].field("Status").eq(1))
            .build_sql()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT a.\"Id\", a.\"CustomerId\", a.\"Status\", a.\"Name\", a.\"is_paid\" AS \"IsPaid\", a.\"Total\" FROM \"orders\" a WHERE a.\"Status\" = @Status"
        );
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].value, Value::Int(1));
        assert_eq!(params[0].native_type, "integer");
    }

    #[test]
    fn test_two_table_join() {
        let c = compiler(Dialect::Postgres);
        let sql = sql_of(
            &c.from_entity("Order")
                .inner_join_entity("Customer", |t| t[0].field("CustomerId").eq(t[1].field("Id")))
                .where_(|t| t[0].field("Status").eq(1))
                .select(|t| Expr::object([("Id", t[0].field("Id")), ("Name", t[1].field("Name"))])),
        );
        assert_eq!(
            sql,
            "SELECT a.\"Id\", b.\"Name\" FROM \"orders\" a INNER JOIN \"customers\" b ON a.\"CustomerId\" = b.\"Id\" WHERE a.\"Status\" = @Status"
        );
    }

    #[test]
    fn test_multiple_filters_are_anded() {
        let c = compiler(Dialect::Sqlite);
        let sql = sql_of(
            &c.from_entity("Order")
                .where_(|t| t[0].field("Status").eq(1))
                .and_where(false, |t| t[0].field("Total").gt(0.0))
                .and_where(true, |t| t[0].field("Name").starts_with("A"))
                .select(|t| t[0].field("Id")),
        );
        assert_eq!(
            sql,
            "SELECT a.\"Id\" FROM \"orders\" a WHERE a.\"Status\" = :Status AND a.\"Name\" LIKE :Name"
        );
    }

    #[test]
    fn test_correlated_exists_keeps_outer_aliases() {
        let c = compiler(Dialect::Postgres);
        let sql = sql_of(
            &c.from_entity("Order")
                .where_(|t| {
                    Expr::exists(
                        Query::subquery_of("OrderLine")
                            .where_(|s| s[0].field("OrderId").eq(s.outer(0).field("Id")))
                            .select_count(),
                    )
                })
                .inner_join_entity("Customer", |t| t[0].field("CustomerId").eq(t[1].field("Id")))
                .select(|t| t[0].field("Id")),
        );
        assert_eq!(
            sql,
            "SELECT a.\"Id\" FROM \"orders\" a INNER JOIN \"customers\" b ON a.\"CustomerId\" = b.\"Id\" WHERE EXISTS (SELECT COUNT(*) FROM \"order_lines\" c WHERE c.\"OrderId\" = a.\"Id\")"
        );
    }

    #[test]
    fn test_scalar_subquery_in_projection() {
        let c = compiler(Dialect::Postgres);
        let sql = sql_of(&c.from_entity("Customer").select(|t| {
            Expr::object([
                ("Id", t[0].field("Id")),
                (
                    "Orders",
                    Expr::subquery(
                        Query::subquery_of("Order")
                            .where_(|s| s[0].field("CustomerId").eq(s.outer(0).field("Id")))
                            .select_count(),
                    ),
                ),
            ])
        }));
        assert_eq!(
            sql,
            "SELECT a.\"Id\", (SELECT COUNT(*) FROM \"orders\" b WHERE b.\"CustomerId\" = a.\"Id\") AS \"Orders\" FROM \"customers\" a"
        );
    }

    // ==================== Grouping ====================

    #[test]
    fn test_group_by_having() {
        let c = compiler(Dialect::Postgres);
        let sql = sql_of(
            &c.from_entity("Order")
                .group_by(|t| t[0].field("CustomerId"))
                .having(|_| Expr::count().gt(2))
                .select(|t| {
                    Expr::object([("CustomerId", t.grouping().member("Key")), ("Orders", Expr::count())])
                })
                .order_by_descending(|_| Expr::count()),
        );
        assert_eq!(
            sql,
            "SELECT a.\"CustomerId\", COUNT(*) AS \"Orders\" FROM \"orders\" a GROUP BY a.\"CustomerId\" HAVING COUNT(*) > @p ORDER BY COUNT(*) DESC"
        );
    }

    #[test]
    fn test_default_projection_of_grouping() {
        let c = compiler(Dialect::Postgres);
        let sql = sql_of(&c.from_entity("Order").group_by(|t| {
            Expr::object([("Customer", t[0].field("CustomerId")), ("Status", t[0].field("Status"))])
        }));
        assert_eq!(
            sql,
            "SELECT a.\"CustomerId\" AS \"Customer\", a.\"Status\" FROM \"orders\" a GROUP BY a.\"CustomerId\", a.\"Status\""
        );
    }

    #[test]
    fn test_aggregate_in_join_predicate_rejected() {
        let c = compiler(Dialect::Postgres);
        let err = c
            .from_entity("Order")
            .inner_join_entity("Customer", |t| Expr::count().gt(t[1].field("Id")))
            .build_sql()
            .unwrap_err();
        assert!(err.is_unsupported());
    }

    // ==================== Paging ====================

    #[test]
    fn test_paging_per_dialect() {
        let pg = compiler(Dialect::Postgres);
        let sql = sql_of(&pg.from_entity("Order").select(|t| t[0].field("Id")).order_by(|t| t[0].field("Id")).page(3, 10));
        assert!(sql.ends_with("ORDER BY a.\"Id\" LIMIT 10 OFFSET 20"), "{sql}");

        let my = compiler(Dialect::Mysql);
        let sql = sql_of(&my.from_entity("Order").select(|t| t[0].field("Id")).skip(5).take(10));
        assert!(sql.ends_with("FROM `orders` a LIMIT 5, 10"), "{sql}");

        let ms = compiler(Dialect::SqlServer);
        let sql = sql_of(&ms.from_entity("Order").select(|t| t[0].field("Id")).distinct().take(5));
        assert_eq!(sql, "SELECT DISTINCT TOP (5) a.[Id] FROM [orders] a");
        let err = ms.from_entity("Order").skip(5).build_sql().unwrap_err();
        assert!(err.is_dialect_mismatch());
    }

    // ==================== Set operations ====================

    #[test]
    fn test_union_all_emitted_directly() {
        let c = compiler(Dialect::Postgres);
        let sql = sql_of(
            &c.from_entity("Order")
                .where_(|t| t[0].field("Status").eq(1))
                .select(|t| t[0].field("Id"))
                .union_all(Query::subquery_of("Order").where_(|t| t[0].field("Status").eq(2)).select(|t| t[0].field("Id")))
                .union(Query::subquery_of("Customer").select(|t| t[0].field("Id"))),
        );
        assert_eq!(
            sql,
            "SELECT a.\"Id\" FROM \"orders\" a WHERE a.\"Status\" = @Status UNION ALL SELECT b.\"Id\" FROM \"orders\" b WHERE b.\"Status\" = @Status_1 UNION SELECT c.\"Id\" FROM \"customers\" c"
        );
    }

    #[test]
    fn test_union_then_order_wraps() {
        let c = compiler(Dialect::Sqlite);
        let sql = sql_of(
            &c.from_entity("Order")
                .select(|t| t[0].field("Name"))
                .union(Query::subquery_of("Customer").select(|t| t[0].field("Name")))
                .order_by(|t| t[0].field("Name")),
        );
        assert_eq!(
            sql,
            "SELECT a.\"Name\" FROM (SELECT b.\"Name\" FROM \"orders\" b UNION SELECT c.\"Name\" FROM \"customers\" c) a ORDER BY a.\"Name\""
        );
    }

    #[test]
    fn test_ordered_member_is_wrapped() {
        let c = compiler(Dialect::Sqlite);
        let sql = sql_of(
            &c.from_entity("Order")
                .select(|t| t[0].field("Id"))
                .union_all(Query::subquery_of("Order").select(|t| t[0].field("Id")).order_by(|t| t[0].field("Id")).take(1)),
        );
        assert_eq!(
            sql,
            "SELECT a.\"Id\" FROM \"orders\" a UNION ALL SELECT * FROM (SELECT b.\"Id\" FROM \"orders\" b ORDER BY b.\"Id\" LIMIT 1) c"
        );
    }

    // ==================== Derived tables & CTEs ====================

    #[test]
    fn test_from_subquery() {
        let c = compiler(Dialect::Postgres);
        let inner = Query::subquery_of("Order")
            .where_(|t| t[0].field("IsPaid"))
            .select(|t| Expr::object([("Buyer", t[0].field("CustomerId")), ("Amount", t[0].field("Total"))]));
        let sql = sql_of(&c.from_query(inner).where_(|t| t[0].field("Amount").gt(100.0)));
        assert_eq!(
            sql,
            "SELECT a.\"Buyer\", a.\"Amount\" FROM (SELECT b.\"CustomerId\" AS \"Buyer\", b.\"Total\" AS \"Amount\" FROM \"orders\" b WHERE b.\"is_paid\" = TRUE) a WHERE a.\"Amount\" > @Amount"
        );
        let err = c
            .from_query(Query::subquery_of("Order").select(|t| t[0].field("Id")))
            .where_(|t| t[0].field("Total").gt(1))
            .build_sql()
            .unwrap_err();
        assert!(err.is_unresolved());
    }

    #[test]
    fn test_recursive_cte() {
        let c = compiler(Dialect::Postgres);
        let tree = Cte::recursive(
            "tree",
            Query::subquery_of("Category")
                .where_(|t| t[0].field("ParentId").is_null())
                .select(|t| Expr::object([("Id", t[0].field("Id")), ("ParentId", t[0].field("ParentId"))])),
            |me| {
                Query::subquery_of("Category")
                    .inner_join_cte(me, |t| t[0].field("ParentId").eq(t[1].field("Id")))
                    .select(|t| Expr::object([("Id", t[0].field("Id")), ("ParentId", t[0].field("ParentId"))]))
            },
        )
        .unwrap();
        let sql = sql_of(&c.from_cte(&tree).with_cte(tree.clone()).select(|t| t[0].field("Id")));
        assert_eq!(
            sql,
            "WITH RECURSIVE \"tree\" (\"Id\", \"ParentId\") AS (SELECT b.\"Id\", b.\"ParentId\" FROM \"categories\" b WHERE b.\"ParentId\" IS NULL UNION ALL SELECT c.\"Id\", c.\"ParentId\" FROM \"categories\" c INNER JOIN \"tree\" d ON c.\"ParentId\" = d.\"Id\") SELECT a.\"Id\" FROM \"tree\" a"
        );

        let ms = compiler(Dialect::SqlServer);
        let sql = sql_of(&ms.from_cte(&tree).with_cte(tree.clone()).select(|t| t[0].field("Id")));
        assert!(sql.starts_with("WITH [tree] ([Id], [ParentId]) AS ("), "{sql}");
    }

    #[test]
    fn test_undeclared_cte() {
        let c = compiler(Dialect::Postgres);
        let cte = Cte::new("recent", Query::subquery_of("Order")).unwrap();
        let err = c.from_cte(&cte).build_sql().unwrap_err();
        assert!(err.is_unresolved());
    }

    // ==================== Sharding ====================

    #[test]
    fn test_sharded_range_reads_as_union() {
        let c = compiler(Dialect::Postgres);
        let query = c
            .from_entity("Log")
            .use_shard(ShardKey::range(date(2024, 1, 5), date(2024, 2, 5)))
            .where_(|t| t[0].field("Message").contains("boom"))
            .select(|t| t[0].field("Id"));
        assert_eq!(
            sql_of(&query),
            "SELECT a.\"Id\" FROM (SELECT * FROM \"log_202401\" UNION ALL SELECT * FROM \"log_202402\") a WHERE a.\"Message\" LIKE @Message"
        );
        let per_shard = query.build_per_shard().unwrap();
        assert_eq!(per_shard.len(), 2);
        assert_eq!(
            per_shard[1].sql,
            "SELECT a.\"Id\" FROM \"log_202402\" a WHERE a.\"Message\" LIKE @Message"
        );
    }

    #[test]
    fn test_sharded_without_key() {
        let c = compiler(Dialect::Postgres);
        assert!(c.from_entity("Log").build_sql().unwrap_err().is_ambiguous_shard());
        let err = c
            .from_entity("Order")
            .use_shard(ShardKey::value(1))
            .build_sql()
            .unwrap_err();
        assert!(!err.is_ambiguous_shard());
    }

    // ==================== Limits & determinism ====================

    #[test]
    fn test_table_limit() {
        let c = compiler(Dialect::Postgres);
        let mut query = c.from_entity("Order");
        for _ in 0..15 {
            query = query.left_join_entity("Customer", |t| t[0].field("CustomerId").eq(t[t.len() - 1].field("Id")));
        }
        assert!(query.build_sql().is_ok());
        let query = query.left_join_entity("Customer", |t| t[0].field("CustomerId").eq(t[16].field("Id")));
        assert!(query.build_sql().unwrap_err().is_unsupported());
    }

    #[test]
    fn test_build_is_deterministic() {
        let c = compiler(Dialect::SqlServer);
        let query = c
            .from_entity("Order")
            .where_(|t| t[0].field("Name").contains("x").or(t[0].field("Status").in_list(vec![1, 2])))
            .order_by(|t| t[0].field("Id"))
            .skip(10)
            .take(10);
        assert_eq!(query.build().unwrap(), query.build().unwrap());
        assert_eq!(query.fingerprint().unwrap(), query.fingerprint().unwrap());
    }

    #[test]
    fn test_detached_query_cannot_build() {
        assert!(Query::subquery_of("Order").build_sql().is_err());
    }
}
