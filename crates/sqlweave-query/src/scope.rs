//! Table scopes for one SELECT level.
//!
//! A [`Scope`] lists the [`TableSegment`]s declared by one statement level in
//! declaration order, plus the grouping keys once GROUP BY has been compiled.
//! Correlated sub-queries see their enclosing statements through `parent`.

use sqlweave_core::{EntityMap, Error, Result, SqlType};

use crate::context::StatementContext;

/// Join kinds supported by the builders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

impl JoinType {
    pub const fn as_str(self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
        }
    }
}

/// Output column of a derived table or CTE.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedColumn {
    pub name: String,
    pub ty: Option<SqlType>,
}

#[derive(Debug, Clone)]
pub(crate) enum TableSource<'c> {
    Entity(&'c EntityMap),
    /// Sub-query, set operation or CTE reference; columns by projected name
    Derived(Vec<DerivedColumn>),
}

/// One table reference in a FROM/JOIN list.
#[derive(Debug, Clone)]
pub(crate) struct TableSegment<'c> {
    pub alias: String,
    pub source: TableSource<'c>,
    /// Rendered FROM item without its alias: quoted table, `(SELECT …)` or CTE name
    pub source_sql: String,
    pub join: Option<JoinType>,
}

impl<'c> TableSegment<'c> {
    pub fn entity(&self) -> Option<&'c EntityMap> {
        match self.source {
            TableSource::Entity(map) => Some(map),
            TableSource::Derived(_) => None,
        }
    }

    pub fn describe(&self) -> String {
        match &self.source {
            TableSource::Entity(map) => format!("{} ({})", map.entity, self.alias),
            TableSource::Derived(_) => format!("derived table {}", self.alias),
        }
    }
}

/// A compiled SELECT-list entry or grouping key.
#[derive(Debug, Clone)]
pub(crate) struct ProjectedField {
    /// Name the value is exposed under
    pub target: String,
    /// Physical column name when the value is a bare column reference
    pub natural: Option<String>,
    pub sql: String,
    pub precedence: u8,
    pub ty: Option<SqlType>,
    pub is_aggregate: bool,
}

impl ProjectedField {
    /// `expr` or `expr AS "target"` when the exposed name differs from the column.
    pub fn render(&self, cx: &StatementContext<'_>) -> String {
        if self.natural.as_deref() == Some(self.target.as_str()) {
            self.sql.clone()
        } else {
            format!("{} AS {}", self.sql, cx.quote(&self.target))
        }
    }

    pub fn derived(&self) -> DerivedColumn {
        DerivedColumn {
            name: self.target.clone(),
            ty: self.ty.clone(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Scope<'p, 'c> {
    pub tables: Vec<TableSegment<'c>>,
    pub grouping: Vec<ProjectedField>,
    pub parent: Option<&'p Scope<'p, 'c>>,
    /// Qualify columns with their alias; single-table UPDATE/DELETE emit bare names
    pub qualify: bool,
}

impl<'p, 'c> Scope<'p, 'c> {
    pub fn new(tables: Vec<TableSegment<'c>>, parent: Option<&'p Scope<'p, 'c>>) -> Self {
        Self {
            tables,
            grouping: Vec::new(),
            parent,
            qualify: true,
        }
    }

    /// Scope `depth` levels out.
    pub fn at_depth(&self, depth: usize) -> Result<&Scope<'p, 'c>> {
        let mut scope = self;
        for _ in 0..depth {
            scope = scope.parent.ok_or_else(|| {
                Error::unresolved(format!("no enclosing statement {depth} level(s) out"))
            })?;
        }
        Ok(scope)
    }

    pub fn table(&self, index: usize) -> Result<&TableSegment<'c>> {
        self.tables.get(index).ok_or_else(|| {
            Error::unresolved(format!(
                "table index {index} is out of range; {} table(s) declared",
                self.tables.len()
            ))
        })
    }

    /// Grouping key by exposed name; a single key also answers to `Key`.
    pub fn grouping_key(&self, name: &str) -> Result<&ProjectedField> {
        if self.grouping.is_empty() {
            return Err(Error::unresolved(format!(
                "grouping key `{name}` used without GROUP BY"
            )));
        }
        if let Some(field) = self.grouping.iter().find(|f| f.target == name) {
            return Ok(field);
        }
        match self.grouping.as_slice() {
            [only] if name == "Key" => Ok(only),
            _ => Err(Error::unresolved(format!("no grouping key named `{name}`"))),
        }
    }
}
