//! Multi-statement batches.
//!
//! A [`MultipleQuery`] compiles several builders into one command text.
//! Statement `i` binds its parameters under the namespace `m{i}` (split
//! inserts use `m{i}_{batch}`), so markers never collide across statements.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use sqlweave_core::{Error, Result};

use crate::compiler::SqlCompiler;
use crate::context::{CompiledStatement, ParameterEntry};
use crate::create::Create;
use crate::delete::Delete;
use crate::dialect::Dialect;
use crate::query::Query;
use crate::update::Update;

/// How the caller should read the result of one statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResultShape {
    /// Every row
    List,
    /// The first row, if any
    First,
    /// First column of the first row
    Scalar,
    /// Number of affected rows
    AffectedRows,
    /// Generated identity value
    Identity,
}

/// A builder that can take part in a batch or the statement cache.
pub trait Statement {
    /// Shape used when the statement is added without one.
    fn default_shape(&self) -> ResultShape;

    /// Dialect the builder was created for; `None` for detached builders.
    fn dialect(&self) -> Option<Dialect>;

    /// Key covering everything that affects the rendered text.
    fn fingerprint(&self) -> Result<u64>;

    /// Compile with parameter names suffixed by `namespace`.
    ///
    /// Most builders yield one statement; bulk inserts yield one per batch.
    fn compile_namespaced(&self, namespace: Option<&str>) -> Result<Vec<CompiledStatement>>;
}

impl Statement for Query<'_> {
    fn default_shape(&self) -> ResultShape {
        ResultShape::List
    }

    fn dialect(&self) -> Option<Dialect> {
        self.dialect_of()
    }

    fn fingerprint(&self) -> Result<u64> {
        Query::fingerprint(self)
    }

    fn compile_namespaced(&self, namespace: Option<&str>) -> Result<Vec<CompiledStatement>> {
        Ok(vec![self.compile(namespace)?])
    }
}

impl Statement for Create<'_> {
    fn default_shape(&self) -> ResultShape {
        if self.returns_identity() {
            ResultShape::Identity
        } else {
            ResultShape::AffectedRows
        }
    }

    fn dialect(&self) -> Option<Dialect> {
        Some(self.compiler().dialect())
    }

    fn fingerprint(&self) -> Result<u64> {
        Ok(Create::fingerprint(self))
    }

    fn compile_namespaced(&self, namespace: Option<&str>) -> Result<Vec<CompiledStatement>> {
        self.compile(namespace)
    }
}

impl Statement for Update<'_> {
    fn default_shape(&self) -> ResultShape {
        ResultShape::AffectedRows
    }

    fn dialect(&self) -> Option<Dialect> {
        Some(self.compiler().dialect())
    }

    fn fingerprint(&self) -> Result<u64> {
        Ok(Update::fingerprint(self))
    }

    fn compile_namespaced(&self, namespace: Option<&str>) -> Result<Vec<CompiledStatement>> {
        Ok(vec![self.compile(namespace)?])
    }
}

impl Statement for Delete<'_> {
    fn default_shape(&self) -> ResultShape {
        ResultShape::AffectedRows
    }

    fn dialect(&self) -> Option<Dialect> {
        Some(self.compiler().dialect())
    }

    fn fingerprint(&self) -> Result<u64> {
        Ok(Delete::fingerprint(self))
    }

    fn compile_namespaced(&self, namespace: Option<&str>) -> Result<Vec<CompiledStatement>> {
        Ok(vec![self.compile(namespace)?])
    }
}

/// One statement of a compiled batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultipleCommand {
    pub sql: String,
    pub parameters: Vec<ParameterEntry>,
    pub shape: ResultShape,
}

/// Compiled batch: the joined command text plus each statement on its own.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultipleCommandBatch {
    pub sql: String,
    pub parameters: Vec<ParameterEntry>,
    /// One shape per statement, in order
    pub shapes: Vec<ResultShape>,
    pub commands: Vec<MultipleCommand>,
}

/// Batch of statements compiled into one command text.
///
/// # Example
///
/// ```ignore
/// let batch = compiler
///     .batch()
///     .list(compiler.from::<Order>().where_(|t| t[0].field("Status").eq(1)))
///     .scalar(compiler.from::<Order>().select_count())
///     .build()?;
/// assert_eq!(batch.shapes, vec![ResultShape::List, ResultShape::Scalar]);
/// ```
pub struct MultipleQuery<'s> {
    compiler: &'s SqlCompiler,
    entries: Vec<(Box<dyn Statement + 's>, ResultShape)>,
}

impl fmt::Debug for MultipleQuery<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultipleQuery")
            .field("dialect", &self.compiler.dialect())
            .field("shapes", &self.entries.iter().map(|(_, shape)| *shape).collect::<Vec<_>>())
            .finish()
    }
}

impl<'s> MultipleQuery<'s> {
    pub(crate) fn new(compiler: &'s SqlCompiler) -> Self {
        Self {
            compiler,
            entries: Vec::new(),
        }
    }

    /// Add a statement with its default shape.
    pub fn add(self, statement: impl Statement + 's) -> Self {
        let shape = statement.default_shape();
        self.add_as(statement, shape)
    }

    pub fn add_as(mut self, statement: impl Statement + 's, shape: ResultShape) -> Self {
        self.entries.push((Box::new(statement), shape));
        self
    }

    pub fn list(self, query: Query<'s>) -> Self {
        self.add_as(query, ResultShape::List)
    }

    pub fn first(self, query: Query<'s>) -> Self {
        self.add_as(query, ResultShape::First)
    }

    pub fn scalar(self, query: Query<'s>) -> Self {
        self.add_as(query, ResultShape::Scalar)
    }

    /// Add a write whose affected row count is read back.
    pub fn execute(self, statement: impl Statement + 's) -> Self {
        self.add_as(statement, ResultShape::AffectedRows)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compile every statement in insertion order.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn build(&self) -> Result<MultipleCommandBatch> {
        if self.entries.is_empty() {
            return Err(Error::empty_statement("batch has no statements"));
        }
        let dialect = self.compiler.dialect();
        let mut commands = Vec::new();
        let mut names = HashSet::new();
        for (index, (statement, shape)) in self.entries.iter().enumerate() {
            if let Some(other) = statement.dialect() {
                if other != dialect {
                    return Err(Error::dialect_mismatch(format!(
                        "statement {index} targets {} but the batch targets {}",
                        other.as_str(),
                        dialect.as_str()
                    )));
                }
            }
            let namespace = format!("m{index}");
            for compiled in statement.compile_namespaced(Some(&namespace))? {
                for parameter in &compiled.parameters {
                    if !names.insert(parameter.name.clone()) {
                        return Err(Error::config(format!(
                            "parameter `{}` appears in more than one batch statement",
                            parameter.name
                        )));
                    }
                }
                commands.push(MultipleCommand {
                    sql: compiled.sql,
                    parameters: compiled.parameters,
                    shape: *shape,
                });
            }
        }

        let separator = self.compiler.provider().statement_separator();
        let sql = commands
            .iter()
            .map(|c| c.sql.as_str())
            .collect::<Vec<_>>()
            .join(separator);
        let parameters: Vec<ParameterEntry> = commands.iter().flat_map(|c| c.parameters.iter().cloned()).collect();
        tracing::debug!(
            dialect = dialect.as_str(),
            statements = commands.len(),
            parameters = parameters.len(),
            "compiled batch"
        );
        Ok(MultipleCommandBatch {
            sql,
            parameters,
            shapes: commands.iter().map(|c| c.shape).collect(),
            commands,
        })
    }
}
