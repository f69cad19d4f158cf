//! Expression-to-SQL compiler for sqlweave.
//!
//! `sqlweave-query` is the **compilation layer**. It turns captured expression
//! trees and builder calls into SQL text plus an ordered list of named
//! parameters for one of four dialects.
//!
//! # Role In The Architecture
//!
//! - **Expression AST**: `Expr`, `Tables` and `TableRef` capture predicates,
//!   projections and assignments.
//! - **Dialects**: `DialectProvider` supplies quoting, markers, paging and the
//!   formatter registries for PostgreSQL, SQLite, MySQL and SQL Server.
//! - **Builders**: `Query`, `Create`, `Update` and `Delete` borrow a
//!   `SqlCompiler` and render on `build_sql()`.
//! - **Sharding**: `ShardingResolver` maps shard keys to physical tables.
//! - **Batches**: `MultipleQuery` compiles several statements into one command.
//!
//! Nothing here performs I/O; executing the SQL is the caller's business.
//! Most users access these types via the `sqlweave` facade crate.

pub mod ast;
pub mod batch;
pub mod cache;
pub mod compiler;
pub mod context;
pub mod create;
pub mod cte;
pub mod delete;
pub mod dialect;
mod fold;
pub mod options;
pub mod query;
pub mod scope;
pub mod segment;
pub mod sharding;
pub mod update;
mod visitor;

#[cfg(test)]
pub(crate) mod fixtures;

pub use ast::{BinaryOp, Expr, Owner, TableRef, Tables, UnaryOp};
pub use batch::{MultipleCommand, MultipleCommandBatch, MultipleQuery, ResultShape, Statement};
pub use cache::{CachedStatement, StatementCache, cache_key};
pub use compiler::{CompilerConfig, SqlCompiler};
pub use context::{CompiledStatement, ParameterEntry, StatementContext};
pub use create::Create;
pub use cte::{Cte, CteRef};
pub use delete::Delete;
pub use dialect::{
    Dialect, DialectProvider, FormatterRegistry, IdentityReturn, MySqlDialect, Paging,
    PostgresDialect, SqlServerDialect, SqliteDialect, UpdateJoinStyle, provider_for,
};
pub use options::CompileOptions;
pub use query::{Query, QuerySpec, SetOpType};
pub use scope::{DerivedColumn, JoinType};
pub use segment::SqlSegment;
pub use sharding::{ShardKey, ShardingResolver};
pub use update::Update;
