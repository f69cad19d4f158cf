//! sqlweave - typed query specifications compiled into parameterized SQL.
//!
//! Statements are described with closures over an ordered table list and
//! compiled into SQL text plus named parameters for PostgreSQL, MySQL, SQLite
//! or SQL Server. Nothing is executed; hand the output to your driver.
//!
//! - Fluent `Query`, `Create`, `Update` and `Delete` builders
//! - Sharded tables resolved from key values or date ranges
//! - Multi-statement batches with collision-free parameter names
//! - A fingerprint-keyed statement cache
//!
//! # Quick Start
//!
//! ```ignore
//! use sqlweave::prelude::*;
//!
//! let registry = EntityMapRegistry::new()
//!     .with(EntityMap::new("Order", "orders")
//!         .column(ColumnMap::new("Id", SqlType::BigInt).key().identity())
//!         .column(ColumnMap::new("Status", SqlType::Integer)))?
//!     .with(EntityMap::new("Customer", "customers")
//!         .column(ColumnMap::new("Id", SqlType::BigInt).key())
//!         .column(ColumnMap::new("Name", SqlType::Text)))?;
//! let compiler = SqlCompiler::new(Dialect::Postgres, registry);
//!
//! let (sql, params) = compiler
//!     .from_entity("Order")
//!     .inner_join_entity("Customer", |t| t[0].field("Id").eq(t[1].field("Id")))
//!     .where_(|t| t[0].field("Status").eq(1))
//!     .select(|t| Expr::object([("Id", t[0].field("Id")), ("Name", t[1].field("Name"))]))
//!     .build_sql()?;
//! // SELECT a."Id", b."Name" FROM "orders" a INNER JOIN "customers" b
//! //     ON a."Id" = b."Id" WHERE a."Status" = @Status
//! ```
//!
//! # Crates
//!
//! - `sqlweave-core`: values, SQL types, entity maps and errors
//! - `sqlweave-query`: dialects, the expression visitor and the builders

pub use sqlweave_core::{
    ColumnMap, CompileError, CompileErrorKind, ConfigError, Entity, EntityMap, EntityMapProvider,
    EntityMapRegistry, Error, Result, ShardGranularity, ShardRule, ShardingDescriptor, SqlType,
    TypeError, Value, quote_ident, validate_identifier,
};

pub use sqlweave_query::{
    BinaryOp, CachedStatement, CompileOptions, CompiledStatement, CompilerConfig, Create, Cte,
    CteRef, Delete, Dialect, DialectProvider, Expr, FormatterRegistry, IdentityReturn,
    JoinType, MultipleCommand, MultipleCommandBatch, MultipleQuery, MySqlDialect, Owner, Paging,
    ParameterEntry, PostgresDialect, Query, QuerySpec, ResultShape, SetOpType, ShardKey,
    ShardingResolver, SqlCompiler, SqlServerDialect, SqliteDialect, Statement, StatementCache,
    TableRef, Tables, UnaryOp, Update, UpdateJoinStyle, cache_key, provider_for,
};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use sqlweave::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Metadata
        ColumnMap,
        // Output
        CompiledStatement,
        CompilerConfig,
        Cte,
        Dialect,
        Entity,
        EntityMap,
        EntityMapRegistry,
        Error,
        // Expressions
        Expr,
        ParameterEntry,
        // Builders
        Query,
        Result,
        ResultShape,
        ShardKey,
        SqlCompiler,
        SqlType,
        Statement,
        StatementCache,
        Tables,
        Value,
    };
}
