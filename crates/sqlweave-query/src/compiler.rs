//! Compiler root: dialect, entity maps and options shared by every builder.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlweave_core::{Entity, EntityMap, EntityMapProvider, EntityMapRegistry, Result};

use crate::batch::MultipleQuery;
use crate::context::StatementContext;
use crate::create::Create;
use crate::cte::CteRef;
use crate::delete::Delete;
use crate::dialect::{Dialect, DialectProvider, provider_for};
use crate::options::CompileOptions;
use crate::query::{Query, QuerySpec};
use crate::update::Update;

/// Entry point for building statements.
///
/// Builders borrow the compiler; it is immutable and can be shared across
/// threads behind an `Arc`.
///
/// # Example
///
/// ```ignore
/// let compiler = SqlCompiler::new(Dialect::Postgres, registry);
/// let (sql, params) = compiler
///     .from::<Order>()
///     .where_(|t| t[0].field("Status").eq(1))
///     .build_sql()?;
/// ```
#[derive(Clone)]
pub struct SqlCompiler {
    provider: Arc<dyn DialectProvider>,
    maps: Arc<dyn EntityMapProvider>,
    options: CompileOptions,
}

impl fmt::Debug for SqlCompiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlCompiler")
            .field("dialect", &self.provider.dialect())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl SqlCompiler {
    /// Compiler for a built-in dialect with default options.
    pub fn new(dialect: Dialect, maps: impl EntityMapProvider + 'static) -> Self {
        Self::with_provider(provider_for(dialect), Arc::new(maps))
    }

    /// Compiler over a custom dialect provider or a shared entity map provider.
    pub fn with_provider(provider: Arc<dyn DialectProvider>, maps: Arc<dyn EntityMapProvider>) -> Self {
        Self {
            provider,
            maps,
            options: CompileOptions::default(),
        }
    }

    /// Replace the options after validating them.
    pub fn with_options(mut self, options: CompileOptions) -> Result<Self> {
        options.validate()?;
        self.options = options;
        Ok(self)
    }

    pub fn from_config(config: CompilerConfig) -> Result<Self> {
        let registry = EntityMapRegistry::from_maps(config.entities)?;
        tracing::debug!(
            dialect = config.dialect.as_str(),
            entities = registry.len(),
            "configured compiler"
        );
        Self::new(config.dialect, registry).with_options(config.options)
    }

    pub fn dialect(&self) -> Dialect {
        self.provider.dialect()
    }

    pub fn provider(&self) -> &dyn DialectProvider {
        self.provider.as_ref()
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn entity(&self, name: &str) -> Result<&EntityMap> {
        self.maps.require(name)
    }

    /// Fresh context for one physical statement.
    pub(crate) fn context(&self, namespace: Option<&str>) -> StatementContext<'_> {
        StatementContext::new(self.provider.as_ref(), self.maps.as_ref(), &self.options).with_namespace(namespace)
    }

    // ==================== Queries ====================

    pub fn from<E: Entity>(&self) -> Query<'_> {
        Query::from_entity(self, E::ENTITY)
    }

    pub fn from_entity(&self, entity: impl Into<String>) -> Query<'_> {
        Query::from_entity(self, entity)
    }

    /// Query over a derived table.
    pub fn from_query(&self, query: impl Into<QuerySpec>) -> Query<'_> {
        Query::from_query(self, query.into())
    }

    /// Query over a CTE; attach the CTE itself with `Query::with_cte`.
    pub fn from_cte(&self, cte: impl Into<CteRef>) -> Query<'_> {
        Query::from_cte(self, cte.into())
    }

    // ==================== Writes ====================

    pub fn create<E: Entity>(&self) -> Create<'_> {
        Create::new(self, E::ENTITY)
    }

    pub fn create_entity(&self, entity: impl Into<String>) -> Create<'_> {
        Create::new(self, entity)
    }

    pub fn update<E: Entity>(&self) -> Update<'_> {
        Update::new(self, E::ENTITY)
    }

    pub fn update_entity(&self, entity: impl Into<String>) -> Update<'_> {
        Update::new(self, entity)
    }

    pub fn delete<E: Entity>(&self) -> Delete<'_> {
        Delete::new(self, E::ENTITY)
    }

    pub fn delete_entity(&self, entity: impl Into<String>) -> Delete<'_> {
        Delete::new(self, entity)
    }

    /// Empty multi-statement batch.
    pub fn batch(&self) -> MultipleQuery<'_> {
        MultipleQuery::new(self)
    }
}

/// Serializable compiler setup.
///
/// ```json
/// {
///   "dialect": "sqlserver",
///   "options": { "parameterized": true, "batch_size": 200 },
///   "entities": [ { "entity": "Order", "table": "orders", "columns": [ … ] } ]
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompilerConfig {
    pub dialect: Dialect,
    #[serde(default)]
    pub options: CompileOptions,
    #[serde(default)]
    pub entities: Vec<EntityMap>,
}

impl CompilerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn into_compiler(self) -> Result<SqlCompiler> {
        SqlCompiler::from_config(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "dialect": "sqlite",
        "options": { "batch_size": 2, "alias_start": "m" },
        "entities": [
            {
                "entity": "Order",
                "table": "orders",
                "columns": [
                    { "member": "Id", "db_type": "big_int", "is_key": true, "is_identity": true },
                    { "member": "Status", "db_type": "integer" }
                ]
            }
        ]
    }"#;

    #[test]
    fn test_from_json_config() {
        let compiler = CompilerConfig::from_json(CONFIG).unwrap().into_compiler().unwrap();
        assert_eq!(compiler.dialect(), Dialect::Sqlite);
        assert_eq!(compiler.options().batch_size, 2);
        assert!(compiler.options().parameterized);
        let (sql, _) = compiler
            .from_entity("Order")
            .where_(|t| t[0].field("Status").eq(3))
            .build_sql()
            .unwrap();
        assert_eq!(sql, "SELECT m.\"Id\", m.\"Status\" FROM \"orders\" m WHERE m.\"Status\" = :Status");
    }

    #[test]
    fn test_invalid_options_rejected() {
        let compiler = SqlCompiler::new(Dialect::Postgres, EntityMapRegistry::new());
        assert!(compiler.with_options(CompileOptions::default().batch_size(0)).is_err());
        assert!(CompilerConfig::from_json("{\"dialect\": \"oracle\"}").is_err());
    }

    #[test]
    fn test_unknown_entity() {
        let compiler = SqlCompiler::new(Dialect::Postgres, EntityMapRegistry::new());
        assert!(compiler.entity("Nope").is_err());
        assert!(compiler.from_entity("Nope").build_sql().is_err());
        assert!(format!("{compiler:?}").contains("Postgres"));
    }
}
