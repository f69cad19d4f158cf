//! Entity mapping metadata.
//!
//! An [`EntityMap`] describes how one logical entity maps onto a table: the
//! ordered column list with key/identity flags and an optional sharding
//! descriptor. Maps are immutable once registered with a provider.

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::error::Error;
use crate::types::SqlType;
use crate::value::Value;

/// Types whose values can be written through the Create/Update builders.
///
/// `to_row` returns member names paired with their current values; member
/// names are resolved against the entity map registered under [`Entity::ENTITY`].
pub trait Entity {
    /// Entity name the map is registered under.
    const ENTITY: &'static str;

    /// Member/value pairs in declaration order.
    fn to_row(&self) -> Vec<(&'static str, Value)>;
}

/// Metadata about one mapped column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMap {
    /// Member name used in expressions
    pub member: String,
    /// Database column name; empty means "same as member"
    #[serde(default)]
    pub column: String,
    pub db_type: SqlType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub is_key: bool,
    /// Database-generated value, never inserted
    #[serde(default)]
    pub is_identity: bool,
}

impl ColumnMap {
    pub fn new(member: impl Into<String>, db_type: SqlType) -> Self {
        let member = member.into();
        Self {
            column: member.clone(),
            member,
            db_type,
            nullable: false,
            is_key: false,
            is_identity: false,
        }
    }

    /// Set the database column name.
    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.column = name.into();
        self
    }

    /// Mark as part of the primary key.
    pub fn key(mut self) -> Self {
        self.is_key = true;
        self
    }

    /// Mark as identity/auto-increment.
    pub fn identity(mut self) -> Self {
        self.is_identity = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Database column name, falling back to the member name.
    pub fn column_name(&self) -> &str {
        if self.column.is_empty() {
            &self.member
        } else {
            &self.column
        }
    }
}

/// Period covered by one date-sharded table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardGranularity {
    Year,
    Month,
    Day,
}

impl ShardGranularity {
    /// `chrono` format string for the table-name suffix.
    pub const fn suffix_format(self) -> &'static str {
        match self {
            ShardGranularity::Year => "%Y",
            ShardGranularity::Month => "%Y%m",
            ShardGranularity::Day => "%Y%m%d",
        }
    }
}

/// How physical table names are derived from dependency values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShardRule {
    /// `{table}_{v1}_{v2}…` from exact dependency values.
    Suffix,
    /// `{table}_{period}` from a single date dependency.
    Date { granularity: ShardGranularity },
    /// `{table}_{discriminator}_{period}`; dependencies are `[discriminator, date]`.
    DiscriminatedDate { granularity: ShardGranularity },
}

/// Sharding metadata attached to an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardingDescriptor {
    /// Member names whose values select the physical table
    pub dependencies: Vec<String>,
    pub rule: ShardRule,
    #[serde(default = "default_separator")]
    pub separator: String,
}

fn default_separator() -> String {
    "_".to_string()
}

impl ShardingDescriptor {
    /// Exact-match sharding on one or more members.
    pub fn suffix<I, S>(dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            dependencies: dependencies.into_iter().map(Into::into).collect(),
            rule: ShardRule::Suffix,
            separator: default_separator(),
        }
    }

    /// One table per period of `member`.
    pub fn by_date(member: impl Into<String>, granularity: ShardGranularity) -> Self {
        Self {
            dependencies: vec![member.into()],
            rule: ShardRule::Date { granularity },
            separator: default_separator(),
        }
    }

    /// One table per discriminator value and period.
    pub fn by_discriminated_date(
        discriminator: impl Into<String>,
        member: impl Into<String>,
        granularity: ShardGranularity,
    ) -> Self {
        Self {
            dependencies: vec![discriminator.into(), member.into()],
            rule: ShardRule::DiscriminatedDate { granularity },
            separator: default_separator(),
        }
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Fail unless the dependency count fits the rule: Suffix needs at least
    /// one, Date exactly one, DiscriminatedDate exactly two.
    pub fn check_arity(&self, entity: &str) -> Result<()> {
        let count = self.dependencies.len();
        let fits = match self.rule {
            ShardRule::Suffix => count > 0,
            ShardRule::Date { .. } => count == 1,
            ShardRule::DiscriminatedDate { .. } => count == 2,
        };
        if fits {
            Ok(())
        } else {
            Err(Error::config(format!(
                "entity `{entity}` has {count} shard dependencies, which does not fit rule {:?}",
                self.rule
            )))
        }
    }
}

/// Table mapping for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMap {
    pub entity: String,
    pub table: String,
    #[serde(default)]
    pub schema: Option<String>,
    pub columns: Vec<ColumnMap>,
    #[serde(default)]
    pub sharding: Option<ShardingDescriptor>,
}

impl EntityMap {
    pub fn new(entity: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            table: table.into(),
            schema: None,
            columns: Vec::new(),
            sharding: None,
        }
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Append a column; declaration order is preserved in generated SQL.
    pub fn column(mut self, column: ColumnMap) -> Self {
        self.columns.push(column);
        self
    }

    pub fn sharding(mut self, descriptor: ShardingDescriptor) -> Self {
        self.sharding = Some(descriptor);
        self
    }

    /// Look up a column by member name.
    pub fn column_by_member(&self, member: &str) -> Option<&ColumnMap> {
        self.columns.iter().find(|c| c.member == member)
    }

    /// Look up a column by member name, failing with an unresolved-member error.
    pub fn require_member(&self, member: &str) -> Result<&ColumnMap> {
        self.column_by_member(member).ok_or_else(|| {
            Error::unresolved(format!(
                "member `{}` is not mapped on entity `{}`",
                member, self.entity
            ))
        })
    }

    pub fn key_columns(&self) -> impl Iterator<Item = &ColumnMap> {
        self.columns.iter().filter(|c| c.is_key)
    }

    pub fn identity_column(&self) -> Option<&ColumnMap> {
        self.columns.iter().find(|c| c.is_identity)
    }

    pub fn is_sharded(&self) -> bool {
        self.sharding.is_some()
    }

    /// Check internal consistency: unique members, known shard dependencies.
    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(Error::config(format!(
                "entity `{}` has no mapped columns",
                self.entity
            )));
        }
        for (i, col) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|c| c.member == col.member) {
                return Err(Error::config(format!(
                    "entity `{}` maps member `{}` twice",
                    self.entity, col.member
                )));
            }
        }
        if let Some(sharding) = &self.sharding {
            sharding.check_arity(&self.entity)?;
            for dep in &sharding.dependencies {
                if self.column_by_member(dep).is_none() {
                    return Err(Error::config(format!(
                        "shard dependency `{}` is not a mapped member of `{}`",
                        dep, self.entity
                    )));
                }
            }
        }
        Ok(())
    }
}
