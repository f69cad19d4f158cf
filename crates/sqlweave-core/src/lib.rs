//! Core types for sqlweave.
//!
//! This crate provides the vocabulary shared by the compiler and its callers:
//!
//! - `Value` for captured constants and bound parameters
//! - `SqlType` for logical column types
//! - `EntityMap`/`ColumnMap`/`ShardingDescriptor` entity metadata
//! - `EntityMapProvider` and the in-memory `EntityMapRegistry`
//! - the `Error` taxonomy raised while building statements

pub mod entity;
pub mod error;
pub mod identifiers;
pub mod provider;
pub mod types;
pub mod value;

pub use entity::{
    ColumnMap, Entity, EntityMap, ShardGranularity, ShardRule, ShardingDescriptor,
};
pub use error::{CompileError, CompileErrorKind, ConfigError, Error, Result, TypeError};
pub use identifiers::{
    is_plain_identifier, quote_ident, quote_ident_mssql, quote_ident_mysql, validate_identifier,
};
pub use provider::{EntityMapProvider, EntityMapRegistry};
pub use types::SqlType;
pub use value::Value;
