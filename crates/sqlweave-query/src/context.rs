//! Per-statement compilation state.
//!
//! A [`StatementContext`] owns the alias counter and the growing parameter
//! list of exactly one physical statement. Nested sub-queries and CTEs share
//! the context of the statement they are spliced into, so aliases and
//! parameter names stay unique across the whole text.

use std::collections::HashSet;

use serde::Serialize;
use sqlweave_core::{Error, EntityMap, EntityMapProvider, Result, SqlType, Value};

use crate::ast::Owner;
use crate::dialect::{Dialect, DialectProvider, MemberFormatter, MethodEntry};
use crate::options::CompileOptions;
use crate::scope::DerivedColumn;
use crate::segment::SqlSegment;

/// One bound parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterEntry {
    /// Marker text including the dialect prefix, e.g. `@Status`
    pub name: String,
    pub value: Value,
    /// Provider type tag, e.g. `integer`, `NVARCHAR(50)`
    pub native_type: String,
}

/// Finished SQL text and its parameters in emission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledStatement {
    pub sql: String,
    pub parameters: Vec<ParameterEntry>,
}

impl CompiledStatement {
    pub fn parameter(&self, name: &str) -> Option<&ParameterEntry> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn into_parts(self) -> (String, Vec<ParameterEntry>) {
        (self.sql, self.parameters)
    }
}

/// Exclusive state for building one physical statement.
pub struct StatementContext<'c> {
    provider: &'c dyn DialectProvider,
    maps: &'c dyn EntityMapProvider,
    options: &'c CompileOptions,
    parameters: Vec<ParameterEntry>,
    names: HashSet<String>,
    aliases: usize,
    row: Option<usize>,
    namespace: Option<String>,
    ctes: Vec<(String, Vec<DerivedColumn>)>,
}

impl<'c> StatementContext<'c> {
    pub fn new(
        provider: &'c dyn DialectProvider,
        maps: &'c dyn EntityMapProvider,
        options: &'c CompileOptions,
    ) -> Self {
        Self {
            provider,
            maps,
            options,
            parameters: Vec::new(),
            names: HashSet::new(),
            aliases: 0,
            row: None,
            namespace: None,
            ctes: Vec::new(),
        }
    }

    /// Suffix every parameter name with `_{namespace}`.
    #[must_use]
    pub fn with_namespace(mut self, namespace: Option<&str>) -> Self {
        self.namespace = namespace.map(str::to_string);
        self
    }

    pub fn provider(&self) -> &'c dyn DialectProvider {
        self.provider
    }

    pub fn dialect(&self) -> Dialect {
        self.provider.dialect()
    }

    pub fn options(&self) -> &'c CompileOptions {
        self.options
    }

    pub fn entity(&self, name: &str) -> Result<&'c EntityMap> {
        let maps = self.maps;
        maps.require(name)
    }

    pub fn parameters(&self) -> &[ParameterEntry] {
        &self.parameters
    }

    /// Next table alias: `a`, `b`, … from the configured start letter, then `t26`, `t27`, …
    pub fn next_alias(&mut self) -> String {
        let start = (self.options.alias_start as usize).saturating_sub('a' as usize);
        let index = start + self.aliases;
        self.aliases += 1;
        if index < 26 {
            // index < 26 fits in u8
            char::from(b'a' + index as u8).to_string()
        } else {
            format!("t{index}")
        }
    }

    /// Make a CTE name visible to the rest of the statement.
    pub(crate) fn define_cte(&mut self, name: &str, columns: Vec<DerivedColumn>) -> Result<()> {
        if self.cte(name).is_some() {
            return Err(Error::config(format!("CTE `{name}` is defined twice")));
        }
        self.ctes.push((name.to_string(), columns));
        Ok(())
    }

    pub(crate) fn cte(&self, name: &str) -> Option<&[DerivedColumn]> {
        self.ctes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, columns)| columns.as_slice())
    }

    /// Row number appended to parameter names while rendering one row of a bulk write.
    pub fn set_row(&mut self, row: Option<usize>) {
        self.row = row;
    }

    /// Register a parameter and return its marker.
    pub fn add_parameter(&mut self, hint: Option<&str>, value: Value, ty: Option<&SqlType>) -> String {
        let mut base: String = hint
            .unwrap_or_default()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if base.is_empty() {
            base.push('p');
        }
        if let Some(row) = self.row {
            base.push_str(&row.to_string());
        }
        if let Some(namespace) = &self.namespace {
            base.push('_');
            base.push_str(namespace);
        }

        let mut name = format!("{}{}", self.provider.parameter_prefix(), base);
        let mut n = 1;
        while self.names.contains(&name) {
            name = format!("{}{}_{}", self.provider.parameter_prefix(), base, n);
            n += 1;
        }

        let native_type = match ty {
            Some(ty) => self.provider.native_type(ty),
            None => self.provider.native_type_of_value(&value),
        };
        tracing::trace!(name = %name, native_type = %native_type, "bound parameter");
        self.names.insert(name.clone());
        self.parameters.push(ParameterEntry {
            name: name.clone(),
            value,
            native_type,
        });
        name
    }

    /// Marker or inline literal for a value.
    pub fn render_value(&mut self, hint: Option<&str>, value: Value, ty: Option<&SqlType>) -> Result<String> {
        match value {
            Value::Null => Ok("NULL".to_string()),
            Value::Default => Ok("DEFAULT".to_string()),
            Value::Array(_) => Err(Error::unsupported(
                "collection values can only be used with IN / Contains",
            )),
            value if self.options.parameterized => Ok(self.add_parameter(hint, value, ty)),
            value => self.provider.literal(&value),
        }
    }

    /// Materialize a segment into SQL text, binding constants and resolving
    /// any pending call as non-negated.
    pub fn render(&mut self, mut seg: SqlSegment) -> Result<String> {
        if let Some(pending) = seg.pending.take() {
            let resolved = (pending.formatter)(self, pending.operands)?;
            return self.render(resolved);
        }
        match seg.value.take() {
            Some(value) => self.render_value(seg.member.as_deref(), value, seg.ty.as_ref()),
            None => Ok(seg.sql),
        }
    }

    /// Render `seg` as an operand of an operator with precedence `min`.
    ///
    /// `strict` also parenthesizes operands of equal precedence (right side
    /// of non-associative operators).
    pub fn render_operand(&mut self, seg: SqlSegment, min: u8, strict: bool) -> Result<String> {
        let precedence = seg.precedence;
        let sql = self.render(seg)?;
        if precedence < min || (strict && precedence == min) {
            Ok(format!("({sql})"))
        } else {
            Ok(sql)
        }
    }

    pub fn quote(&self, identifier: &str) -> String {
        self.provider.quote_identifier(identifier)
    }

    /// Method formatter for the active dialect.
    ///
    /// A miss is a dialect mismatch when some other built-in dialect knows
    /// the method, and unsupported otherwise.
    pub fn method_formatter(&self, owner: Owner, name: &str) -> Result<MethodEntry> {
        if let Some(entry) = self.provider.method_formatter(owner, name) {
            return Ok(entry);
        }
        let elsewhere: Vec<&str> = Dialect::ALL
            .iter()
            .filter(|d| **d != self.dialect())
            .filter(|d| d.provider().method_formatter(owner, name).is_some())
            .map(|d| d.as_str())
            .collect();
        if elsewhere.is_empty() {
            Err(Error::unsupported(format!("no translation for method {owner}.{name}")))
        } else {
            Err(Error::dialect_mismatch(format!(
                "{owner}.{name} is not available on {}; supported on {}",
                self.dialect().as_str(),
                elsewhere.join(", ")
            )))
        }
    }

    pub fn member_formatter(&self, owner: Owner, name: &str) -> Result<MemberFormatter> {
        if let Some(formatter) = self.provider.member_formatter(owner, name) {
            return Ok(formatter);
        }
        let elsewhere: Vec<&str> = Dialect::ALL
            .iter()
            .filter(|d| **d != self.dialect())
            .filter(|d| d.provider().member_formatter(owner, name).is_some())
            .map(|d| d.as_str())
            .collect();
        if elsewhere.is_empty() {
            Err(Error::unsupported(format!("no translation for member {owner}.{name}")))
        } else {
            Err(Error::dialect_mismatch(format!(
                "{owner}.{name} is not available on {}; supported on {}",
                self.dialect().as_str(),
                elsewhere.join(", ")
            )))
        }
    }

    pub fn finish(self, sql: String) -> CompiledStatement {
        tracing::debug!(
            dialect = self.dialect().as_str(),
            tables = self.aliases,
            parameters = self.parameters.len(),
            "compiled statement"
        );
        tracing::trace!(sql = %sql);
        CompiledStatement {
            sql,
            parameters: self.parameters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlweave_core::EntityMapRegistry;

    fn with_cx<R>(dialect: Dialect, options: CompileOptions, f: impl FnOnce(&mut StatementContext<'_>) -> R) -> R {
        let provider = dialect.provider();
        let maps = EntityMapRegistry::new();
        let mut cx = StatementContext::new(provider.as_ref(), &maps, &options);
        f(&mut cx)
    }

    // ==================== Aliases ====================

    #[test]
    fn test_aliases_follow_declaration_order() {
        with_cx(Dialect::Postgres, CompileOptions::default(), |cx| {
            assert_eq!(cx.next_alias(), "a");
            assert_eq!(cx.next_alias(), "b");
        });
    }

    #[test]
    fn test_aliases_past_z() {
        let options = CompileOptions::default().alias_start('y');
        with_cx(Dialect::Postgres, options, |cx| {
            assert_eq!(cx.next_alias(), "y");
            assert_eq!(cx.next_alias(), "z");
            assert_eq!(cx.next_alias(), "t26");
        });
    }

    // ==================== Parameters ====================

    #[test]
    fn test_parameter_names_are_unique() {
        with_cx(Dialect::Postgres, CompileOptions::default(), |cx| {
            let first = cx.add_parameter(Some("Status"), Value::Int(1), None);
            let second = cx.add_parameter(Some("Status"), Value::Int(2), None);
            let third = cx.add_parameter(None, Value::Int(3), None);
            assert_eq!(first, "@Status");
            assert_eq!(second, "@Status_1");
            assert_eq!(third, "@p");
            assert_eq!(cx.parameters().len(), 3);
        });
    }

    #[test]
    fn test_row_suffix_and_namespace() {
        let provider = Dialect::Sqlite.provider();
        let maps = EntityMapRegistry::new();
        let options = CompileOptions::default();
        let mut cx = StatementContext::new(provider.as_ref(), &maps, &options).with_namespace(Some("m1"));
        cx.set_row(Some(3));
        assert_eq!(cx.add_parameter(Some("Name"), Value::from("x"), None), ":Name3_m1");
    }

    #[test]
    fn test_null_is_inlined() {
        with_cx(Dialect::Postgres, CompileOptions::default(), |cx| {
            let sql = cx.render(SqlSegment::constant(Value::Null)).unwrap();
            assert_eq!(sql, "NULL");
            assert!(cx.parameters().is_empty());
        });
    }

    #[test]
    fn test_literal_mode_inlines_constants() {
        let options = CompileOptions::default().parameterized(false);
        with_cx(Dialect::Mysql, options, |cx| {
            let sql = cx.render(SqlSegment::constant(Value::from("it's"))).unwrap();
            assert_eq!(sql, "'it''s'");
            assert!(cx.parameters().is_empty());
        });
    }

    #[test]
    fn test_native_type_prefers_column_type() {
        with_cx(Dialect::SqlServer, CompileOptions::default(), |cx| {
            cx.add_parameter(Some("Name"), Value::from("x"), Some(&SqlType::VarChar(50)));
            assert_eq!(cx.parameters()[0].native_type, "NVARCHAR(50)");
        });
    }

    // ==================== Formatter lookup ====================

    #[test]
    fn test_missing_formatter_classification() {
        with_cx(Dialect::Mysql, CompileOptions::default(), |cx| {
            let err = cx.method_formatter(Owner::Sql, "ILike").unwrap_err();
            assert!(err.is_dialect_mismatch(), "{err}");
            let err = cx.method_formatter(Owner::String, "PadLeft").unwrap_err();
            assert!(err.is_unsupported(), "{err}");
        });
    }
}
