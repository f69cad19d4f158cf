//! Formatter registries.
//!
//! Member and method translations are looked up by `(owner, name)`. Each
//! dialect starts from the common set and registers its overrides, so adding
//! or replacing a function is a registration rather than a new branch.

use std::collections::HashMap;

use sqlweave_core::Result;

use crate::ast::Owner;
use crate::context::StatementContext;
use crate::segment::{CallOperands, SqlSegment};

/// Renders a property access; receives the visited receiver, if any.
pub type MemberFormatter = fn(&mut StatementContext<'_>, Option<SqlSegment>) -> Result<SqlSegment>;

/// Renders a method call from its visited operands.
pub type MethodFormatter = fn(&mut StatementContext<'_>, CallOperands) -> Result<SqlSegment>;

#[derive(Debug, Clone, Copy)]
pub struct MethodEntry {
    pub formatter: MethodFormatter,
    /// Predicate-shaped call resolved by its parent, so `NOT` can fold into it
    pub deferred: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FormatterRegistry {
    members: HashMap<Owner, HashMap<&'static str, MemberFormatter>>,
    methods: HashMap<Owner, HashMap<&'static str, MethodEntry>>,
}

impl FormatterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the translations every dialect shares.
    pub fn with_common() -> Self {
        let mut registry = Self::new();
        super::functions::register_common(&mut registry);
        registry
    }

    pub fn register_member(&mut self, owner: Owner, name: &'static str, formatter: MemberFormatter) {
        self.members.entry(owner).or_default().insert(name, formatter);
    }

    pub fn register_method(&mut self, owner: Owner, name: &'static str, formatter: MethodFormatter) {
        self.methods.entry(owner).or_default().insert(
            name,
            MethodEntry {
                formatter,
                deferred: false,
            },
        );
    }

    /// Register a predicate-shaped method that honours `CallOperands::negated`.
    pub fn register_deferred(&mut self, owner: Owner, name: &'static str, formatter: MethodFormatter) {
        self.methods.entry(owner).or_default().insert(
            name,
            MethodEntry {
                formatter,
                deferred: true,
            },
        );
    }

    pub fn remove_member(&mut self, owner: Owner, name: &str) -> bool {
        self.members
            .get_mut(&owner)
            .is_some_and(|m| m.remove(name).is_some())
    }

    pub fn remove_method(&mut self, owner: Owner, name: &str) -> bool {
        self.methods
            .get_mut(&owner)
            .is_some_and(|m| m.remove(name).is_some())
    }

    pub fn member(&self, owner: Owner, name: &str) -> Option<MemberFormatter> {
        self.members.get(&owner)?.get(name).copied()
    }

    pub fn method(&self, owner: Owner, name: &str) -> Option<MethodEntry> {
        self.methods.get(&owner)?.get(name).copied()
    }

    /// Total number of registered members and methods.
    pub fn len(&self) -> usize {
        self.members.values().map(HashMap::len).sum::<usize>()
            + self.methods.values().map(HashMap::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(_: &mut StatementContext<'_>, _: CallOperands) -> Result<SqlSegment> {
        Ok(SqlSegment::atom("X()".into()))
    }

    #[test]
    fn test_register_and_remove() {
        let mut registry = FormatterRegistry::new();
        assert!(registry.is_empty());
        registry.register_method(Owner::String, "PadLeft", fixed);
        registry.register_deferred(Owner::Sql, "Matches", fixed);
        assert_eq!(registry.len(), 2);
        assert!(!registry.method(Owner::String, "PadLeft").unwrap().deferred);
        assert!(registry.method(Owner::Sql, "Matches").unwrap().deferred);
        assert!(registry.method(Owner::Math, "PadLeft").is_none());

        assert!(registry.remove_method(Owner::String, "PadLeft"));
        assert!(!registry.remove_method(Owner::String, "PadLeft"));
        assert!(registry.method(Owner::String, "PadLeft").is_none());
    }

    #[test]
    fn test_common_set_covers_core_translations() {
        let registry = FormatterRegistry::with_common();
        for name in ["Contains", "StartsWith", "EndsWith", "Substring", "Concat"] {
            assert!(registry.method(Owner::String, name).is_some(), "{name}");
        }
        for name in ["Count", "Sum", "Avg", "Min", "Max", "In", "Exists"] {
            assert!(registry.method(Owner::Sql, name).is_some(), "{name}");
        }
        assert!(registry.method(Owner::String, "Contains").unwrap().deferred);
        assert!(registry.member(Owner::String, "Length").is_some());
    }
}
