//! Common table expressions.
//!
//! A [`Cte`] is attached to the outermost query with `Query::with_cte` and
//! referenced as a source through its [`CteRef`]. Recursive CTEs receive their
//! own reference before the recursive branch is built, so the branch can join
//! back onto the CTE by name.
//!
//! # Example
//!
//! ```ignore
//! let tree = Cte::recursive(
//!     "tree",
//!     Query::subquery_of("Category").where_(|t| t[0].field("ParentId").is_null()),
//!     |tree| {
//!         Query::subquery_of("Category")
//!             .inner_join_cte(tree, |t| t[0].field("ParentId").eq(t[1].field("Id")))
//!             .select_entity(0)
//!     },
//! )?;
//! let rows = compiler.from_cte(&tree).with_cte(tree.clone()).build()?;
//! ```

use sqlweave_core::{Result, validate_identifier};

use crate::query::QuerySpec;

/// A named sub-query emitted in the statement's `WITH` clause.
#[derive(Debug, Clone)]
pub struct Cte {
    pub(crate) name: String,
    pub(crate) anchor: QuerySpec,
    pub(crate) recursive: Option<QuerySpec>,
}

impl Cte {
    pub fn new(name: impl Into<String>, query: impl Into<QuerySpec>) -> Result<Self> {
        let name = name.into();
        validate_identifier(&name, "CTE name")?;
        Ok(Self {
            name,
            anchor: query.into(),
            recursive: None,
        })
    }

    /// Recursive CTE: `anchor UNION ALL branch`, where `branch` may read the CTE itself.
    pub fn recursive<F, Q>(name: impl Into<String>, anchor: impl Into<QuerySpec>, branch: F) -> Result<Self>
    where
        F: FnOnce(&CteRef) -> Q,
        Q: Into<QuerySpec>,
    {
        let name = name.into();
        validate_identifier(&name, "CTE name")?;
        let reference = CteRef { name: name.clone() };
        let recursive = branch(&reference).into();
        Ok(Self {
            name,
            anchor: anchor.into(),
            recursive: Some(recursive),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive.is_some()
    }

    pub fn reference(&self) -> CteRef {
        CteRef {
            name: self.name.clone(),
        }
    }
}

/// Name of a CTE usable as a query source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CteRef {
    name: String,
}

impl CteRef {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl From<&Cte> for CteRef {
    fn from(cte: &Cte) -> Self {
        cte.reference()
    }
}

impl From<&CteRef> for CteRef {
    fn from(reference: &CteRef) -> Self {
        reference.clone()
    }
}
