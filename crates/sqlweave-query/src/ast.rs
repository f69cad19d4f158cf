//! Captured expression trees.
//!
//! Builder closures return an [`Expr`]: a closed tree built once, when the
//! closure runs, and walked later by the visitor. Member access starts from a
//! [`TableRef`] handed out by [`Tables`], so the tree never holds names that
//! have not yet been resolved against entity metadata.

use std::fmt;
use std::ops::Index;

use chrono::{NaiveDate, NaiveDateTime};
use sqlweave_core::{SqlType, Value};

use crate::query::QuerySpec;

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    // Logical
    And,
    Or,

    // Arithmetic; `Add` over text operands becomes concatenation
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // Bitwise
    BitAnd,
    BitOr,
    BitXor,

    /// First non-null operand (`COALESCE`)
    Coalesce,
}

impl BinaryOp {
    /// Generic SQL spelling; dialects may override.
    pub const fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Coalesce => "COALESCE",
        }
    }

    /// Get the precedence of this operator (higher = binds tighter).
    pub const fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => 3,
            BinaryOp::BitOr => 4,
            BinaryOp::BitXor => 5,
            BinaryOp::BitAnd => 6,
            BinaryOp::Add | BinaryOp::Sub => 7,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 8,
            BinaryOp::Coalesce => ATOM,
        }
    }

    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub const fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    /// `a op (b op c)` may drop its parentheses.
    pub const fn is_associative(self) -> bool {
        matches!(
            self,
            BinaryOp::And
                | BinaryOp::Or
                | BinaryOp::Add
                | BinaryOp::Mul
                | BinaryOp::BitAnd
                | BinaryOp::BitOr
                | BinaryOp::BitXor
        )
    }
}

/// Precedence of self-delimiting fragments (columns, literals, function calls).
pub const ATOM: u8 = u8::MAX;

/// Precedence of prefix operators.
pub const PREFIX: u8 = 9;

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Neg,
    BitNot,
}

/// Namespace a member or method belongs to; formatter registries are keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    String,
    DateTime,
    Math,
    Convert,
    /// Aggregates, predicates and other SQL-only markers
    Sql,
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Owner::String => "String",
            Owner::DateTime => "DateTime",
            Owner::Math => "Math",
            Owner::Convert => "Convert",
            Owner::Sql => "Sql",
        };
        f.write_str(name)
    }
}

/// Handle to one declared table.
///
/// `depth` counts scopes outwards: 0 is the statement the closure belongs to,
/// 1 its enclosing statement (for correlated sub-queries), and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub index: usize,
    pub depth: usize,
}

impl TableRef {
    /// Member access on this table.
    pub fn field(self, member: impl Into<String>) -> Expr {
        Expr::Member(MemberPath {
            root: MemberRoot::Table(self),
            path: vec![member.into()],
        })
    }

    /// The whole entity; expands to every mapped column in projections.
    pub fn all(self) -> Expr {
        Expr::Member(MemberPath {
            root: MemberRoot::Table(self),
            path: Vec::new(),
        })
    }
}

/// Ordered table handles passed to builder closures.
#[derive(Debug, Clone)]
pub struct Tables {
    refs: Vec<TableRef>,
}

impl Tables {
    pub(crate) fn new(count: usize) -> Self {
        Self {
            refs: (0..count).map(|index| TableRef { index, depth: 0 }).collect(),
        }
    }

    /// Handle by index; unlike `tables[i]` this never panics and an
    /// out-of-range index fails when the statement is built.
    pub fn at(&self, index: usize) -> TableRef {
        TableRef { index, depth: 0 }
    }

    /// Table of the enclosing statement (correlated sub-queries).
    pub fn outer(&self, index: usize) -> TableRef {
        TableRef { index, depth: 1 }
    }

    /// Table `depth` scopes out.
    pub fn outer_at(&self, depth: usize, index: usize) -> TableRef {
        TableRef { index, depth }
    }

    /// The grouping pseudo-object; `.member(name)` selects one grouping key.
    pub fn grouping(&self) -> Expr {
        Expr::Member(MemberPath {
            root: MemberRoot::Grouping,
            path: Vec::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

impl Index<usize> for Tables {
    type Output = TableRef;

    fn index(&self, index: usize) -> &TableRef {
        &self.refs[index]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MemberRoot {
    Table(TableRef),
    Grouping,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemberPath {
    pub root: MemberRoot,
    pub path: Vec<String>,
}

/// A captured expression.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Captured value; inlined or bound depending on compile options
    Constant(Value),

    /// Member chain rooted at a table or the grouping pseudo-object
    Member(MemberPath),

    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    Unary { op: UnaryOp, operand: Box<Expr> },

    /// Property on a non-entity value, e.g. `String.Length`, `DateTime.Year`
    Property {
        owner: Owner,
        name: String,
        target: Option<Box<Expr>>,
    },

    /// Method call resolved through the dialect's formatter registry
    Call {
        owner: Owner,
        name: String,
        target: Option<Box<Expr>>,
        args: Vec<Expr>,
    },

    /// CASE WHEN test THEN then ELSE otherwise END
    Conditional {
        test: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },

    Cast { operand: Box<Expr>, to: SqlType },

    /// New/member-init: named members in declaration order
    Object(Vec<(String, Expr)>),

    /// Nested SELECT, correlated through `Tables::outer`
    SubQuery(Box<QuerySpec>),

    /// Raw SQL (escape hatch)
    Raw(String),
}

impl Expr {
    // ==================== Constructors ====================

    /// Create a literal value expression.
    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Constant(value.into())
    }

    pub fn null() -> Self {
        Expr::Constant(Value::Null)
    }

    /// Create a raw SQL expression (escape hatch).
    pub fn raw(sql: impl Into<String>) -> Self {
        Expr::Raw(sql.into())
    }

    /// Anonymous object / projection.
    pub fn object<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = (S, Expr)>,
        S: Into<String>,
    {
        Expr::Object(members.into_iter().map(|(n, e)| (n.into(), e)).collect())
    }

    /// Scalar sub-query.
    pub fn subquery(query: impl Into<QuerySpec>) -> Self {
        Expr::SubQuery(Box::new(query.into()))
    }

    pub fn case_when(test: Expr, then: impl Into<Expr>, otherwise: impl Into<Expr>) -> Self {
        Expr::Conditional {
            test: Box::new(test),
            then: Box::new(then.into()),
            otherwise: Box::new(otherwise.into()),
        }
    }

    /// Generic method call; the formatter registry decides how it renders.
    pub fn call(owner: Owner, name: impl Into<String>, target: Option<Expr>, args: Vec<Expr>) -> Self {
        Expr::Call {
            owner,
            name: name.into(),
            target: target.map(Box::new),
            args,
        }
    }

    /// Generic property access.
    pub fn property(owner: Owner, name: impl Into<String>, target: Option<Expr>) -> Self {
        Expr::Property {
            owner,
            name: name.into(),
            target: target.map(Box::new),
        }
    }

    fn method(self, owner: Owner, name: &str, args: Vec<Expr>) -> Self {
        Expr::call(owner, name, Some(self), args)
    }

    fn binary(self, op: BinaryOp, other: impl Into<Expr>) -> Self {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(other.into()),
        }
    }

    // ==================== Member Chains ====================

    /// Extend a member path, e.g. `t.grouping().member("Id")`.
    ///
    /// On anything other than a member this is a property access on an
    /// unknown owner and fails at build time.
    pub fn member(self, name: impl Into<String>) -> Self {
        match self {
            Expr::Member(mut path) => {
                path.path.push(name.into());
                Expr::Member(path)
            }
            other => Expr::property(Owner::Sql, name, Some(other)),
        }
    }

    // ==================== Comparison Operators ====================

    /// Equal to (=); comparing with NULL renders `IS NULL`.
    pub fn eq(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Eq, other)
    }

    /// Not equal to (<>); comparing with NULL renders `IS NOT NULL`.
    pub fn ne(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ne, other)
    }

    pub fn lt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Lt, other)
    }

    pub fn le(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Le, other)
    }

    pub fn gt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Gt, other)
    }

    pub fn ge(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ge, other)
    }

    pub fn is_null(self) -> Self {
        self.eq(Expr::null())
    }

    pub fn is_not_null(self) -> Self {
        self.ne(Expr::null())
    }

    /// `low <= self AND self <= high`
    pub fn between(self, low: impl Into<Expr>, high: impl Into<Expr>) -> Self {
        self.clone().ge(low).and(self.le(high))
    }

    // ==================== Logical Operators ====================

    pub fn and(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::And, other)
    }

    pub fn or(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Or, other)
    }

    pub fn not(self) -> Self {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
        }
    }

    // ==================== Arithmetic ====================

    pub fn add(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Add, other)
    }

    pub fn sub(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Sub, other)
    }

    pub fn mul(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Mul, other)
    }

    pub fn div(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Div, other)
    }

    pub fn rem(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Mod, other)
    }

    pub fn neg(self) -> Self {
        Expr::Unary {
            op: UnaryOp::Neg,
            operand: Box::new(self),
        }
    }

    pub fn bit_and(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::BitAnd, other)
    }

    pub fn bit_or(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::BitOr, other)
    }

    pub fn bit_xor(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::BitXor, other)
    }

    /// `COALESCE(self, other)`
    pub fn coalesce(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Coalesce, other)
    }

    pub fn cast(self, to: SqlType) -> Self {
        Expr::Cast {
            operand: Box::new(self),
            to,
        }
    }

    // ==================== Collections & Sub-queries ====================

    /// `self IN (...)` over a captured collection.
    pub fn in_list(self, values: impl Into<Value>) -> Self {
        self.method(Owner::Sql, "In", vec![Expr::Constant(values.into())])
    }

    /// `self IN (SELECT ...)`
    pub fn in_query(self, query: impl Into<QuerySpec>) -> Self {
        self.method(Owner::Sql, "In", vec![Expr::subquery(query)])
    }

    /// `EXISTS (SELECT ...)`
    pub fn exists(query: impl Into<QuerySpec>) -> Self {
        Expr::call(Owner::Sql, "Exists", None, vec![Expr::subquery(query)])
    }

    // ==================== Aggregates ====================

    /// `COUNT(*)`
    pub fn count() -> Self {
        Expr::call(Owner::Sql, "Count", None, Vec::new())
    }

    pub fn count_of(expr: Expr) -> Self {
        Expr::call(Owner::Sql, "Count", None, vec![expr])
    }

    pub fn count_distinct(expr: Expr) -> Self {
        Expr::call(Owner::Sql, "CountDistinct", None, vec![expr])
    }

    pub fn sum(expr: Expr) -> Self {
        Expr::call(Owner::Sql, "Sum", None, vec![expr])
    }

    pub fn avg(expr: Expr) -> Self {
        Expr::call(Owner::Sql, "Avg", None, vec![expr])
    }

    pub fn min(expr: Expr) -> Self {
        Expr::call(Owner::Sql, "Min", None, vec![expr])
    }

    pub fn max(expr: Expr) -> Self {
        Expr::call(Owner::Sql, "Max", None, vec![expr])
    }

    // ==================== Strings ====================

    /// Substring match (`LIKE '%x%'`).
    pub fn contains(self, pattern: impl Into<Expr>) -> Self {
        self.method(Owner::String, "Contains", vec![pattern.into()])
    }

    pub fn starts_with(self, prefix: impl Into<Expr>) -> Self {
        self.method(Owner::String, "StartsWith", vec![prefix.into()])
    }

    pub fn ends_with(self, suffix: impl Into<Expr>) -> Self {
        self.method(Owner::String, "EndsWith", vec![suffix.into()])
    }

    /// Raw `LIKE` with a caller-supplied pattern.
    pub fn like(self, pattern: impl Into<Expr>) -> Self {
        self.method(Owner::Sql, "Like", vec![pattern.into()])
    }

    /// Case-insensitive `ILIKE` (PostgreSQL only).
    pub fn ilike(self, pattern: impl Into<Expr>) -> Self {
        self.method(Owner::Sql, "ILike", vec![pattern.into()])
    }

    /// Zero-based substring, as in most host languages.
    pub fn substring(self, start: impl Into<Expr>, length: Option<Expr>) -> Self {
        let mut args = vec![start.into()];
        args.extend(length);
        self.method(Owner::String, "Substring", args)
    }

    pub fn to_upper(self) -> Self {
        self.method(Owner::String, "ToUpper", Vec::new())
    }

    pub fn to_lower(self) -> Self {
        self.method(Owner::String, "ToLower", Vec::new())
    }

    pub fn trim(self) -> Self {
        self.method(Owner::String, "Trim", Vec::new())
    }

    pub fn trim_start(self) -> Self {
        self.method(Owner::String, "TrimStart", Vec::new())
    }

    pub fn trim_end(self) -> Self {
        self.method(Owner::String, "TrimEnd", Vec::new())
    }

    pub fn replace(self, from: impl Into<Expr>, to: impl Into<Expr>) -> Self {
        self.method(Owner::String, "Replace", vec![from.into(), to.into()])
    }

    pub fn length(self) -> Self {
        Expr::property(Owner::String, "Length", Some(self))
    }

    pub fn is_null_or_empty(expr: Expr) -> Self {
        Expr::call(Owner::String, "IsNullOrEmpty", None, vec![expr])
    }

    pub fn concat(parts: Vec<Expr>) -> Self {
        Expr::call(Owner::String, "Concat", None, parts)
    }

    pub fn to_text(self) -> Self {
        self.method(Owner::Convert, "ToString", Vec::new())
    }

    // ==================== Dates ====================

    pub fn now() -> Self {
        Expr::property(Owner::DateTime, "Now", None)
    }

    pub fn year(self) -> Self {
        Expr::property(Owner::DateTime, "Year", Some(self))
    }

    pub fn month(self) -> Self {
        Expr::property(Owner::DateTime, "Month", Some(self))
    }

    pub fn day(self) -> Self {
        Expr::property(Owner::DateTime, "Day", Some(self))
    }

    pub fn hour(self) -> Self {
        Expr::property(Owner::DateTime, "Hour", Some(self))
    }

    pub fn minute(self) -> Self {
        Expr::property(Owner::DateTime, "Minute", Some(self))
    }

    pub fn second(self) -> Self {
        Expr::property(Owner::DateTime, "Second", Some(self))
    }

    /// Date part of a date-time.
    pub fn date(self) -> Self {
        Expr::property(Owner::DateTime, "Date", Some(self))
    }

    pub fn add_days(self, days: impl Into<Expr>) -> Self {
        self.method(Owner::DateTime, "AddDays", vec![days.into()])
    }

    // ==================== Math ====================

    pub fn abs(self) -> Self {
        Expr::call(Owner::Math, "Abs", None, vec![self])
    }

    pub fn floor(self) -> Self {
        Expr::call(Owner::Math, "Floor", None, vec![self])
    }

    pub fn ceiling(self) -> Self {
        Expr::call(Owner::Math, "Ceiling", None, vec![self])
    }

    pub fn round(self, digits: Option<i32>) -> Self {
        let mut args = vec![self];
        args.extend(digits.map(Expr::lit));
        Expr::call(Owner::Math, "Round", None, args)
    }

    // ==================== Inspection ====================

    /// True for a constant `Value::Null`.
    pub fn is_null_constant(&self) -> bool {
        matches!(self, Expr::Constant(Value::Null))
    }

    /// Single member name for `table.field("X")`, used as a default projection name.
    pub fn member_name(&self) -> Option<&str> {
        match self {
            Expr::Member(MemberPath { path, .. }) => path.last().map(String::as_str),
            _ => None,
        }
    }
}

// ==================== Conversions ====================

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Constant(value)
    }
}

impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        Expr::Constant(Value::Text(s.to_string()))
    }
}

impl From<String> for Expr {
    fn from(s: String) -> Self {
        Expr::Constant(Value::Text(s))
    }
}

impl From<i32> for Expr {
    fn from(n: i32) -> Self {
        Expr::Constant(Value::Int(n))
    }
}

impl From<i64> for Expr {
    fn from(n: i64) -> Self {
        Expr::Constant(Value::BigInt(n))
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Self {
        Expr::Constant(Value::Bool(b))
    }
}

impl From<f64> for Expr {
    fn from(n: f64) -> Self {
        Expr::Constant(Value::Double(n))
    }
}

impl From<NaiveDate> for Expr {
    fn from(d: NaiveDate) -> Self {
        Expr::Constant(Value::from(d))
    }
}

impl From<NaiveDateTime> for Expr {
    fn from(dt: NaiveDateTime) -> Self {
        Expr::Constant(Value::from(dt))
    }
}

impl<T: Into<Expr>> std::ops::Add<T> for Expr {
    type Output = Expr;

    fn add(self, rhs: T) -> Expr {
        self.binary(BinaryOp::Add, rhs)
    }
}

impl<T: Into<Expr>> std::ops::Sub<T> for Expr {
    type Output = Expr;

    fn sub(self, rhs: T) -> Expr {
        self.binary(BinaryOp::Sub, rhs)
    }
}

impl<T: Into<Expr>> std::ops::Mul<T> for Expr {
    type Output = Expr;

    fn mul(self, rhs: T) -> Expr {
        self.binary(BinaryOp::Mul, rhs)
    }
}

impl<T: Into<Expr>> std::ops::Div<T> for Expr {
    type Output = Expr;

    fn div(self, rhs: T) -> Expr {
        self.binary(BinaryOp::Div, rhs)
    }
}

impl std::ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
        }
    }
}
