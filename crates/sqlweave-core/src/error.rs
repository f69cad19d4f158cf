//! Error types for sqlweave.
//!
//! Every error is raised while a statement is being built, before any SQL
//! leaves the process.

use std::fmt;

/// The primary error type for all sqlweave operations.
#[derive(Debug)]
pub enum Error {
    /// Expression or statement could not be compiled
    Compile(CompileError),
    /// Entity map, sharding or compiler configuration problems
    Config(ConfigError),
    /// Value had the wrong type for the requested use
    Type(TypeError),
    /// Serialization/deserialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub message: String,
    /// Partially rendered SQL near the failure, when known
    pub fragment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    /// No translation for a node, member or method under the active dialect
    UnsupportedExpression,
    /// Member path does not resolve against any table in scope
    UnresolvedMember,
    /// Mutating statement lacks a predicate and no whole-table opt-in was given
    MissingPredicate,
    /// A write resolves to zero or several physical tables
    AmbiguousShardTarget,
    /// Feature exists only under a different dialect
    DialectMismatch,
    /// Statement has nothing to do (no assignments, no rows)
    EmptyStatement,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
    pub rust_type: Option<&'static str>,
}

impl Error {
    fn compile(kind: CompileErrorKind, message: impl Into<String>) -> Self {
        Error::Compile(CompileError {
            kind,
            message: message.into(),
            fragment: None,
        })
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::compile(CompileErrorKind::UnsupportedExpression, message)
    }

    pub fn unresolved(message: impl Into<String>) -> Self {
        Self::compile(CompileErrorKind::UnresolvedMember, message)
    }

    pub fn missing_predicate(message: impl Into<String>) -> Self {
        Self::compile(CompileErrorKind::MissingPredicate, message)
    }

    pub fn ambiguous_shard(message: impl Into<String>) -> Self {
        Self::compile(CompileErrorKind::AmbiguousShardTarget, message)
    }

    pub fn dialect_mismatch(message: impl Into<String>) -> Self {
        Self::compile(CompileErrorKind::DialectMismatch, message)
    }

    pub fn empty_statement(message: impl Into<String>) -> Self {
        Self::compile(CompileErrorKind::EmptyStatement, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
            source: None,
        })
    }

    /// Attach the SQL fragment being rendered when the error occurred.
    #[must_use]
    pub fn with_fragment(mut self, fragment: impl Into<String>) -> Self {
        if let Error::Compile(e) = &mut self {
            if e.fragment.is_none() {
                e.fragment = Some(fragment.into());
            }
        }
        self
    }

    /// Compile error kind, if this is a compile error.
    pub fn compile_kind(&self) -> Option<CompileErrorKind> {
        match self {
            Error::Compile(e) => Some(e.kind),
            _ => None,
        }
    }

    pub fn is_unsupported(&self) -> bool {
        self.compile_kind() == Some(CompileErrorKind::UnsupportedExpression)
    }

    pub fn is_unresolved(&self) -> bool {
        self.compile_kind() == Some(CompileErrorKind::UnresolvedMember)
    }

    pub fn is_missing_predicate(&self) -> bool {
        self.compile_kind() == Some(CompileErrorKind::MissingPredicate)
    }

    pub fn is_ambiguous_shard(&self) -> bool {
        self.compile_kind() == Some(CompileErrorKind::AmbiguousShardTarget)
    }

    pub fn is_dialect_mismatch(&self) -> bool {
        self.compile_kind() == Some(CompileErrorKind::DialectMismatch)
    }

    pub fn is_empty_statement(&self) -> bool {
        self.compile_kind() == Some(CompileErrorKind::EmptyStatement)
    }
}

impl CompileErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            CompileErrorKind::UnsupportedExpression => "unsupported expression",
            CompileErrorKind::UnresolvedMember => "unresolved member",
            CompileErrorKind::MissingPredicate => "missing predicate",
            CompileErrorKind::AmbiguousShardTarget => "ambiguous shard target",
            CompileErrorKind::DialectMismatch => "dialect mismatch",
            CompileErrorKind::EmptyStatement => "empty statement",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Compile(e) => write!(f, "Compile error ({}): {}", e.kind.as_str(), e),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(fragment) = &self.fragment {
            write!(f, "{} (near `{}`)", self.message, fragment)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl From<CompileError> for Error {
    fn from(err: CompileError) -> Self {
        Error::Compile(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error::Config(ConfigError {
            message: format!("invalid pattern: {err}"),
            source: Some(Box::new(err)),
        })
    }
}

/// Result type alias for sqlweave operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_predicates() {
        let err = Error::missing_predicate("update on Order has no WHERE clause");
        assert!(err.is_missing_predicate());
        assert!(!err.is_unsupported());
        assert_eq!(err.compile_kind(), Some(CompileErrorKind::MissingPredicate));

        assert!(Error::ambiguous_shard("x").is_ambiguous_shard());
        assert!(Error::dialect_mismatch("x").is_dialect_mismatch());
        assert!(Error::unresolved("x").is_unresolved());
        assert_eq!(Error::config("x").compile_kind(), None);
    }

    #[test]
    fn display_includes_kind_and_fragment() {
        let err = Error::unsupported("no translation for String.PadLeft").with_fragment("a.\"Name\"");
        let text = err.to_string();
        assert!(text.contains("unsupported expression"), "{text}");
        assert!(text.contains("String.PadLeft"), "{text}");
        assert!(text.contains("a.\"Name\""), "{text}");
    }

    #[test]
    fn fragment_is_only_attached_once() {
        let err = Error::unresolved("x")
            .with_fragment("inner")
            .with_fragment("outer");
        match err {
            Error::Compile(e) => assert_eq!(e.fragment.as_deref(), Some("inner")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn serde_errors_convert() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = parse.into();
        assert!(matches!(err, Error::Serde(_)));
    }

    #[test]
    fn config_error_exposes_source() {
        let regex_err = regex::Regex::new("(").unwrap_err();
        let err: Error = regex_err.into();
        assert!(std::error::Error::source(&err).is_some());
    }
}
