//! SQL identifier quoting and validation utilities.
//!
//! Quoting functions are safe against SQL injection for any input string.
//! Validation is used where an identifier is assembled from runtime data
//! (shard table names, CTE names) and must never need quoting.

use std::sync::OnceLock;

use regex::Regex;

use crate::Result;
use crate::error::Error;

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them (`"` → `""`).
///
/// # Examples
///
/// ```
/// use sqlweave_core::quote_ident;
///
/// assert_eq!(quote_ident("users"), "\"users\"");
/// assert_eq!(quote_ident("user\"name"), "\"user\"\"name\"");
/// ```
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a SQL identifier using MySQL backtick quoting.
///
/// ```
/// use sqlweave_core::quote_ident_mysql;
///
/// assert_eq!(quote_ident_mysql("user`name"), "`user``name`");
/// ```
#[inline]
pub fn quote_ident_mysql(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Quote a SQL identifier using SQL Server bracket quoting.
///
/// Only the closing bracket needs escaping (`]` → `]]`).
///
/// ```
/// use sqlweave_core::quote_ident_mssql;
///
/// assert_eq!(quote_ident_mssql("Order"), "[Order]");
/// assert_eq!(quote_ident_mssql("a]b"), "[a]]b]");
/// ```
#[inline]
pub fn quote_ident_mssql(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

fn plain_identifier_regex() -> Result<&'static Regex> {
    static PLAIN: OnceLock<Regex> = OnceLock::new();
    if let Some(regex) = PLAIN.get() {
        return Ok(regex);
    }
    let regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$")?;
    Ok(PLAIN.get_or_init(|| regex))
}

/// True when `name` is a letter/underscore followed by letters, digits or underscores.
pub fn is_plain_identifier(name: &str) -> bool {
    plain_identifier_regex().is_ok_and(|regex| regex.is_match(name))
}

/// Reject identifiers that would need quoting.
///
/// `what` names the identifier's role in the error message.
pub fn validate_identifier(name: &str, what: &str) -> Result<()> {
    if is_plain_identifier(name) {
        Ok(())
    } else {
        tracing::debug!(name, what, "rejected identifier");
        Err(Error::config(format!(
            "{what} `{name}` must contain only letters, digits and underscores"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Quoting ====================

    #[test]
    fn test_quote_ident_embedded_double_quote() {
        assert_eq!(quote_ident("user\"name"), "\"user\"\"name\"");
    }

    #[test]
    fn test_quote_ident_sql_keyword() {
        assert_eq!(quote_ident("select"), "\"select\"");
    }

    #[test]
    fn test_quote_ident_mysql_multiple_backticks() {
        assert_eq!(quote_ident_mysql("a`b`c"), "`a``b``c`");
    }

    #[test]
    fn test_quote_ident_mssql_injection_attempt() {
        assert_eq!(
            quote_ident_mssql("x]; DROP TABLE users; --"),
            "[x]]; DROP TABLE users; --]"
        );
    }

    // ==================== Validation ====================

    #[test]
    fn test_plain_identifiers() {
        assert!(is_plain_identifier("sys_order_202401"));
        assert!(is_plain_identifier("_tmp"));
        assert!(!is_plain_identifier("2024_order"));
        assert!(!is_plain_identifier("order-2024"));
        assert!(!is_plain_identifier(""));
        assert!(!is_plain_identifier("a b"));
    }

    #[test]
    fn test_validate_identifier_error_mentions_role() {
        let err = validate_identifier("x;y", "shard table").unwrap_err();
        assert!(err.to_string().contains("shard table `x;y`"));
    }
}
