//! Compile-time options shared by every statement built from one compiler.

use serde::{Deserialize, Serialize};

use sqlweave_core::{Error, Result};

/// Options controlling how statements are rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Bind constants as named parameters (true) or inline them as literals.
    pub parameterized: bool,
    /// Letter assigned to the first declared table.
    pub alias_start: char,
    /// Default row threshold for splitting bulk inserts.
    pub batch_size: usize,
    /// Maximum number of tables (FROM plus joins) in one SELECT.
    pub max_tables: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            parameterized: true,
            alias_start: 'a',
            batch_size: 500,
            max_tables: 16,
        }
    }
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parameterized(mut self, parameterized: bool) -> Self {
        self.parameterized = parameterized;
        self
    }

    pub fn alias_start(mut self, letter: char) -> Self {
        self.alias_start = letter;
        self
    }

    pub fn batch_size(mut self, rows: usize) -> Self {
        self.batch_size = rows;
        self
    }

    pub fn max_tables(mut self, tables: usize) -> Self {
        self.max_tables = tables;
        self
    }

    /// Reject option combinations the compiler cannot honour.
    pub fn validate(&self) -> Result<()> {
        if !self.alias_start.is_ascii_lowercase() {
            return Err(Error::config(format!(
                "alias_start must be a lowercase ASCII letter, got `{}`",
                self.alias_start
            )));
        }
        if self.batch_size == 0 {
            return Err(Error::config("batch_size must be at least 1"));
        }
        if self.max_tables == 0 {
            return Err(Error::config("max_tables must be at least 1"));
        }
        Ok(())
    }
}
