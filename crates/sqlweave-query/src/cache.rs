//! Statement caching for compiled SQL.
//!
//! Caches [`CompiledStatement`]s keyed by a builder fingerprint so repeated
//! builds of the same captured statement skip the visitor entirely.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};

use sqlweave_core::{Error, Result};

use crate::batch::Statement;
use crate::compiler::SqlCompiler;
use crate::context::CompiledStatement;

/// A cached compiled statement.
#[derive(Debug, Clone)]
pub struct CachedStatement {
    pub statement: CompiledStatement,
    /// Logical clock value of the last access.
    pub last_used: u64,
    /// Number of times this statement has been served.
    pub hit_count: u64,
}

/// LRU cache of compiled statements.
///
/// When the cache exceeds `max_size`, the least-recently-used entry is evicted.
///
/// # Example
///
/// ```ignore
/// let mut cache = StatementCache::new(100);
/// let query = compiler.from::<Order>().where_(|t| t[0].field("Id").eq(7));
/// let first = cache.build(&query)?;
/// let again = cache.build(&query)?; // served from the cache
/// assert_eq!(first, again);
/// ```
#[derive(Debug)]
pub struct StatementCache {
    cache: HashMap<u64, CachedStatement>,
    max_size: usize,
    clock: u64,
}

impl StatementCache {
    /// Create a new cache with the given maximum number of entries.
    pub fn new(max_size: usize) -> Self {
        Self {
            cache: HashMap::with_capacity(max_size.min(256)),
            max_size: max_size.max(1),
            clock: 0,
        }
    }

    /// Get a cached statement or compile and insert it.
    ///
    /// The `builder` closure is only called on cache miss; a failed build is
    /// not cached.
    pub fn get_or_try_insert(
        &mut self,
        key: u64,
        builder: impl FnOnce() -> Result<CompiledStatement>,
    ) -> Result<&CompiledStatement> {
        self.clock += 1;
        if !self.cache.contains_key(&key) {
            let statement = builder()?;
            if self.cache.len() >= self.max_size {
                self.evict_lru();
            }
            tracing::trace!(key, entries = self.cache.len() + 1, "statement cache miss");
            self.cache.insert(
                key,
                CachedStatement {
                    statement,
                    last_used: 0,
                    hit_count: 0,
                },
            );
        }
        let entry = self
            .cache
            .get_mut(&key)
            .ok_or_else(|| Error::Custom("statement cache entry vanished".to_string()))?;
        entry.last_used = self.clock;
        entry.hit_count += 1;
        Ok(&entry.statement)
    }

    /// Build a single-statement builder through the cache.
    pub fn build<S: Statement>(&mut self, statement: &S) -> Result<CompiledStatement> {
        let key = statement.fingerprint()?;
        self.get_or_try_insert(key, || {
            let mut compiled = statement.compile_namespaced(None)?;
            match compiled.len() {
                1 => Ok(compiled.remove(0)),
                n => Err(Error::config(format!(
                    "statement compiles to {n} statements; only single statements are cached"
                ))),
            }
        })
        .cloned()
    }

    /// Check if a statement is cached.
    pub fn contains(&self, key: u64) -> bool {
        self.cache.contains_key(&key)
    }

    /// Number of times `key` has been served, including the first build.
    pub fn hits(&self, key: u64) -> u64 {
        self.cache.get(&key).map_or(0, |entry| entry.hit_count)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Clear all cached statements.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Evict the least-recently-used entry.
    fn evict_lru(&mut self) {
        if let Some((&lru_key, _)) = self.cache.iter().min_by_key(|(_, entry)| entry.last_used) {
            tracing::trace!(key = lru_key, "evicting cached statement");
            self.cache.remove(&lru_key);
        }
    }
}

impl Default for StatementCache {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Compute a hash key for caching from any hashable value.
pub fn cache_key(value: &impl Hash) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Key covering everything that affects the rendered text of a builder.
pub(crate) fn fingerprint(compiler: &SqlCompiler, captured: &impl Debug) -> u64 {
    cache_key(&(
        compiler.dialect().as_str(),
        format!("{:?}", compiler.options()),
        format!("{captured:?}"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::fixtures::{Order, compiler};

    fn statement(sql: &str) -> Result<CompiledStatement> {
        Ok(CompiledStatement {
            sql: sql.to_string(),
            parameters: Vec::new(),
        })
    }

    // ==================== Hits & misses ====================

    #[test]
    fn test_cache_hit() {
        let mut cache = StatementCache::new(10);
        let sql = cache.get_or_try_insert(1, || statement("SELECT 1")).unwrap().sql.clone();
        assert_eq!(sql, "SELECT 1");

        let called = std::cell::Cell::new(false);
        let again = cache
            .get_or_try_insert(1, || {
                called.set(true);
                statement("SELECT 1")
            })
            .unwrap();
        assert_eq!(again.sql, "SELECT 1");
        assert!(!called.get());
        assert_eq!(cache.hits(1), 2);
    }

    #[test]
    fn test_failed_build_is_not_cached() {
        let mut cache = StatementCache::new(10);
        assert!(cache.get_or_try_insert(1, || Err(Error::empty_statement("nothing"))).is_err());
        assert!(cache.is_empty());
    }

    // ==================== Eviction ====================

    #[test]
    fn test_eviction() {
        let mut cache = StatementCache::new(2);
        cache.get_or_try_insert(1, || statement("SELECT 1")).unwrap();
        cache.get_or_try_insert(2, || statement("SELECT 2")).unwrap();
        cache.get_or_try_insert(3, || statement("SELECT 3")).unwrap();

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(1));
        assert!(cache.contains(2));
        assert!(cache.contains(3));
    }

    #[test]
    fn test_lru_ordering() {
        let mut cache = StatementCache::new(2);
        cache.get_or_try_insert(1, || statement("SELECT 1")).unwrap();
        cache.get_or_try_insert(2, || statement("SELECT 2")).unwrap();
        cache.get_or_try_insert(1, || statement("SELECT 1")).unwrap();
        cache.get_or_try_insert(3, || statement("SELECT 3")).unwrap();

        assert!(cache.contains(1));
        assert!(!cache.contains(2));
        assert!(cache.contains(3));

        cache.clear();
        assert!(cache.is_empty());
    }

    // ==================== Fingerprints ====================

    #[test]
    fn test_cache_key_function() {
        assert_eq!(cache_key(&"SELECT 1"), cache_key(&"SELECT 1"));
        assert_ne!(cache_key(&"SELECT 1"), cache_key(&"SELECT 2"));
    }

    #[test]
    fn test_builders_through_cache() {
        let pg = compiler(Dialect::Postgres);
        let ms = compiler(Dialect::SqlServer);
        let mut cache = StatementCache::default();

        let query = pg.from_entity("Order").where_(|t| t[0].field("Id").eq(7));
        let first = cache.build(&query).unwrap();
        let second = cache.build(&query).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);

        let other = ms.from_entity("Order").where_(|t| t[0].field("Id").eq(7));
        assert_ne!(query.fingerprint().unwrap(), other.fingerprint().unwrap());
        cache.build(&other).unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_split_insert_is_not_cached() {
        let pg = compiler(Dialect::Postgres);
        let mut cache = StatementCache::default();
        let orders: Vec<Order> = (1..=3).map(Order::sample).collect();
        let create = pg.create_entity("Order").with_bulk(&orders).batch_size(2);
        let err = cache.build(&create).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err}");
        assert!(cache.is_empty());
    }
}
