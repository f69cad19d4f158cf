//! Entity map lookup.
//!
//! The compiler only reads entity metadata through [`EntityMapProvider`];
//! [`EntityMapRegistry`] is the in-memory implementation shipped with the crate.

use std::collections::HashMap;

use crate::Result;
use crate::entity::EntityMap;
use crate::error::Error;

/// Read-only supplier of entity metadata, keyed by entity name.
pub trait EntityMapProvider: Send + Sync {
    fn entity_map(&self, entity: &str) -> Option<&EntityMap>;

    /// Look up a map, failing with a configuration error when it is missing.
    fn require(&self, entity: &str) -> Result<&EntityMap> {
        self.entity_map(entity)
            .ok_or_else(|| Error::config(format!("no entity map registered for `{entity}`")))
    }
}

/// In-memory entity map registry.
#[derive(Debug, Clone, Default)]
pub struct EntityMapRegistry {
    maps: HashMap<String, EntityMap>,
}

impl EntityMapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a map after validating it. Entity names must be unique.
    pub fn register(&mut self, map: EntityMap) -> Result<()> {
        map.validate()?;
        if self.maps.contains_key(&map.entity) {
            return Err(Error::config(format!(
                "entity `{}` is already registered",
                map.entity
            )));
        }
        tracing::debug!(
            entity = %map.entity,
            table = %map.table,
            columns = map.columns.len(),
            sharded = map.is_sharded(),
            "registered entity map"
        );
        self.maps.insert(map.entity.clone(), map);
        Ok(())
    }

    /// Builder-style registration.
    pub fn with(mut self, map: EntityMap) -> Result<Self> {
        self.register(map)?;
        Ok(self)
    }

    /// Load a JSON array of entity maps.
    pub fn from_json(json: &str) -> Result<Self> {
        let maps: Vec<EntityMap> = serde_json::from_str(json)?;
        Self::from_maps(maps)
    }

    pub fn from_maps(maps: impl IntoIterator<Item = EntityMap>) -> Result<Self> {
        let mut registry = Self::new();
        for map in maps {
            registry.register(map)?;
        }
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Registered entity names, sorted.
    pub fn entities(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.maps.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl EntityMapProvider for EntityMapRegistry {
    fn entity_map(&self, entity: &str) -> Option<&EntityMap> {
        self.maps.get(entity)
    }
}
