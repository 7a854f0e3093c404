//! Fetch-scoped cache of shared sub-entities
//!
//! Lives for one fetch call. Keys are `pub:<id>`, `res:<id>` and `ver:<id>`; a
//! cached `None` records a lookup that found nothing.

use std::collections::HashMap;

use crate::entity::{Entity, FromInput};
use crate::Result;

#[derive(Debug, Default)]
pub struct FetchCache {
    entries: HashMap<String, Option<Entity>>,
    misses: usize,
}

impl FetchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(prefix: &str, id: i64) -> String {
        format!("{}:{}", prefix, id)
    }

    /// Cached value for `key`, loading it on first use
    pub fn get_or_load<T, F>(&mut self, key: String, load: F) -> Result<Option<T>>
    where
        T: FromInput + Clone + Into<Entity>,
        F: FnOnce() -> Result<Option<T>>,
    {
        if let Some(entry) = self.entries.get(&key) {
            return Ok(entry.as_ref().and_then(T::from_entity));
        }
        self.misses += 1;
        let value = load()?;
        self.entries.insert(key, value.clone().map(Into::into));
        Ok(value)
    }

    /// Number of loads performed
    pub fn misses(&self) -> usize {
        self.misses
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Version;

    #[test]
    fn test_loads_once_per_key() {
        let mut cache = FetchCache::new();
        let mut loads = 0;
        for _ in 0..3 {
            let found = cache
                .get_or_load(FetchCache::key("ver", 1), || {
                    loads += 1;
                    Ok(Some(Version {
                        id: Some(1),
                        ..Version::default()
                    }))
                })
                .unwrap();
            assert_eq!(found.unwrap().id, Some(1));
        }
        assert_eq!(loads, 1);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn test_missing_rows_are_cached() {
        let mut cache = FetchCache::new();
        let first: Option<Version> = cache.get_or_load(FetchCache::key("ver", 9), || Ok(None)).unwrap();
        assert!(first.is_none());
        let second: Option<Version> = cache
            .get_or_load(FetchCache::key("ver", 9), || panic!("should not reload"))
            .unwrap();
        assert!(second.is_none());
        assert_eq!(cache.len(), 1);
    }
}
