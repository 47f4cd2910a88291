//! Per-instance cache for parsed deck files
//!
//! Deck files are read lazily and reused across the operations of a single
//! stage. The cache is scoped to the adapter instance that owns it, so two
//! adapters never observe each other's parsed state.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

/// Cache of parsed deck structures, keyed by name
#[derive(Debug, Default)]
pub struct DeckCache {
    entries: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl DeckCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value for `key`, running `loader` on the first
    /// access. A failed load caches nothing, so a later call retries.
    pub fn get_or_load<T, F>(&self, key: &str, loader: F) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Result<T>,
    {
        if let Some(entry) = self.entries.read().unwrap().get(key) {
            return entry
                .clone()
                .downcast::<T>()
                .map_err(|_| type_mismatch(key));
        }

        let mut entries = self.entries.write().unwrap();
        if let Some(entry) = entries.get(key) {
            return entry
                .clone()
                .downcast::<T>()
                .map_err(|_| type_mismatch(key));
        }

        let value = Arc::new(loader()?);
        entries.insert(key.to_string(), value.clone());
        Ok(value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().unwrap().contains_key(key)
    }

    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }
}

fn type_mismatch(key: &str) -> Error {
    Error::Validation(format!(
        "Cached entry '{}' was stored with a different type",
        key
    ))
}
