//! Bounded caches for serialized inference results.
//!
//! Each endpoint owns one [`ResultCache`]. Keys are the verbatim request
//! sentence, values the JSON body that was sent back, so a cache hit returns
//! byte-identical output without touching the model.

use moka::policy::EvictionPolicy;
use moka::sync::Cache;

/// A thread-safe, fixed-capacity LRU cache from sentence to JSON body.
///
/// Cloning is cheap and clones share the same entries.
#[derive(Clone)]
pub struct ResultCache {
    name: &'static str,
    capacity: u64,
    entries: Cache<String, String>,
}

impl ResultCache {
    /// Create a cache holding at most `capacity` entries. A capacity of zero
    /// stores nothing.
    pub fn new(name: &'static str, capacity: u64) -> Self {
        let entries = Cache::builder()
            .name(name)
            .max_capacity(capacity)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        Self {
            name,
            capacity,
            entries,
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key)
    }

    pub fn insert(&self, key: &str, value: String) {
        if self.capacity == 0 {
            return;
        }
        self.entries.insert(key.to_string(), value);
    }

    /// Return the cached value for `key`, or run `compute` and store its
    /// output.
    ///
    /// Errors are returned as-is and leave the cache untouched. Two callers
    /// missing on the same key at the same time both run `compute`.
    pub fn get_or_try_insert<E, F>(&self, key: &str, compute: F) -> Result<String, E>
    where
        F: FnOnce() -> Result<String, E>,
    {
        if let Some(hit) = self.get(key) {
            tracing::debug!(cache = self.name, "cache hit");
            return Ok(hit);
        }

        tracing::debug!(cache = self.name, "cache miss");
        let value = compute()?;
        self.insert(key, value.clone());
        Ok(value)
    }

    /// Number of live entries after pending evictions are applied.
    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
