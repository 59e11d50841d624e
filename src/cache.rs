//! Time-bounded memoization of fetch results.
//!
//! Entries are keyed by a string that encodes the fetch parameters. An entry
//! older than the TTL is treated as missing; a TTL of zero disables caching.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A TTL cache over cloneable values.
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: HashMap<String, CachedEntry<V>>,
    ttl: Duration,
}

#[derive(Debug)]
struct CachedEntry<V> {
    value: V,
    cached_at: Instant,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Look up a fresh value. Returns `None` if missing or expired.
    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key).and_then(|entry| {
            if entry.cached_at.elapsed() < self.ttl {
                Some(entry.value.clone())
            } else {
                None
            }
        })
    }

    /// Store `value` under `key`, dropping expired entries first. Nothing is
    /// stored when the TTL is zero.
    pub fn insert(&mut self, key: String, value: V) {
        self.purge_expired();
        if self.ttl.is_zero() {
            return;
        }
        self.entries.insert(
            key,
            CachedEntry {
                value,
                cached_at: Instant::now(),
            },
        );
    }

    /// Return the cached value for `key`, or compute and store it.
    ///
    /// The flag is `true` on a cache hit. Errors from `fetch` are returned
    /// as-is and nothing is stored.
    pub fn get_or_try_insert_with<E, F>(&mut self, key: &str, fetch: F) -> Result<(V, bool), E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(value) = self.get(key) {
            return Ok((value, true));
        }
        let value = fetch()?;
        self.insert(key.to_string(), value.clone());
        Ok((value, false))
    }

    /// Drop every expired entry.
    pub fn purge_expired(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.cached_at.elapsed() < ttl);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
