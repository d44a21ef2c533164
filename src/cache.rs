use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Mutex, PoisonError},
};

use time::{Duration, OffsetDateTime};

use crate::clock::Clock;

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    /// `None` never expires.
    pub expiry: Option<OffsetDateTime>,
}

impl<V> CacheEntry<V> {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        matches!(self.expiry, Some(expiry) if now > expiry)
    }
}

/// Key/value cache where every entry carries the same time-to-live.
///
/// Expired entries are dropped lazily when read. There is no size bound and
/// no deduplication of concurrent misses: two callers missing at once both
/// run their fetch. The internal lock is never held while fetching.
pub struct TtlCache<K, V> {
    clock: Arc<dyn Clock>,
    ttl: Option<Duration>,
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(clock: Arc<dyn Clock>, ttl: Option<Duration>) -> Self {
        Self {
            clock,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let expired = match entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => return None,
        };
        if expired {
            entries.remove(key);
            return None;
        }
        entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn set(&self, key: K, value: V) {
        let expiry = self.ttl.map(|ttl| self.clock.now() + ttl);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, CacheEntry { value, expiry });
    }

    /// Removes one entry, returning whether it was present.
    pub fn delete(&self, key: &K) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Returns the cached value unless `force` is set or the entry is missing
    /// or stale, in which case `fetch` runs and a successful result is stored.
    pub fn get_or_fetch<E, F>(&self, key: K, force: bool, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if !force {
            if let Some(value) = self.get(&key) {
                metrics::increment_counter!("expin_cache_lookups_total", "outcome" => "hit");
                return Ok(value);
            }
        }
        metrics::increment_counter!("expin_cache_lookups_total", "outcome" => "miss");

        let value = fetch()?;
        self.set(key, value.clone());
        Ok(value)
    }
}
