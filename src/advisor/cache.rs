//! Short-lived memo of expensive distinct-count queries.
//!
//! Entries expire after a caller-chosen TTL; failed computations are never
//! cached. The cache is injected into the advisor so several analysis runs
//! can share it.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::trace;

use crate::catalog::ColumnKey;
use crate::error::Result;

/// Statistics about cache performance.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub evictions: u64,
    pub total_entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    value: u64,
    created_at: Instant,
    last_accessed: Instant,
}

/// Memo of `(table, column) -> distinct count`.
pub struct CardinalityCache {
    ttl: Duration,
    max_entries: usize,
    entries: RwLock<HashMap<ColumnKey, CacheEntry>>,
    stats: RwLock<CacheStats>,
}

impl CardinalityCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            max_entries: 4096,
            entries: RwLock::new(HashMap::new()),
            stats: RwLock::new(CacheStats::default()),
        }
    }

    pub fn with_max_entries(mut self, n: usize) -> Self {
        self.max_entries = n.max(1);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached value for `key`, or compute, store and return it.
    pub fn get_or_compute<F>(&self, key: &ColumnKey, supplier: F) -> Result<u64>
    where
        F: FnOnce() -> Result<u64>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let value = supplier()?;
        self.put(key.clone(), value);
        Ok(value)
    }

    /// Look up a live entry.
    pub fn get(&self, key: &ColumnKey) -> Option<u64> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let mut stats = self.stats.write();

        match entries.get_mut(key) {
            Some(entry) if now.duration_since(entry.created_at) <= self.ttl => {
                entry.last_accessed = now;
                stats.hits += 1;
                trace!(%key, "cardinality cache hit");
                Some(entry.value)
            }
            Some(_) => {
                entries.remove(key);
                stats.expirations += 1;
                stats.misses += 1;
                stats.total_entries = entries.len();
                None
            }
            None => {
                stats.misses += 1;
                trace!(%key, "cardinality cache miss");
                None
            }
        }
    }

    pub fn put(&self, key: ColumnKey, value: u64) {
        let now = Instant::now();
        let mut entries = self.entries.write();
        while entries.len() >= self.max_entries && !entries.contains_key(&key) {
            if !self.evict_lru(&mut entries) {
                break;
            }
        }
        entries.insert(
            key,
            CacheEntry {
                value,
                created_at: now,
                last_accessed: now,
            },
        );
        self.stats.write().total_entries = entries.len();
    }

    pub fn clear(&self) {
        self.entries.write().clear();
        self.stats.write().total_entries = 0;
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.read().clone()
    }

    fn evict_lru(&self, entries: &mut HashMap<ColumnKey, CacheEntry>) -> bool {
        let lru_key = entries
            .iter()
            .min_by_key(|(_, e)| e.last_accessed)
            .map(|(k, _)| k.clone());

        match lru_key {
            Some(key) => {
                entries.remove(&key);
                self.stats.write().evictions += 1;
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for CardinalityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("CardinalityCache")
            .field("ttl", &self.ttl)
            .field("entries", &stats.total_entries)
            .field("hit_rate", &format!("{:.1}%", stats.hit_rate() * 100.0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryWatchError;
    use std::cell::Cell;

    fn key(column: &str) -> ColumnKey {
        ColumnKey::new("tabUser", column)
    }

    #[test]
    fn test_get_or_compute_memoizes() {
        let cache = CardinalityCache::new(Duration::from_secs(60));
        let calls = Cell::new(0);
        let compute = || {
            calls.set(calls.get() + 1);
            Ok(42)
        };
        assert_eq!(cache.get_or_compute(&key("email"), compute).unwrap(), 42);
        assert_eq!(cache.get_or_compute(&key("email"), || Ok(7)).unwrap(), 42);
        assert_eq!(calls.get(), 1);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_expired_entries_recomputed() {
        let cache = CardinalityCache::new(Duration::ZERO);
        cache.put(key("email"), 1);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get_or_compute(&key("email"), || Ok(2)).unwrap(), 2);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_errors_not_cached() {
        let cache = CardinalityCache::new(Duration::from_secs(60));
        let err = cache
            .get_or_compute(&key("email"), || Err(QueryWatchError::timeout("slow")))
            .unwrap_err();
        assert!(matches!(err, QueryWatchError::Timeout { .. }));
        assert_eq!(cache.get_or_compute(&key("email"), || Ok(5)).unwrap(), 5);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = CardinalityCache::new(Duration::from_secs(60)).with_max_entries(2);
        cache.put(key("a"), 1);
        std::thread::sleep(Duration::from_millis(2));
        cache.put(key("b"), 2);
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(cache.get(&key("a")), Some(1));
        cache.put(key("c"), 3);
        assert_eq!(cache.get(&key("b")), None);
        assert_eq!(cache.get(&key("a")), Some(1));
        assert_eq!(cache.stats().evictions, 1);
    }
}
