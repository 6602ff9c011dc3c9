//! Query cache: a process-wide bounded map keyed by composed
//! SQL text plus parameters, with FIFO eviction on overflow and lazy TTL
//! expiry on access.

use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use sqlforge_core::{QueryResult, Value};

struct CacheEntry {
    data: QueryResult,
    expires_at: Instant,
}

/// Derives the cache key for a finalised statement: `sql` alone collides
/// two calls against the same text with different bound values (`id = $1`
/// with `[1]` then `[2]`), so every parameter is folded in too. Grounded on
/// `sqlforge_migrate::hash_plan`'s SHA-256-over-canonical-serialization
/// approach; params are serialized via their `Serialize` impl rather than
/// `Display` so e.g. `Bytes`/`Array` values hash on content, not a summary.
pub fn cache_key(sql: &str, params: &[Value]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sql.as_bytes());
    hasher.update([0u8]);
    for param in params {
        let encoded = serde_json::to_vec(param).unwrap_or_default();
        hasher.update(encoded);
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Bounded cache of finalised-SQL -> query results, supporting selective
/// per-call caching.
pub struct QueryCache {
    entries: Mutex<IndexMap<String, CacheEntry>>,
    max_entries: usize,
}

impl QueryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(IndexMap::new()),
            max_entries,
        }
    }

    /// Returns the cached rows for `key` unless absent or past expiry;
    /// a stale entry is dropped on this access rather than on a timer.
    pub fn get(&self, key: &str) -> Option<QueryResult> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.data.clone()),
            Some(_) => {
                entries.shift_remove(key);
                None
            }
            None => None,
        }
    }

    /// Inserts `data` under `key` with TTL `ttl`, evicting the oldest entry
    /// first if the cache is at capacity.
    pub fn set(&self, key: String, data: QueryResult, ttl: Duration) {
        let mut entries = self.entries.lock();
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            entries.shift_remove_index(0);
        }
        entries.insert(
            key,
            CacheEntry {
                data,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn set_max_size(&mut self, max_entries: usize) {
        self.max_entries = max_entries;
        let mut entries = self.entries.lock();
        while entries.len() > max_entries {
            entries.shift_remove_index(0);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_result() -> QueryResult {
        QueryResult::empty()
    }

    #[test]
    fn cache_key_distinguishes_params() {
        let key_1 = cache_key("SELECT * FROM users WHERE id = $1", &[Value::Int64(1)]);
        let key_2 = cache_key("SELECT * FROM users WHERE id = $1", &[Value::Int64(2)]);
        assert_ne!(key_1, key_2);
    }

    #[test]
    fn cache_key_stable_for_same_sql_and_params() {
        let key_1 = cache_key("SELECT * FROM users WHERE id = $1", &[Value::Int64(1)]);
        let key_2 = cache_key("SELECT * FROM users WHERE id = $1", &[Value::Int64(1)]);
        assert_eq!(key_1, key_2);
    }

    #[test]
    fn hit_returns_cached_rows() {
        let cache = QueryCache::new(10);
        cache.set("select 1".to_string(), empty_result(), Duration::from_secs(60));
        assert!(cache.get("select 1").is_some());
    }

    #[test]
    fn miss_returns_none() {
        let cache = QueryCache::new(10);
        assert!(cache.get("select 1").is_none());
    }

    #[test]
    fn expired_entry_is_evicted_on_access() {
        let cache = QueryCache::new(10);
        cache.set(
            "select 1".to_string(),
            empty_result(),
            Duration::from_millis(0),
        );
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("select 1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn overflow_evicts_oldest_entry_first() {
        let cache = QueryCache::new(2);
        cache.set("a".to_string(), empty_result(), Duration::from_secs(60));
        cache.set("b".to_string(), empty_result(), Duration::from_secs(60));
        cache.set("c".to_string(), empty_result(), Duration::from_secs(60));
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn clear_empties_cache() {
        let cache = QueryCache::new(10);
        cache.set("a".to_string(), empty_result(), Duration::from_secs(60));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn set_max_size_shrinks_and_evicts() {
        let mut cache = QueryCache::new(10);
        cache.set("a".to_string(), empty_result(), Duration::from_secs(60));
        cache.set("b".to_string(), empty_result(), Duration::from_secs(60));
        cache.set_max_size(1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("b").is_some());
    }
}
