//! Semantic cache (spec §4.14): caches fusion/query results keyed by a
//! content hash of the request, with simple LRU eviction once capacity is
//! reached. Purely in-memory -- a cache miss just re-runs the query, so
//! there is nothing to recover after a restart.

use crate::value::Value;
use std::collections::HashMap;
use std::sync::Mutex;

/// Deterministic cache key derived from the request shape, reusing
/// `Value::canonical_bytes` so equal requests always hash identically
/// regardless of field insertion order.
pub fn cache_key(parts: &[Value]) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for p in parts {
        p.canonical_bytes().hash(&mut hasher);
    }
    hasher.finish()
}

struct Entry<V> {
    value: V,
    last_used: u64,
}

/// Thread-safe, fixed-capacity LRU cache. `clock` is a logical tick supplied
/// by the caller rather than wall-clock time, so cache behavior is
/// deterministic in tests.
pub struct SemanticCache<V: Clone> {
    capacity: usize,
    entries: Mutex<HashMap<u64, Entry<V>>>,
    clock: std::sync::atomic::AtomicU64,
}

impl<V: Clone> SemanticCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(HashMap::new()),
            clock: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }

    pub fn get(&self, key: u64) -> Option<V> {
        let now = self.tick();
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.get_mut(&key)?;
        entry.last_used = now;
        Some(entry.value.clone())
    }

    pub fn put(&self, key: u64, value: V) {
        let now = self.tick();
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            if let Some(&lru_key) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k)
            {
                entries.remove(&lru_key);
            }
        }
        entries.insert(key, Entry { value, last_used: now });
    }

    pub fn invalidate_all(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_request_shapes_hash_to_the_same_key() {
        let a = cache_key(&[Value::String("q".into()), Value::I64(5)]);
        let b = cache_key(&[Value::String("q".into()), Value::I64(5)]);
        assert_eq!(a, b);
    }

    #[test]
    fn get_put_round_trips_until_evicted() {
        let cache: SemanticCache<String> = SemanticCache::new(2);
        cache.put(1, "a".to_string());
        cache.put(2, "b".to_string());
        assert_eq!(cache.get(1), Some("a".to_string()));
        cache.put(3, "c".to_string());
        // Key 2 was least recently used (1 was just re-touched by `get`).
        assert_eq!(cache.get(2), None);
        assert_eq!(cache.get(1), Some("a".to_string()));
        assert_eq!(cache.get(3), Some("c".to_string()));
    }
}
