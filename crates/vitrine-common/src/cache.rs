//! Bounded key/value cache with least-recently-used eviction
//!
//! Thin wrapper over `moka::sync::Cache` configured with the LRU policy, so
//! eviction follows access recency rather than insertion order.

use std::hash::Hash;

use moka::policy::EvictionPolicy;
use moka::sync::Cache;

#[derive(Clone)]
pub struct EvictionCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Cache<K, V>,
    capacity: u64,
}

impl<K, V> EvictionCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache holding at most `capacity` entries
    pub fn new(capacity: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(capacity)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self { inner, capacity }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key)
    }

    pub fn put(&self, key: K, value: V) {
        self.inner.insert(key, value);
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.remove(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Approximate number of live entries; exact after `sync`
    pub fn len(&self) -> u64 {
        self.inner.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply pending evictions and bookkeeping
    pub fn sync(&self) {
        self.inner.run_pending_tasks();
    }

    pub fn clear(&self) {
        self.inner.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_remove() {
        let cache: EvictionCache<String, String> = EvictionCache::new(4);
        cache.put("blog_web".to_string(), "172.18.0.2".to_string());

        assert_eq!(cache.get(&"blog_web".to_string()).as_deref(), Some("172.18.0.2"));
        assert!(cache.contains(&"blog_web".to_string()));

        cache.remove(&"blog_web".to_string());
        assert!(cache.get(&"blog_web".to_string()).is_none());
    }

    #[test]
    fn test_capacity_is_bounded() {
        let cache: EvictionCache<u32, u32> = EvictionCache::new(3);
        for i in 0..50 {
            cache.put(i, i * 2);
        }
        cache.sync();

        assert!(cache.len() <= 3);
        assert_eq!(cache.capacity(), 3);
    }

    #[test]
    fn test_overwrite_keeps_latest_value() {
        let cache: EvictionCache<&'static str, u32> = EvictionCache::new(2);
        cache.put("a", 1);
        cache.put("a", 2);
        assert_eq!(cache.get(&"a"), Some(2));
    }

    #[test]
    fn test_clear() {
        let cache: EvictionCache<u32, u32> = EvictionCache::new(8);
        cache.put(1, 1);
        cache.put(2, 2);
        cache.clear();
        cache.sync();
        assert!(cache.is_empty());
    }
}
