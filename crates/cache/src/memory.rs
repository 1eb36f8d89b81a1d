use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;

/// Bounded, strictly least-recently-used cache of decoded page images.
///
/// Pure in-memory bookkeeping with no locking of its own: callers sharing one
/// across threads wrap it in a mutex.
pub struct MemoryImageCache<K: Hash + Eq, V> {
    entries: LruCache<K, V>,
}
impl<K: Hash + Eq, V> MemoryImageCache<K, V> {
    /// A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { entries: LruCache::new(capacity) }
    }

    /// Look up an entry, making it the most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Insert or refresh an entry.
    ///
    /// Returns whatever had to be evicted to make room.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        if self.entries.contains(&key) {
            self.entries.put(key, value);
            return None;
        }
        self.entries.push(key, value)
    }

    /// Membership test that does not touch recency.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains(key)
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(cache: &MemoryImageCache<&'static str, u32>) -> Vec<&'static str> {
        let mut keys: Vec<_> = cache.keys().copied().collect();
        keys.sort();
        keys
    }

    #[test]
    fn test_evicts_least_recent() {
        let mut cache = MemoryImageCache::new(2);
        assert!(cache.put("a", 1).is_none());
        assert!(cache.put("b", 2).is_none());
        assert_eq!(cache.put("c", 3), Some(("a", 1)));
        assert_eq!(keys(&cache), ["b", "c"]);
    }

    #[test]
    fn test_get_promotes() {
        let mut cache = MemoryImageCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("c", 3);
        assert_eq!(cache.get(&"b"), Some(&2));
        assert_eq!(cache.put("d", 4), Some(("c", 3)));
        assert_eq!(keys(&cache), ["b", "d"]);
    }

    #[test]
    fn test_put_existing_refreshes() {
        let mut cache = MemoryImageCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        assert!(cache.put("a", 10).is_none());
        assert_eq!(cache.put("c", 3), Some(("b", 2)));
        assert_eq!(cache.get(&"a"), Some(&10));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_contains_does_not_promote() {
        let mut cache = MemoryImageCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        assert!(cache.contains(&"a"));
        cache.put("c", 3);
        assert!(!cache.contains(&"a"));
    }

    #[test]
    fn test_keys_most_recent_first() {
        let mut cache = MemoryImageCache::new(3);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.get(&"a");
        assert_eq!(cache.keys().copied().collect::<Vec<_>>(), ["a", "b"]);
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let mut cache = MemoryImageCache::new(0);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.capacity(), 1);
        assert_eq!(keys(&cache), ["b"]);
    }
}
