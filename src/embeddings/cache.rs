use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Bounded LRU cache for query embeddings, keyed by (model, query).
///
/// Vectors from different embedding models are not interchangeable, so a
/// configuration switch to another model must miss instead of serving
/// stale vectors for the same query text.
pub struct EmbeddingCache {
    cache: Mutex<LruCache<(String, String), Vec<f32>>>,
}

impl EmbeddingCache {
    /// Capacity is clamped to at least 1 (the LRU requires a non-zero
    /// capacity).
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1))
            .expect("Cache capacity must be at least 1");
        Self {
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn get(&self, model: &str, query: &str) -> Option<Vec<f32>> {
        let key = (model.to_string(), query.to_string());
        self.cache.lock().unwrap().get(&key).cloned()
    }

    pub fn put(&self, model: &str, query: &str, embedding: Vec<f32>) {
        self.cache
            .lock()
            .unwrap()
            .put((model.to_string(), query.to_string()), embedding);
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = "text-embedding-3-small";

    #[test]
    fn test_hit_requires_matching_model_and_query() {
        let cache = EmbeddingCache::new(10);
        cache.put(MODEL, "rust ownership", vec![0.1, 0.2]);

        assert_eq!(
            cache.get(MODEL, "rust ownership"),
            Some(vec![0.1, 0.2])
        );
        // Same query under another model must miss
        assert!(cache.get("text-embedding-3-large", "rust ownership").is_none());
        assert!(cache.get(MODEL, "different query").is_none());
    }

    #[test]
    fn test_least_recently_used_entry_is_evicted() {
        let cache = EmbeddingCache::new(2);
        cache.put(MODEL, "first", vec![1.0]);
        cache.put(MODEL, "second", vec![2.0]);

        // Touch "first" so "second" becomes the eviction candidate
        let _ = cache.get(MODEL, "first");
        cache.put(MODEL, "third", vec![3.0]);

        assert!(cache.get(MODEL, "first").is_some());
        assert!(cache.get(MODEL, "second").is_none());
        assert!(cache.get(MODEL, "third").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let cache = EmbeddingCache::new(0);
        assert!(cache.is_empty());
        cache.put(MODEL, "query", vec![1.0]);
        assert_eq!(cache.len(), 1);
    }
}
