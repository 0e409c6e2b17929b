//! Message deduplication for flooding.
//!
//! A bounded LRU of message ids. Each id is recorded on first sighting; a
//! second sighting means the message already looped back and must be dropped.
//! The oldest ids are evicted once capacity is reached, so the capacity must
//! exceed the number of distinct messages in flight across the mesh.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

pub const DEFAULT_DEDUP_CAPACITY: usize = 10_000;

pub struct MessageCache {
    seen: Mutex<LruCache<String, ()>>,
}

impl MessageCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            seen: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Record `id`. Returns true if it was already present.
    pub fn check_and_insert(&self, id: &str) -> bool {
        let mut seen = self.seen.lock();
        if seen.get(id).is_some() {
            return true;
        }
        seen.put(id.to_string(), ());
        false
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

impl Default for MessageCache {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}
