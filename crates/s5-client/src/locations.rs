//! Storage location cache
//!
//! Maps a blob's base64url multihash to the URL it was last found at. The
//! cache is owned by the client and shared between its clones; concurrent
//! lookups for the same hash may both hit the portal, and the last insert wins.

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

/// Pluggable cache of resolved download URLs
pub trait LocationCache: Send + Sync {
    /// Cached URL for a hash
    fn get(&self, hash: &str) -> Option<String>;

    /// Remember a URL for a hash
    fn insert(&self, hash: String, url: String);

    /// Forget a hash, e.g. after its URL stopped working
    fn remove(&self, hash: &str) -> Option<String>;

    /// Number of cached entries
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cache that never evicts
#[derive(Debug, Default)]
pub struct UnboundedLocationCache {
    entries: DashMap<String, String>,
}

impl UnboundedLocationCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocationCache for UnboundedLocationCache {
    fn get(&self, hash: &str) -> Option<String> {
        self.entries.get(hash).map(|entry| entry.value().clone())
    }

    fn insert(&self, hash: String, url: String) {
        self.entries.insert(hash, url);
    }

    fn remove(&self, hash: &str) -> Option<String> {
        self.entries.remove(hash).map(|(_, url)| url)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Cache holding at most `capacity` entries, evicting the least recently used
pub struct LruLocationCache {
    entries: Mutex<LruCache<String, String>>,
}

impl LruLocationCache {
    /// Create a cache; a capacity of zero is treated as one
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl LocationCache for LruLocationCache {
    fn get(&self, hash: &str) -> Option<String> {
        self.entries.lock().get(hash).cloned()
    }

    fn insert(&self, hash: String, url: String) {
        self.entries.lock().put(hash, url);
    }

    fn remove(&self, hash: &str) -> Option<String> {
        self.entries.lock().pop(hash)
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
