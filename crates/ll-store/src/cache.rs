//! Bounded LRU cache for parsed documents, invalidated by modification time.
//!
//! Comparing the stored mtime against the file's current mtime on every get
//! catches external edits without hashing content on each read. Reads and
//! writes both mutate recency order, so a single exclusive mutex guards the
//! whole structure — cache operations are O(1) map access plus one stat, and
//! correctness beats read-path parallelism here.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use serde_json::Value;

use crate::documents::DocumentStore;

pub const DEFAULT_CAPACITY: usize = 256;

/// Point-in-time counters for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub len: usize,
    pub capacity: usize,
}

struct CacheEntry {
    payload: Value,
    mtime_ms: i64,
}

struct CacheInner {
    map: HashMap<String, CacheEntry>,
    /// Recency order: front = least recently used.
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

pub struct DocumentCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

impl DocumentCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            capacity: capacity.max(1),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    /// Look up a cached document body. A miss is a normal outcome, never an
    /// error: absent key, vanished file, or changed mtime (the latter two
    /// also evict the stale entry).
    pub fn get(&self, docs: &dyn DocumentStore, path: &str) -> Option<Value> {
        let mut inner = self.lock();

        if !inner.map.contains_key(path) {
            inner.misses += 1;
            return None;
        }

        let current_mtime = docs.mtime_ms(path).ok().flatten();
        let stored_mtime = inner.map.get(path).map(|e| e.mtime_ms);
        if current_mtime != stored_mtime {
            inner.map.remove(path);
            inner.order.retain(|k| k != path);
            inner.misses += 1;
            return None;
        }

        // Promote to most-recently-used
        inner.order.retain(|k| k != path);
        inner.order.push_back(path.to_string());
        inner.hits += 1;
        inner.map.get(path).map(|e| e.payload.clone())
    }

    /// Insert a document body, recording the file's mtime at put time.
    /// Replaces an existing entry; at capacity, evicts the single least
    /// recently used entry first. A file that cannot be stat'ed is not
    /// cached — the next get would evict it anyway.
    pub fn put(&self, docs: &dyn DocumentStore, path: &str, payload: Value) {
        let Some(mtime_ms) = docs.mtime_ms(path).ok().flatten() else {
            return;
        };

        let mut inner = self.lock();

        if inner.map.contains_key(path) {
            inner.order.retain(|k| k != path);
        } else if inner.map.len() >= self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.map.remove(&oldest);
                inner.evictions += 1;
            }
        }

        inner.map.insert(path.to_string(), CacheEntry { payload, mtime_ms });
        inner.order.push_back(path.to_string());
    }

    pub fn invalidate(&self, path: &str) {
        let mut inner = self.lock();
        if inner.map.remove(path).is_some() {
            inner.order.retain(|k| k != path);
        }
    }

    pub fn invalidate_all(&self) {
        let mut inner = self.lock();
        inner.map.clear();
        inner.order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            len: inner.map.len(),
            capacity: self.capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        // A poisoned lock only means another thread panicked mid-operation;
        // the map itself is still structurally sound.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
