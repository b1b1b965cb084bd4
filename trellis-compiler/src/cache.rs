//! Bounded LRU cache of compiled modules.
//!
//! Entries are keyed by absolute path and remember the source mtime they were
//! built from. A lookup only hits when the caller's mtime matches; a stale
//! entry is dropped on the spot.

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Capacity used when a zero capacity is requested.
const MIN_CAPACITY: NonZeroUsize = NonZeroUsize::MIN;

/// A compiled module and the mtime it was compiled from.
#[derive(Debug, Clone)]
pub struct CompiledModuleEntry {
    pub key: PathBuf,
    pub mtime: SystemTime,
    pub code: Arc<str>,
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Thread-safe module cache shared by all requests.
pub struct ModuleCache {
    entries: Mutex<LruCache<PathBuf, CompiledModuleEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ModuleCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(MIN_CAPACITY);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Get the cached code for `key` if it was built from `mtime`.
    pub fn get(&self, key: &Path, mtime: SystemTime) -> Option<Arc<str>> {
        let mut entries = self.entries.lock();
        let fresh = match entries.get(key).map(|e| (e.mtime == mtime, e.code.clone())) {
            Some((true, code)) => Some(code),
            Some((false, _)) => {
                entries.pop(key);
                None
            }
            None => None,
        };
        drop(entries);

        let counter = if fresh.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        fresh
    }

    /// Store an entry, evicting the least recently used one when full.
    pub fn insert(&self, entry: CompiledModuleEntry) {
        let key = entry.key.clone();
        let displaced = self.entries.lock().push(key.clone(), entry);
        if let Some((old_key, _)) = displaced {
            if old_key != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Remove a single entry.
    pub fn invalidate(&self, key: &Path) -> bool {
        self.entries.lock().pop(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn contains(&self, key: &Path) -> bool {
        self.entries.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        CacheStats {
            entries: entries.len(),
            capacity: entries.cap().get(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
