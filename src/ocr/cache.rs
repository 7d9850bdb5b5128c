//! In-memory LRU cache of provider results with TTL.
//! Key: blake3 hash of the submitted image bytes. Only successful
//! recognitions are stored; errors always go back to the provider.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use super::RawTextLine;

struct CacheEntry {
    lines: Arc<Vec<RawTextLine>>,
    inserted_at: Instant,
}

pub struct OcrResultCache {
    inner: Mutex<LruCache<[u8; 32], CacheEntry>>,
    ttl: Duration,
}

impl OcrResultCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            ttl,
        }
    }

    pub fn compute_key(image: &[u8]) -> [u8; 32] {
        *blake3::hash(image).as_bytes()
    }

    /// Look up cached lines. Returns None if absent or expired.
    pub fn get(&self, key: &[u8; 32]) -> Option<Arc<Vec<RawTextLine>>> {
        let mut cache = self.inner.lock();
        if let Some(entry) = cache.get(key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Some(Arc::clone(&entry.lines));
            }
            cache.pop(key);
        }
        None
    }

    pub fn insert(&self, key: [u8; 32], lines: Vec<RawTextLine>) -> Arc<Vec<RawTextLine>> {
        let lines = Arc::new(lines);
        self.inner.lock().put(
            key,
            CacheEntry {
                lines: Arc::clone(&lines),
                inserted_at: Instant::now(),
            },
        );
        lines
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
