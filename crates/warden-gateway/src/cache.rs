//! LRU result cache with TTL for filtered tool responses.
//!
//! Entries expire lazily on read; [`ResultCache::purge_expired`] reclaims the
//! rest.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

struct CacheEntry {
    value: Value,
    user_id: String,
    inserted_at: Instant,
}

/// Thread-safe LRU cache of tool results.
pub struct ResultCache {
    inner: Mutex<CacheInner>,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// Keys from least to most recently used.
    order: Vec<String>,
    max_size: usize,
    ttl: Duration,
}

impl CacheInner {
    fn forget(&mut self, key: &str) {
        self.entries.remove(key);
        self.order.retain(|k| k != key);
    }
}

impl ResultCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        let max_size = max_size.max(1);
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::with_capacity(max_size.min(1024)),
                order: Vec::with_capacity(max_size.min(1024)),
                max_size,
                ttl,
            }),
        }
    }

    /// Cached value for `key`. Returns None on miss or expired entry.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.lock();
        let ttl = inner.ttl;

        let value = match inner.entries.get(key) {
            None => return None,
            Some(entry) if entry.inserted_at.elapsed() >= ttl => None,
            Some(entry) => Some(entry.value.clone()),
        };

        match value {
            Some(value) => {
                if let Some(pos) = inner.order.iter().position(|k| k == key) {
                    let k = inner.order.remove(pos);
                    inner.order.push(k);
                }
                Some(value)
            }
            None => {
                inner.forget(key);
                None
            }
        }
    }

    /// Insert a value computed for `user_id`.
    pub fn put(&self, key: String, user_id: &str, value: Value) {
        let mut inner = self.inner.lock();
        let entry = CacheEntry {
            value,
            user_id: user_id.to_string(),
            inserted_at: Instant::now(),
        };

        if inner.entries.contains_key(&key) {
            inner.order.retain(|k| k != &key);
        } else {
            while inner.entries.len() >= inner.max_size && !inner.order.is_empty() {
                let oldest = inner.order.remove(0);
                inner.entries.remove(&oldest);
            }
        }
        inner.order.push(key.clone());
        inner.entries.insert(key, entry);
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.inner.lock();
        let ttl = inner.ttl;
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.inserted_at.elapsed() >= ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.forget(key);
        }
        expired.len()
    }

    /// Drop every entry computed for `user_id`.
    pub fn invalidate_user(&self, user_id: &str) -> usize {
        let mut inner = self.inner.lock();
        let doomed: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.user_id == user_id)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            inner.forget(key);
        }
        doomed.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
