//! Bounded LRU cache for by-id document reads.
//!
//! Keys are (collection, id). Every write path invalidates its key before
//! the write reaches the backend, so a hit can be stale only by what the
//! caller's own transaction has not committed yet.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde_json::Value as JsonValue;

use trellis_core::EntityId;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    collection: &'static str,
    id: EntityId,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<CacheKey, JsonValue>,
    // Front is least recently used.
    order: VecDeque<CacheKey>,
}

impl CacheInner {
    fn touch(&mut self, key: &CacheKey) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key.clone());
    }
}

/// Bounded read-through cache shared by the repositories of a context.
#[derive(Debug)]
pub struct DocumentCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl DocumentCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn get(&self, collection: &'static str, id: EntityId) -> Option<JsonValue> {
        let key = CacheKey { collection, id };
        let mut inner = self.inner.lock().ok()?;
        let doc = inner.entries.get(&key).cloned()?;
        inner.touch(&key);
        Some(doc)
    }

    pub fn insert(&self, collection: &'static str, id: EntityId, document: JsonValue) {
        let key = CacheKey { collection, id };
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.entries.len() >= self.capacity && !inner.entries.contains_key(&key) {
            if let Some(evicted) = inner.order.pop_front() {
                inner.entries.remove(&evicted);
            }
        }
        inner.entries.insert(key.clone(), document);
        inner.touch(&key);
    }

    pub fn invalidate(&self, collection: &'static str, id: EntityId) {
        let key = CacheKey { collection, id };
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.entries.remove(&key);
        if let Some(pos) = inner.order.iter().position(|k| *k == key) {
            inner.order.remove(pos);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
