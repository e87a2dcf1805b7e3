//! Session-scoped result cache.
//!
//! Entries are only created on explicit request and live until evicted or
//! the owning session is dropped. The first writer of a key wins; readers
//! share the stored frame through an [`Arc`].

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::frame::Frame;

#[derive(Debug, Default)]
pub struct ResultCache {
    entries: DashMap<String, Arc<Frame>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `frame` under `key` unless an entry already exists, and
    /// returns the stored entry.
    pub fn put(&self, key: &str, frame: Arc<Frame>) -> Arc<Frame> {
        let entry = self.entries.entry(key.to_string()).or_insert_with(|| {
            debug!(rows = frame.num_rows(), "caching result");
            frame
        });
        entry.value().clone()
    }

    pub fn get(&self, key: &str) -> Option<Arc<Frame>> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Releases one entry. Returns whether it was present.
    pub fn evict(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
