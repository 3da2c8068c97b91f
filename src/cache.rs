//! Keyed in-memory cache with per-entry expiry.
//!
//! Expiration is lazy: an expired entry is evicted on the read that finds
//! it. There is no other eviction policy; callers bound the key space by
//! construction (cache keys are canonical tuples of request inputs).

use dashmap::DashMap;
use std::time::{Duration, Instant};

struct Entry {
    value: serde_json::Value,
    expires_at: Instant,
}

/// Concurrent TTL cache for upstream responses.
#[derive(Default)]
pub struct TtlCache {
    entries: DashMap<String, Entry>,
}

impl TtlCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value if present and unexpired; evicts and
    /// returns `None` otherwise.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let hit = match self.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => None,
            None => return None,
        };
        if hit.is_none() {
            self.entries.remove(key);
        }
        hit
    }

    pub fn put(&self, key: String, value: serde_json::Value, ttl: Duration) {
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Number of live entries, counting not-yet-evicted expired ones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
