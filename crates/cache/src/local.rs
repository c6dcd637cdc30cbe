//! In-process TTL cache backed by DashMap for lock-free concurrent access.
//! Holds the latest score snapshot per visitor so score reads skip the store.

use crate::score::ScoreCache;
use dashmap::DashMap;
use lead_core::types::ScoreSnapshot;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

struct CacheEntry {
    snapshot: ScoreSnapshot,
    inserted_at: Instant,
}

/// Lock-free local cache for visitor score snapshots.
pub struct LocalCache {
    store: Arc<DashMap<String, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
}

impl LocalCache {
    pub fn new(ttl_secs: u64, max_entries: usize) -> Self {
        Self::with_ttl(Duration::from_secs(ttl_secs), max_entries)
    }

    pub fn with_ttl(ttl: Duration, max_entries: usize) -> Self {
        Self {
            store: Arc::new(DashMap::new()),
            ttl,
            max_entries,
        }
    }

    /// Remove expired entries. Call this periodically from a background task.
    pub fn evict_expired(&self) -> usize {
        let before = self.store.len();
        self.store
            .retain(|_, entry| entry.inserted_at.elapsed() <= self.ttl);
        let evicted = before.saturating_sub(self.store.len());
        if evicted > 0 {
            debug!(evicted = evicted, "score cache eviction complete");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

impl ScoreCache for LocalCache {
    /// Returns None if expired or missing.
    fn get(&self, visitor_id: &str) -> Option<ScoreSnapshot> {
        let Some(entry) = self.store.get(visitor_id) else {
            metrics::counter!("score_cache.miss").increment(1);
            return None;
        };
        if entry.inserted_at.elapsed() > self.ttl {
            drop(entry);
            self.store.remove(visitor_id);
            metrics::counter!("score_cache.miss").increment(1);
            return None;
        }
        metrics::counter!("score_cache.hit").increment(1);
        Some(entry.snapshot.clone())
    }

    fn put(&self, visitor_id: &str, snapshot: ScoreSnapshot) {
        // Over capacity: skip new keys, background eviction frees room
        if self.store.len() >= self.max_entries && !self.store.contains_key(visitor_id) {
            return;
        }
        self.store.insert(
            visitor_id.to_string(),
            CacheEntry {
                snapshot,
                inserted_at: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lead_core::types::VisitorStatus;

    fn snapshot(id: &str, lead_score: u8) -> ScoreSnapshot {
        ScoreSnapshot {
            visitor_id: id.to_string(),
            status: VisitorStatus::Anonymous,
            engagement_score: 30,
            lead_score,
            computed_at: Utc::now(),
        }
    }

    #[test]
    fn test_put_then_get() {
        let cache = LocalCache::new(60, 10);
        cache.put("v1", snapshot("v1", 15));
        assert_eq!(cache.get("v1").unwrap().lead_score, 15);
        assert!(cache.get("v2").is_none());
    }

    #[test]
    fn test_put_overwrites() {
        let cache = LocalCache::new(60, 10);
        cache.put("v1", snapshot("v1", 15));
        cache.put("v1", snapshot("v1", 40));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("v1").unwrap().lead_score, 40);
    }

    #[test]
    fn test_expired_entries_are_not_returned() {
        let cache = LocalCache::with_ttl(Duration::ZERO, 10);
        cache.put("v1", snapshot("v1", 15));
        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.get("v1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_evict_expired() {
        let cache = LocalCache::with_ttl(Duration::ZERO, 10);
        cache.put("v1", snapshot("v1", 15));
        cache.put("v2", snapshot("v2", 20));
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(cache.evict_expired(), 2);
    }

    #[test]
    fn test_capacity_skips_new_keys_only() {
        let cache = LocalCache::new(60, 1);
        cache.put("v1", snapshot("v1", 15));
        cache.put("v2", snapshot("v2", 20));
        assert!(cache.get("v2").is_none());

        cache.put("v1", snapshot("v1", 50));
        assert_eq!(cache.get("v1").unwrap().lead_score, 50);
    }
}
