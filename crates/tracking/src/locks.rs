//! Per-key mutual exclusion for visitor read-modify-write cycles.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Serializes closures that share a key; different keys never contend.
/// Entries are pruned once no caller holds them.
#[derive(Default)]
pub struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `key`.
    pub fn with_lock<R>(&self, key: &str, f: impl FnOnce() -> R) -> R {
        let handle = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();

        let result = {
            let _guard = handle.lock();
            f()
        };

        drop(handle);
        self.locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_returns_closure_result_and_prunes() {
        let locks = KeyedLocks::new();
        let value = locks.with_lock("id:v1", || 42);
        assert_eq!(value, 42);
        assert!(locks.is_empty());
    }

    #[test]
    fn test_same_key_is_serialized() {
        let locks = KeyedLocks::new();
        let inside = AtomicUsize::new(0);
        let max_inside = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..50 {
                        locks.with_lock("id:v1", || {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_inside.fetch_max(now, Ordering::SeqCst);
                            std::thread::yield_now();
                            inside.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                });
            }
        });

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[test]
    fn test_nested_distinct_keys() {
        let locks = KeyedLocks::new();
        let value = locks.with_lock("id:a", || locks.with_lock("id:b", || locks.len()));
        assert_eq!(value, 2);
    }
}
