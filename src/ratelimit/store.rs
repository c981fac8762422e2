//! In-memory limiter store.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

use super::algorithm::LimiterEntry;
use super::backend::{LimiterStore, StoreError, StoreStats};
use super::rules::Strategy;

/// Process-local store with one sharded map per strategy.
///
/// Updates run under the shard lock of the key being updated, so concurrent
/// callers on the same key are serialized while unrelated keys on other
/// shards proceed in parallel.
#[derive(Debug, Default)]
pub struct MemoryStore {
    fixed: DashMap<String, LimiterEntry>,
    sliding: DashMap<String, LimiterEntry>,
    token_bucket: DashMap<String, LimiterEntry>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, strategy: Strategy) -> &DashMap<String, LimiterEntry> {
        match strategy {
            Strategy::Fixed => &self.fixed,
            Strategy::Sliding => &self.sliding,
            Strategy::TokenBucket => &self.token_bucket,
        }
    }

    /// Number of keys held for a strategy.
    pub fn len(&self, strategy: Strategy) -> usize {
        self.map(strategy).len()
    }

    /// Whether no strategy holds any key.
    pub fn is_empty(&self) -> bool {
        Strategy::ALL.iter().all(|s| self.map(*s).is_empty())
    }
}

impl LimiterStore for MemoryStore {
    fn get(&self, strategy: Strategy, key: &str) -> Result<Option<LimiterEntry>, StoreError> {
        Ok(self.map(strategy).get(key).map(|entry| entry.value().clone()))
    }

    fn update(
        &self,
        strategy: Strategy,
        key: &str,
        f: &mut dyn FnMut(Option<&LimiterEntry>) -> Option<LimiterEntry>,
    ) -> Result<(), StoreError> {
        match self.map(strategy).entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if let Some(next) = f(Some(occupied.get())) {
                    occupied.insert(next);
                }
            }
            Entry::Vacant(vacant) => {
                if let Some(next) = f(None) {
                    trace!(strategy = %strategy, key = %key, "Creating limiter entry");
                    vacant.insert(next);
                }
            }
        }
        Ok(())
    }

    fn remove(&self, strategy: Strategy, key: &str) -> Result<bool, StoreError> {
        Ok(self.map(strategy).remove(key).is_some())
    }

    fn stats(&self, strategy: Strategy, now: u64) -> Result<StoreStats, StoreError> {
        let mut stats = StoreStats::default();
        for entry in self.map(strategy).iter() {
            stats.total_keys += 1;
            if entry.value().is_active(now) {
                stats.active_keys += 1;
            }
        }
        Ok(stats)
    }

    fn prune(&self, strategy: Strategy, now: u64) -> Result<usize, StoreError> {
        let map = self.map(strategy);

        // Collect candidates first so no shard stays locked for the whole sweep.
        let expired: Vec<String> = map
            .iter()
            .filter(|entry| !entry.value().is_active(now))
            .map(|entry| entry.key().clone())
            .collect();

        // Re-check under the entry lock; the key may have been refreshed meanwhile.
        let removed = expired
            .iter()
            .filter(|key| map.remove_if(key.as_str(), |_, entry| !entry.is_active(now)).is_some())
            .count();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::algorithm::{FixedWindowState, TokenBucketState};

    fn fixed(count: u64, reset_time: u64) -> LimiterEntry {
        LimiterEntry::Fixed(FixedWindowState {
            count,
            window_start: reset_time - 1000,
            reset_time,
        })
    }

    fn put(store: &MemoryStore, strategy: Strategy, key: &str, entry: LimiterEntry) {
        store
            .update(strategy, key, &mut |_| Some(entry.clone()))
            .unwrap();
    }

    #[test]
    fn test_update_and_get() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.get(Strategy::Fixed, "a").unwrap(), None);

        put(&store, Strategy::Fixed, "a", fixed(1, 1000));
        assert_eq!(store.get(Strategy::Fixed, "a").unwrap(), Some(fixed(1, 1000)));
        assert_eq!(store.len(Strategy::Fixed), 1);
    }

    #[test]
    fn test_update_returning_none_does_not_create() {
        let store = MemoryStore::new();
        let mut seen = false;
        store
            .update(Strategy::Sliding, "a", &mut |current| {
                seen = current.is_none();
                None
            })
            .unwrap();

        assert!(seen);
        assert!(store.is_empty());
    }

    #[test]
    fn test_strategies_are_separate() {
        let store = MemoryStore::new();
        put(&store, Strategy::Fixed, "a", fixed(1, 1000));

        assert_eq!(store.get(Strategy::Sliding, "a").unwrap(), None);
        assert!(!store.remove(Strategy::TokenBucket, "a").unwrap());
        assert!(store.remove(Strategy::Fixed, "a").unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_stats_counts_active_keys() {
        let store = MemoryStore::new();
        put(&store, Strategy::Fixed, "old", fixed(3, 1000));
        put(&store, Strategy::Fixed, "new", fixed(1, 2000));

        let stats = store.stats(Strategy::Fixed, 1500).unwrap();
        assert_eq!(stats, StoreStats { total_keys: 2, active_keys: 1 });
    }

    #[test]
    fn test_prune_removes_expired_only() {
        let store = MemoryStore::new();
        put(&store, Strategy::Fixed, "old", fixed(3, 1000));
        put(&store, Strategy::Fixed, "new", fixed(1, 2000));
        put(
            &store,
            Strategy::TokenBucket,
            "bucket",
            LimiterEntry::TokenBucket(TokenBucketState {
                tokens: 0,
                last_refill: 0,
                total_requests: 5,
                window_ms: 1000,
            }),
        );

        assert_eq!(store.prune(Strategy::Fixed, 1500).unwrap(), 1);
        assert!(store.get(Strategy::Fixed, "old").unwrap().is_none());
        assert!(store.get(Strategy::Fixed, "new").unwrap().is_some());
        // Other strategies untouched.
        assert_eq!(store.len(Strategy::TokenBucket), 1);
        assert_eq!(store.prune(Strategy::TokenBucket, 1500).unwrap(), 1);
    }
}
