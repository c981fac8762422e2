//! Blocked request accounting.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Default number of distinct keys tracked per limiter.
pub const DEFAULT_TRACKED_KEYS: usize = 10_000;

/// A key and how many of its calls were blocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedIdentifier {
    pub identifier: String,
    pub count: u64,
}

/// Counts blocked decisions, in total and per generated key.
///
/// The per-key table is bounded. When a new key arrives at capacity the
/// least-blocked keys are evicted down to 70% of capacity, so the heaviest
/// offenders survive while one-off keys churn.
#[derive(Debug)]
pub struct BlockedTracker {
    total: AtomicU64,
    by_key: Mutex<HashMap<String, u64>>,
    capacity: usize,
}

impl BlockedTracker {
    /// Create a tracker with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TRACKED_KEYS)
    }

    /// Create a tracker holding at most `capacity` distinct keys.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            total: AtomicU64::new(0),
            by_key: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Record one blocked decision for `key`.
    pub fn record(&self, key: &str) {
        self.total.fetch_add(1, Ordering::Relaxed);

        let mut by_key = self.by_key.lock();
        if let Some(count) = by_key.get_mut(key) {
            *count += 1;
            return;
        }
        if by_key.len() >= self.capacity {
            Self::evict(&mut by_key, self.capacity * 7 / 10);
        }
        by_key.insert(key.to_string(), 1);
    }

    fn evict(by_key: &mut HashMap<String, u64>, target: usize) {
        let mut counts: Vec<(u64, String)> = by_key
            .iter()
            .map(|(key, count)| (*count, key.clone()))
            .collect();
        counts.sort_unstable();

        let excess = by_key.len().saturating_sub(target.max(1) - 1);
        for (_, key) in counts.into_iter().take(excess) {
            by_key.remove(&key);
        }
        debug!(evicted = excess, remaining = by_key.len(), "Evicted blocked key counters");
    }

    /// Total blocked decisions since creation or the last [`clear`](Self::clear).
    pub fn blocked_requests(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Number of distinct keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.by_key.lock().len()
    }

    /// The `n` most blocked keys, most blocked first, ties by key.
    pub fn top(&self, n: usize) -> Vec<BlockedIdentifier> {
        let mut top: Vec<BlockedIdentifier> = self
            .by_key
            .lock()
            .iter()
            .map(|(key, count)| BlockedIdentifier {
                identifier: key.clone(),
                count: *count,
            })
            .collect();
        top.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.identifier.cmp(&b.identifier)));
        top.truncate(n);
        top
    }

    /// Forget one key, e.g. after the limiter was reset for it.
    pub fn forget(&self, key: &str) {
        self.by_key.lock().remove(key);
    }

    /// Reset every counter.
    pub fn clear(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.by_key.lock().clear();
    }
}

impl Default for BlockedTracker {
    fn default() -> Self {
        Self::new()
    }
}
