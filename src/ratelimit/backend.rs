//! Storage trait for limiter state.
//!
//! The limiter never touches a map directly; it goes through [`LimiterStore`]
//! so the in-memory store can be replaced by another backend without changing
//! any algorithm.

use serde::Serialize;
use thiserror::Error;

use super::algorithm::LimiterEntry;
use super::rules::Strategy;

/// Errors reported by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("update callback was not run for key {0}")]
    NotApplied(String),
}

/// Key counts for one strategy's store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    /// Every key held
    pub total_keys: usize,
    /// Keys whose entry is still within its window
    pub active_keys: usize,
}

/// Per-strategy key to entry storage.
///
/// Implementations must make [`update`](LimiterStore::update) atomic per key:
/// the callback observes the current entry and its return value is stored
/// before any other update of the same key can observe it.
pub trait LimiterStore: Send + Sync {
    /// Read an entry without modifying anything.
    fn get(&self, strategy: Strategy, key: &str) -> Result<Option<LimiterEntry>, StoreError>;

    /// Atomically read-modify-write one key.
    ///
    /// The callback receives the current entry (if any). Returning `Some`
    /// stores the new entry, returning `None` leaves the key as it was.
    fn update(
        &self,
        strategy: Strategy,
        key: &str,
        f: &mut dyn FnMut(Option<&LimiterEntry>) -> Option<LimiterEntry>,
    ) -> Result<(), StoreError>;

    /// Remove a key. Returns whether it existed.
    fn remove(&self, strategy: Strategy, key: &str) -> Result<bool, StoreError>;

    /// Count keys, and how many are active at `now`.
    fn stats(&self, strategy: Strategy, now: u64) -> Result<StoreStats, StoreError>;

    /// Remove every entry that has expired at `now`. Returns how many were removed.
    fn prune(&self, strategy: Strategy, now: u64) -> Result<usize, StoreError>;
}
