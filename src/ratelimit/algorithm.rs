//! Window accounting algorithms.
//!
//! Each algorithm is a pure function over a [`LimiterEntry`]: given the stored
//! state (if any), the current time and the cost of the call, it returns the
//! decision and, when the call is admitted, the entry to store back. Blocked
//! decisions never produce a new entry, so a rejected call leaves no trace.

use serde::Serialize;

use super::rules::{RateLimitConfig, Strategy};

/// Result of a rate limit decision or inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    /// The generated storage key, not the raw caller identifier
    pub identifier: String,
    /// Units recorded for the key (lifetime total for the token bucket)
    pub total_hits: u64,
    /// Units counted against the current window or bucket
    pub total_hits_in_window: u64,
    /// Units still available
    pub remaining: u64,
    /// When capacity frees up, in milliseconds
    pub reset_time: u64,
    /// Whether the call was rejected
    pub is_blocked: bool,
}

/// Fixed-window counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedWindowState {
    pub count: u64,
    pub window_start: u64,
    pub reset_time: u64,
}

/// Admission timestamps inside the sliding window.
///
/// Timestamps are not necessarily sorted: a multi-unit admission spreads its
/// units over `now, now + 1, ...` and a later call in the same millisecond
/// may land before the last of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlidingWindowState {
    pub timestamps: Vec<u64>,
    pub window_ms: u64,
}

/// Token bucket with batched refill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBucketState {
    pub tokens: u64,
    pub last_refill: u64,
    pub total_requests: u64,
    pub window_ms: u64,
}

/// Per-key state, tagged by the strategy that wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimiterEntry {
    Fixed(FixedWindowState),
    Sliding(SlidingWindowState),
    TokenBucket(TokenBucketState),
}

impl LimiterEntry {
    /// The strategy this entry belongs to.
    pub fn strategy(&self) -> Strategy {
        match self {
            LimiterEntry::Fixed(_) => Strategy::Fixed,
            LimiterEntry::Sliding(_) => Strategy::Sliding,
            LimiterEntry::TokenBucket(_) => Strategy::TokenBucket,
        }
    }

    /// Time from which this entry carries no information any more.
    ///
    /// Past this point the window has rolled over, every timestamp has aged
    /// out, or the bucket would be refilled to capacity, so dropping the entry
    /// is indistinguishable from keeping it.
    pub fn expires_at(&self) -> u64 {
        match self {
            LimiterEntry::Fixed(state) => state.reset_time,
            LimiterEntry::Sliding(state) => state
                .timestamps
                .iter()
                .max()
                .map_or(0, |newest| newest.saturating_add(state.window_ms)),
            LimiterEntry::TokenBucket(state) => state.last_refill.saturating_add(state.window_ms),
        }
    }

    /// Whether the entry is still within its window at `now`.
    pub fn is_active(&self, now: u64) -> bool {
        now < self.expires_at()
    }
}

/// Outcome of [`Algorithm::decide`].
#[derive(Debug, Clone)]
pub struct Decision {
    /// Entry to store back; `None` leaves the store untouched
    pub entry: Option<LimiterEntry>,
    pub info: RateLimitInfo,
}

/// A rate limiting algorithm.
pub trait Algorithm: Send + Sync {
    /// The strategy implemented.
    fn strategy(&self) -> Strategy;

    /// Decide whether `cost` units may be admitted for `key` at `now`.
    fn decide(
        &self,
        entry: Option<&LimiterEntry>,
        now: u64,
        cost: u64,
        config: &RateLimitConfig,
        key: &str,
    ) -> Decision;

    /// Report the state of an existing entry at `now` without changing it.
    ///
    /// `is_blocked` reports whether a unit-cost call would be rejected.
    fn inspect(
        &self,
        entry: &LimiterEntry,
        now: u64,
        config: &RateLimitConfig,
        key: &str,
    ) -> RateLimitInfo;
}

/// Algorithm implementing `strategy`.
pub fn algorithm_for(strategy: Strategy) -> &'static dyn Algorithm {
    match strategy {
        Strategy::Fixed => &FixedWindow,
        Strategy::Sliding => &SlidingWindow,
        Strategy::TokenBucket => &TokenBucket,
    }
}

/// Fixed window.
///
/// Time is cut into windows aligned to multiples of `window_ms`. A client can
/// spend the full capacity just before a boundary and again just after it;
/// that burst is inherent to the strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedWindow;

impl FixedWindow {
    fn current(entry: Option<&LimiterEntry>, now: u64, window_ms: u64) -> FixedWindowState {
        let window_start = now - now % window_ms;
        match entry {
            // A clock that stepped back must not open an earlier window.
            Some(LimiterEntry::Fixed(state)) if state.window_start >= window_start => state.clone(),
            _ => FixedWindowState {
                count: 0,
                window_start,
                reset_time: window_start + window_ms,
            },
        }
    }

    fn info(state: &FixedWindowState, max: u64, key: &str, is_blocked: bool) -> RateLimitInfo {
        RateLimitInfo {
            identifier: key.to_string(),
            total_hits: state.count,
            total_hits_in_window: state.count,
            remaining: max.saturating_sub(state.count),
            reset_time: state.reset_time,
            is_blocked,
        }
    }
}

impl Algorithm for FixedWindow {
    fn strategy(&self) -> Strategy {
        Strategy::Fixed
    }

    fn decide(
        &self,
        entry: Option<&LimiterEntry>,
        now: u64,
        cost: u64,
        config: &RateLimitConfig,
        key: &str,
    ) -> Decision {
        let mut state = Self::current(entry, now, config.window_ms);

        if state.count.saturating_add(cost) > config.max_requests {
            return Decision {
                entry: None,
                info: Self::info(&state, config.max_requests, key, true),
            };
        }

        state.count += cost;
        let info = Self::info(&state, config.max_requests, key, false);
        Decision {
            entry: Some(LimiterEntry::Fixed(state)),
            info,
        }
    }

    fn inspect(
        &self,
        entry: &LimiterEntry,
        now: u64,
        config: &RateLimitConfig,
        key: &str,
    ) -> RateLimitInfo {
        let state = Self::current(Some(entry), now, config.window_ms);
        let is_blocked = state.count >= config.max_requests;
        Self::info(&state, config.max_requests, key, is_blocked)
    }
}

/// Sliding window over individual admission timestamps.
///
/// `reset_time` is reported as `now + window_ms`, an upper bound on when the
/// next unit frees up rather than the exact expiry of the oldest timestamp.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlidingWindow;

impl SlidingWindow {
    fn current(entry: Option<&LimiterEntry>, now: u64, window_ms: u64) -> SlidingWindowState {
        let timestamps = match entry {
            // Keep `t > now - window` without underflowing near zero.
            Some(LimiterEntry::Sliding(state)) => state
                .timestamps
                .iter()
                .copied()
                .filter(|t| t.saturating_add(window_ms) > now)
                .collect(),
            _ => Vec::new(),
        };
        SlidingWindowState {
            timestamps,
            window_ms,
        }
    }

    fn info(
        state: &SlidingWindowState,
        now: u64,
        max: u64,
        key: &str,
        is_blocked: bool,
    ) -> RateLimitInfo {
        let hits = state.timestamps.len() as u64;
        RateLimitInfo {
            identifier: key.to_string(),
            total_hits: hits,
            total_hits_in_window: hits,
            remaining: max.saturating_sub(hits),
            reset_time: now.saturating_add(state.window_ms),
            is_blocked,
        }
    }
}

impl Algorithm for SlidingWindow {
    fn strategy(&self) -> Strategy {
        Strategy::Sliding
    }

    fn decide(
        &self,
        entry: Option<&LimiterEntry>,
        now: u64,
        cost: u64,
        config: &RateLimitConfig,
        key: &str,
    ) -> Decision {
        let mut state = Self::current(entry, now, config.window_ms);
        let hits = state.timestamps.len() as u64;

        if hits.saturating_add(cost) > config.max_requests {
            return Decision {
                entry: None,
                info: Self::info(&state, now, config.max_requests, key, true),
            };
        }

        // One timestamp per unit, offset so each ages out on its own.
        state.timestamps.extend((0..cost).map(|offset| now + offset));
        let info = Self::info(&state, now, config.max_requests, key, false);
        Decision {
            entry: Some(LimiterEntry::Sliding(state)),
            info,
        }
    }

    fn inspect(
        &self,
        entry: &LimiterEntry,
        now: u64,
        config: &RateLimitConfig,
        key: &str,
    ) -> RateLimitInfo {
        let state = Self::current(Some(entry), now, config.window_ms);
        let is_blocked = state.timestamps.len() as u64 >= config.max_requests;
        Self::info(&state, now, config.max_requests, key, is_blocked)
    }
}

/// Token bucket.
///
/// The bucket starts full and is refilled by `max_requests` tokens for every
/// whole window elapsed since the last refill. Partial windows add nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenBucket;

impl TokenBucket {
    fn current(
        entry: Option<&LimiterEntry>,
        now: u64,
        config: &RateLimitConfig,
    ) -> TokenBucketState {
        let mut state = match entry {
            Some(LimiterEntry::TokenBucket(state)) => state.clone(),
            _ => {
                return TokenBucketState {
                    tokens: config.max_requests,
                    last_refill: now,
                    total_requests: 0,
                    window_ms: config.window_ms,
                }
            }
        };

        let periods = now.saturating_sub(state.last_refill) / config.window_ms;
        if periods > 0 {
            let refill = periods.saturating_mul(config.max_requests);
            state.tokens = state.tokens.saturating_add(refill).min(config.max_requests);
            state.last_refill = now;
        }
        state
    }

    fn info(state: &TokenBucketState, max: u64, key: &str, is_blocked: bool) -> RateLimitInfo {
        RateLimitInfo {
            identifier: key.to_string(),
            total_hits: state.total_requests,
            total_hits_in_window: max.saturating_sub(state.tokens),
            remaining: state.tokens,
            reset_time: state.last_refill.saturating_add(state.window_ms),
            is_blocked,
        }
    }
}

impl Algorithm for TokenBucket {
    fn strategy(&self) -> Strategy {
        Strategy::TokenBucket
    }

    fn decide(
        &self,
        entry: Option<&LimiterEntry>,
        now: u64,
        cost: u64,
        config: &RateLimitConfig,
        key: &str,
    ) -> Decision {
        let mut state = Self::current(entry, now, config);

        if state.tokens < cost {
            return Decision {
                entry: None,
                info: Self::info(&state, config.max_requests, key, true),
            };
        }

        state.tokens -= cost;
        state.total_requests += cost;
        let info = Self::info(&state, config.max_requests, key, false);
        Decision {
            entry: Some(LimiterEntry::TokenBucket(state)),
            info,
        }
    }

    fn inspect(
        &self,
        entry: &LimiterEntry,
        now: u64,
        config: &RateLimitConfig,
        key: &str,
    ) -> RateLimitInfo {
        let state = Self::current(Some(entry), now, config);
        Self::info(&state, config.max_requests, key, state.tokens == 0)
    }
}
