//! Core rate limiter implementation.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::algorithm::{algorithm_for, Algorithm, RateLimitInfo};
use super::backend::{LimiterStore, StoreError, StoreStats};
use super::cleanup::sweep;
use super::clock::{Clock, SystemClock};
use super::rules::{RateLimitConfig, Strategy};
use super::store::MemoryStore;
use crate::error::{Result, TurnstileError};
use crate::metrics::BlockedTracker;

/// Configuration and store statistics of one limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimiterStats {
    pub strategy: Strategy,
    pub window_ms: u64,
    pub max_requests: u64,
    pub per_store_stats: StoreStats,
}

/// A rate limiter bound to one configuration and one algorithm.
///
/// This struct is thread-safe and can be shared across tasks behind an `Arc`.
pub struct RateLimiter {
    config: RateLimitConfig,
    algorithm: &'static dyn Algorithm,
    store: Arc<dyn LimiterStore>,
    clock: Arc<dyn Clock>,
    blocked: Arc<BlockedTracker>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish()
    }
}

impl RateLimiter {
    /// Create a limiter with its own in-memory store and the system clock.
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        Self::with_store(config, Arc::new(MemoryStore::new()), Arc::new(SystemClock::new()))
    }

    /// Create a limiter over a given store and clock.
    ///
    /// Fails with [`TurnstileError::Config`] if the configuration is invalid.
    pub fn with_store(
        config: RateLimitConfig,
        store: Arc<dyn LimiterStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(config, store, clock))
    }

    /// Assemble a limiter from a configuration known to be valid.
    pub(crate) fn assemble(
        config: RateLimitConfig,
        store: Arc<dyn LimiterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        debug!(
            strategy = %config.strategy,
            window_ms = config.window_ms,
            max_requests = config.max_requests,
            "Creating rate limiter"
        );
        Self {
            algorithm: algorithm_for(config.strategy),
            config,
            store,
            clock,
            blocked: Arc::new(BlockedTracker::new()),
        }
    }

    /// Builder-style: record blocked decisions in a given tracker.
    pub fn with_tracker(mut self, blocked: Arc<BlockedTracker>) -> Self {
        self.blocked = blocked;
        self
    }

    /// The limiter configuration.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// The store backing this limiter.
    pub fn store(&self) -> &Arc<dyn LimiterStore> {
        &self.store
    }

    /// The clock used for every decision.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Blocked decision counters.
    pub fn blocked(&self) -> &Arc<BlockedTracker> {
        &self.blocked
    }

    /// Check and consume one unit for `identifier`.
    pub fn check(&self, identifier: &str) -> Result<RateLimitInfo> {
        self.check_limit(identifier, 1)
    }

    /// Check and, when admitted, consume `cost` units for `identifier`.
    ///
    /// The read-decide-write sequence runs atomically per key. A blocked call
    /// leaves the stored state untouched. If the store fails the call is let
    /// through (fail open) and the failure is logged.
    pub fn check_limit(&self, identifier: &str, cost: u64) -> Result<RateLimitInfo> {
        if cost == 0 {
            return Err(TurnstileError::InvalidCost(cost));
        }

        let key = self.config.key_generator.generate(identifier);
        let now = self.clock.now_ms();

        trace!(key = %key, cost = cost, strategy = %self.config.strategy, "Checking rate limit");

        let mut outcome = None;
        let result = self.store.update(self.config.strategy, &key, &mut |current| {
            let decision = self.algorithm.decide(current, now, cost, &self.config, &key);
            outcome = Some(decision.info);
            decision.entry
        });

        let result =
            result.and_then(|()| outcome.ok_or_else(|| StoreError::NotApplied(key.clone())));
        let info = match result {
            Ok(info) => info,
            Err(err) => {
                warn!(key = %key, error = %err, "Limiter store failed, allowing request");
                return Ok(self.fail_open(key, now));
            }
        };

        if info.is_blocked {
            debug!(
                key = %key,
                hits = info.total_hits_in_window,
                limit = self.config.max_requests,
                "Rate limit exceeded"
            );
            self.blocked.record(&key);
        }
        Ok(info)
    }

    fn fail_open(&self, key: String, now: u64) -> RateLimitInfo {
        RateLimitInfo {
            identifier: key,
            total_hits: 0,
            total_hits_in_window: 0,
            remaining: self.config.max_requests,
            reset_time: now.saturating_add(self.config.window_ms),
            is_blocked: false,
        }
    }

    /// Current state for `identifier`, or `None` if nothing is recorded.
    ///
    /// Never creates or modifies an entry.
    pub fn get_info(&self, identifier: &str) -> Result<Option<RateLimitInfo>> {
        let key = self.config.key_generator.generate(identifier);
        let now = self.clock.now_ms();
        let entry = self.store.get(self.config.strategy, &key)?;
        Ok(entry.map(|entry| self.algorithm.inspect(&entry, now, &self.config, &key)))
    }

    /// Remove every entry for `identifier`, whichever strategy wrote it.
    pub fn reset(&self, identifier: &str) -> Result<()> {
        let key = self.config.key_generator.generate(identifier);
        for strategy in Strategy::ALL {
            self.store.remove(strategy, &key)?;
        }
        self.blocked.forget(&key);
        debug!(key = %key, "Rate limit state reset");
        Ok(())
    }

    /// Configuration plus key counts of this limiter's strategy store.
    pub fn get_stats(&self) -> Result<LimiterStats> {
        let now = self.clock.now_ms();
        Ok(LimiterStats {
            strategy: self.config.strategy,
            window_ms: self.config.window_ms,
            max_requests: self.config.max_requests,
            per_store_stats: self.store.stats(self.config.strategy, now)?,
        })
    }

    /// Drop expired entries from every strategy store. Returns how many were removed.
    pub fn cleanup(&self) -> Result<usize> {
        Ok(sweep(self.store.as_ref(), self.clock.now_ms())?)
    }
}
