//! Named limiter presets.

use std::sync::Arc;
use std::time::Duration;

use super::backend::LimiterStore;
use super::clock::{Clock, SystemClock};
use super::limiter::RateLimiter;
use super::rules::{RateLimitConfig, Strategy};
use super::store::MemoryStore;
use crate::error::Result;

/// API traffic: 100 requests per minute, sliding window.
pub const API_MAX_REQUESTS: u64 = 100;
pub const API_WINDOW: Duration = Duration::from_secs(60);

/// Authentication endpoints: 5 attempts per 15 minutes, fixed window.
pub const AUTH_MAX_REQUESTS: u64 = 5;
pub const AUTH_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Inter-agent calls: 1000 per minute, token bucket.
pub const AGENT_MAX_REQUESTS: u64 = 1000;
pub const AGENT_WINDOW: Duration = Duration::from_secs(60);

/// Builds preset limiters that share one store and one clock.
///
/// Presets use distinct key prefixes, so sharing the store never mixes their
/// counters, and a `reset` through any of them clears every strategy.
#[derive(Clone)]
pub struct RateLimiterFactory {
    store: Arc<dyn LimiterStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiterFactory {
    /// Factory over a fresh in-memory store and the system clock.
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), Arc::new(SystemClock::new()))
    }

    /// Factory over a given store and clock.
    pub fn with_store(store: Arc<dyn LimiterStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// The shared store.
    pub fn store(&self) -> &Arc<dyn LimiterStore> {
        &self.store
    }

    /// The shared clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// General API traffic, keyed `api:<identifier>`.
    pub fn api(&self) -> RateLimiter {
        self.preset(
            RateLimitConfig::new(Strategy::Sliding, API_MAX_REQUESTS, API_WINDOW)
                .key_prefix("api:"),
        )
    }

    /// Authentication endpoints, keyed `auth:<identifier>`.
    ///
    /// Low volume and strict, so the fixed window's boundary burst is acceptable.
    pub fn auth(&self) -> RateLimiter {
        self.preset(
            RateLimitConfig::new(Strategy::Fixed, AUTH_MAX_REQUESTS, AUTH_WINDOW)
                .key_prefix("auth:"),
        )
    }

    /// Inter-agent calls, keyed `agent:<identifier>`.
    pub fn agent(&self) -> RateLimiter {
        self.preset(
            RateLimitConfig::new(Strategy::TokenBucket, AGENT_MAX_REQUESTS, AGENT_WINDOW)
                .key_prefix("agent:"),
        )
    }

    /// Quota for an external API, keyed `external:<name>:<identifier>`.
    pub fn external(&self, name: &str, max_requests: u64, window_ms: u64) -> Result<RateLimiter> {
        let window = Duration::from_millis(window_ms);
        let config = RateLimitConfig::new(Strategy::Sliding, max_requests, window)
            .key_prefix(format!("external:{}:", name));
        self.custom(config)
    }

    /// Any configuration over the shared store and clock.
    pub fn custom(&self, config: RateLimitConfig) -> Result<RateLimiter> {
        RateLimiter::with_store(config, self.store.clone(), self.clock.clone())
    }

    // Preset constants are all non-zero, so validation is skipped.
    fn preset(&self, config: RateLimitConfig) -> RateLimiter {
        RateLimiter::assemble(config, self.store.clone(), self.clock.clone())
    }
}

impl Default for RateLimiterFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TurnstileError;
    use crate::ratelimit::clock::ManualClock;

    fn factory() -> (RateLimiterFactory, ManualClock) {
        let clock = ManualClock::new(0);
        let factory =
            RateLimiterFactory::with_store(Arc::new(MemoryStore::new()), Arc::new(clock.clone()));
        (factory, clock)
    }

    #[test]
    fn test_presets() {
        let (factory, _) = factory();

        let api = factory.api();
        assert_eq!(api.config().strategy, Strategy::Sliding);
        assert_eq!(api.config().max_requests, 100);
        assert_eq!(api.config().window_ms, 60_000);
        assert_eq!(api.config().key_generator.generate("1.2.3.4"), "api:1.2.3.4");

        let auth = factory.auth();
        assert_eq!(auth.config().strategy, Strategy::Fixed);
        assert_eq!(auth.config().max_requests, 5);
        assert_eq!(auth.config().window_ms, 900_000);
        assert_eq!(auth.config().key_generator.generate("bob"), "auth:bob");

        let agent = factory.agent();
        assert_eq!(agent.config().strategy, Strategy::TokenBucket);
        assert_eq!(agent.config().max_requests, 1000);
        assert_eq!(agent.config().window_ms, 60_000);
        assert_eq!(agent.config().key_generator.generate("planner"), "agent:planner");
    }

    #[test]
    fn test_external_quota() {
        let (factory, _) = factory();
        let github = factory.external("github", 2, 1000).unwrap();

        assert_eq!(github.config().strategy, Strategy::Sliding);
        let info = github.check("token-1").unwrap();
        assert_eq!(info.identifier, "external:github:token-1");
        github.check("token-1").unwrap();
        assert!(github.check("token-1").unwrap().is_blocked);
    }

    #[test]
    fn test_external_quota_validated() {
        let (factory, _) = factory();
        assert!(matches!(
            factory.external("github", 0, 1000),
            Err(TurnstileError::Config(_))
        ));
        assert!(matches!(
            factory.external("github", 10, 0),
            Err(TurnstileError::Config(_))
        ));
    }

    #[test]
    fn test_presets_share_store_without_collisions() {
        let (factory, _) = factory();
        let auth = factory.auth();
        let api = factory.api();

        for _ in 0..5 {
            auth.check("10.0.0.1").unwrap();
        }
        assert!(auth.check("10.0.0.1").unwrap().is_blocked);
        assert!(!api.check("10.0.0.1").unwrap().is_blocked);
        assert_eq!(api.get_info("10.0.0.1").unwrap().unwrap().remaining, 99);
    }
}
