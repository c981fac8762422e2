//! Rate limit configuration.
//!
//! A [`RateLimitConfig`] binds a strategy, a window and a capacity to one
//! [`RateLimiter`](super::RateLimiter). It is validated once, when the limiter
//! is built, and never changes afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::key::KeyGenerator;
use crate::error::{Result, TurnstileError};

/// Accounting algorithm used by a limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Consecutive windows aligned to multiples of the window size
    Fixed,
    /// Rolling window over individual admission timestamps
    Sliding,
    /// Bucket refilled in whole-window batches
    TokenBucket,
}

impl Strategy {
    /// Every strategy, in store order.
    pub const ALL: [Strategy; 3] = [Strategy::Fixed, Strategy::Sliding, Strategy::TokenBucket];

    /// Name used in configuration and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Fixed => "fixed",
            Strategy::Sliding => "sliding",
            Strategy::TokenBucket => "token_bucket",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = TurnstileError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fixed" => Ok(Strategy::Fixed),
            "sliding" => Ok(Strategy::Sliding),
            "token_bucket" => Ok(Strategy::TokenBucket),
            other => Err(TurnstileError::Config(format!(
                "unknown strategy '{}' (expected fixed, sliding or token_bucket)",
                other
            ))),
        }
    }
}

/// Longest accepted window: 100 years.
pub const MAX_WINDOW_MS: u64 = 100 * 365 * 24 * 60 * 60 * 1000;

/// Largest sliding window capacity. The sliding window keeps one timestamp per
/// admitted unit, so its memory per key grows with `max_requests`.
pub const MAX_SLIDING_REQUESTS: u64 = 1 << 20;

/// Configuration for a single rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Window size in milliseconds (refill period for the token bucket)
    pub window_ms: u64,
    /// Capacity per window, or bucket size
    pub max_requests: u64,
    /// Accounting algorithm
    pub strategy: Strategy,
    /// Identifier namespacing
    pub key_generator: KeyGenerator,
    /// Caller-side hook: do not count requests that ended in failure
    pub skip_failed_requests: bool,
    /// Caller-side hook: do not count requests that succeeded
    pub skip_successful_requests: bool,
}

impl RateLimitConfig {
    /// Create a configuration with an identity key generator.
    ///
    /// A window too long for `u64` milliseconds saturates and fails [`validate`](Self::validate).
    pub fn new(strategy: Strategy, max_requests: u64, window: Duration) -> Self {
        Self {
            window_ms: u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
            max_requests,
            strategy,
            key_generator: KeyGenerator::default(),
            skip_failed_requests: false,
            skip_successful_requests: false,
        }
    }

    /// Builder-style: prefix every identifier.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_generator = KeyGenerator::prefix(prefix);
        self
    }

    /// Builder-style: replace the key generator.
    pub fn key_generator(mut self, key_generator: KeyGenerator) -> Self {
        self.key_generator = key_generator;
        self
    }

    /// Builder-style: set the window in milliseconds.
    pub fn window_ms(mut self, window_ms: u64) -> Self {
        self.window_ms = window_ms;
        self
    }

    /// Builder-style: set `skip_failed_requests`.
    pub fn skip_failed_requests(mut self, skip: bool) -> Self {
        self.skip_failed_requests = skip;
        self
    }

    /// Builder-style: set `skip_successful_requests`.
    pub fn skip_successful_requests(mut self, skip: bool) -> Self {
        self.skip_successful_requests = skip;
        self
    }

    /// Window size as a `Duration`.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_requests == 0 {
            return Err(TurnstileError::Config(
                "max_requests must be greater than zero".to_string(),
            ));
        }
        if self.window_ms == 0 {
            return Err(TurnstileError::Config(
                "window_ms must be greater than zero".to_string(),
            ));
        }
        if self.window_ms > MAX_WINDOW_MS {
            return Err(TurnstileError::Config(format!(
                "window_ms must be at most {} (got {})",
                MAX_WINDOW_MS, self.window_ms
            )));
        }
        if self.strategy == Strategy::Sliding && self.max_requests > MAX_SLIDING_REQUESTS {
            return Err(TurnstileError::Config(format!(
                "sliding window max_requests must be at most {} (got {})",
                MAX_SLIDING_REQUESTS, self.max_requests
            )));
        }
        Ok(())
    }
}
