//! Rate limiting logic and state management.

mod algorithm;
mod backend;
mod cleanup;
mod clock;
mod factory;
mod key;
mod limiter;
mod rules;
mod store;

pub use algorithm::{
    algorithm_for, Algorithm, Decision, FixedWindow, FixedWindowState, LimiterEntry,
    RateLimitInfo, SlidingWindow, SlidingWindowState, TokenBucket, TokenBucketState,
};
pub use backend::{LimiterStore, StoreError, StoreStats};
pub use cleanup::{spawn_cleanup, sweep, DEFAULT_CLEANUP_INTERVAL};
pub use clock::{to_datetime, Clock, ManualClock, SystemClock};
pub use factory::RateLimiterFactory;
pub use key::KeyGenerator;
pub use limiter::{LimiterStats, RateLimiter};
pub use rules::{RateLimitConfig, Strategy, MAX_SLIDING_REQUESTS, MAX_WINDOW_MS};
pub use store::MemoryStore;
