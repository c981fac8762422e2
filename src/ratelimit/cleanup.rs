//! Expired entry cleanup.
//!
//! Entries that have outlived their window are dropped by a periodic sweep
//! running on its own task, off the decision path.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::backend::{LimiterStore, StoreError};
use super::clock::Clock;
use super::rules::Strategy;
use crate::task::TaskHandle;

/// Default sweep period: every five minutes.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Remove every expired entry from every strategy store.
///
/// Returns how many entries were removed.
pub fn sweep(store: &dyn LimiterStore, now: u64) -> Result<usize, StoreError> {
    let mut removed = 0;
    for strategy in Strategy::ALL {
        removed += store.prune(strategy, now)?;
    }
    Ok(removed)
}

/// Spawn the periodic sweep.
///
/// Must be called from within a tokio runtime. Store failures are logged and
/// the sweep is retried on the next period.
pub fn spawn_cleanup(
    store: Arc<dyn LimiterStore>,
    clock: Arc<dyn Clock>,
    period: Duration,
) -> TaskHandle {
    TaskHandle::spawn_periodic("limiter-cleanup", period, move || {
        let store = store.clone();
        let clock = clock.clone();
        async move {
            match sweep(store.as_ref(), clock.now_ms()) {
                Ok(0) => {}
                Ok(removed) => debug!(removed = removed, "Pruned expired limiter entries"),
                Err(err) => warn!(error = %err, "Limiter cleanup failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::{MemoryStore, RateLimitConfig, RateLimiter};

    fn limiter(strategy: Strategy, store: &Arc<MemoryStore>, clock: &ManualClock) -> RateLimiter {
        let config = RateLimitConfig::new(strategy, 10, Duration::from_secs(1));
        RateLimiter::with_store(config, store.clone(), Arc::new(clock.clone())).unwrap()
    }

    #[test]
    fn test_sweep_all_strategies() {
        let clock = ManualClock::new(0);
        let store = Arc::new(MemoryStore::new());
        for strategy in Strategy::ALL {
            limiter(strategy, &store, &clock).check("a").unwrap();
        }

        assert_eq!(sweep(store.as_ref(), 999).unwrap(), 0);
        assert_eq!(sweep(store.as_ref(), 1000).unwrap(), 3);
        assert!(store.is_empty());
    }

    #[test]
    fn test_sweep_keeps_refreshed_entries() {
        let clock = ManualClock::new(0);
        let store = Arc::new(MemoryStore::new());
        let sliding = limiter(Strategy::Sliding, &store, &clock);

        sliding.check("old").unwrap();
        clock.set(900);
        sliding.check("fresh").unwrap();

        assert_eq!(sweep(store.as_ref(), 1200).unwrap(), 1);
        assert!(sliding.get_info("fresh").unwrap().is_some());
        assert!(sliding.get_info("old").unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_cleanup() {
        let clock = ManualClock::new(0);
        let store = Arc::new(MemoryStore::new());
        limiter(Strategy::Fixed, &store, &clock).check("a").unwrap();

        let handle = spawn_cleanup(store.clone(), Arc::new(clock.clone()), Duration::from_secs(60));

        clock.set(5_000);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(store.is_empty());

        handle.shutdown().await;
    }
}
