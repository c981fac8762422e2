//! Periodic and on-demand metrics publication.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::sink::MetricsSink;
use super::tracker::BlockedIdentifier;
use crate::error::Result;
use crate::ratelimit::{to_datetime, LimiterStats, RateLimiter};
use crate::task::TaskHandle;

/// Default number of blocked identifiers reported per snapshot.
pub const DEFAULT_TOP_BLOCKED: usize = 10;

/// Metrics for one limiter at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    /// Name the limiter was registered under
    pub limiter: String,
    pub rate_limiter: LimiterStats,
    pub blocked_requests: u64,
    pub top_blocked_identifiers: Vec<BlockedIdentifier>,
}

/// Publishes snapshots of registered limiters to a sink.
pub struct MetricsEmitter {
    limiters: Vec<(String, Arc<RateLimiter>)>,
    sink: Arc<dyn MetricsSink>,
    top_blocked: usize,
}

impl MetricsEmitter {
    /// Create an emitter with no limiters.
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            limiters: Vec::new(),
            sink,
            top_blocked: DEFAULT_TOP_BLOCKED,
        }
    }

    /// Builder-style: how many blocked identifiers to report.
    pub fn top_blocked(mut self, n: usize) -> Self {
        self.top_blocked = n;
        self
    }

    /// Builder-style: add a limiter under `name`.
    pub fn register(mut self, name: impl Into<String>, limiter: Arc<RateLimiter>) -> Self {
        self.limiters.push((name.into(), limiter));
        self
    }

    /// Number of registered limiters.
    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    /// Snapshot one limiter.
    pub fn snapshot(&self, name: &str, limiter: &RateLimiter) -> Result<MetricsSnapshot> {
        let blocked = limiter.blocked();
        Ok(MetricsSnapshot {
            timestamp: to_datetime(limiter.clock().now_ms()),
            limiter: name.to_string(),
            rate_limiter: limiter.get_stats()?,
            blocked_requests: blocked.blocked_requests(),
            top_blocked_identifiers: blocked.top(self.top_blocked),
        })
    }

    /// Snapshot every registered limiter. Limiters whose stats cannot be read are skipped.
    pub fn collect(&self) -> Vec<MetricsSnapshot> {
        self.limiters
            .iter()
            .filter_map(|(name, limiter)| match self.snapshot(name, limiter) {
                Ok(snapshot) => Some(snapshot),
                Err(err) => {
                    warn!(limiter = %name, error = %err, "Failed to collect limiter metrics");
                    None
                }
            })
            .collect()
    }

    /// Publish a snapshot of every registered limiter now.
    ///
    /// Returns how many snapshots the sink accepted.
    pub async fn emit(&self) -> usize {
        let mut published = 0;
        for snapshot in self.collect() {
            match self.sink.publish(&snapshot).await {
                Ok(()) => published += 1,
                Err(err) => {
                    warn!(limiter = %snapshot.limiter, error = %err, "Failed to publish metrics")
                }
            }
        }
        published
    }

    /// Emit every `period` until the returned handle is shut down.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(self: Arc<Self>, period: Duration) -> TaskHandle {
        TaskHandle::spawn_periodic("metrics-emitter", period, move || {
            let emitter = self.clone();
            async move {
                emitter.emit().await;
            }
        })
    }
}
