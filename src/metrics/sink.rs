//! Destinations for published metrics.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, trace};

use super::emitter::MetricsSnapshot;

/// Errors reported by a metrics sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to encode metrics: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("metrics sink closed")]
    Closed,
}

/// Somewhere to publish limiter metrics.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Publish one snapshot.
    async fn publish(&self, snapshot: &MetricsSnapshot) -> Result<(), SinkError>;
}

/// Pub/sub channel sink.
///
/// Every subscriber receives every snapshot published after it subscribed.
/// Publishing with no subscriber is not an error; the snapshot is dropped.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: broadcast::Sender<MetricsSnapshot>,
}

impl ChannelSink {
    /// Create a channel buffering up to `capacity` snapshots per slow subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to future snapshots.
    pub fn subscribe(&self) -> broadcast::Receiver<MetricsSnapshot> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl MetricsSink for ChannelSink {
    async fn publish(&self, snapshot: &MetricsSnapshot) -> Result<(), SinkError> {
        if self.sender.send(snapshot.clone()).is_err() {
            trace!(limiter = %snapshot.limiter, "No metrics subscribers");
        }
        Ok(())
    }
}

/// Sink writing each snapshot as a JSON log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl MetricsSink for LogSink {
    async fn publish(&self, snapshot: &MetricsSnapshot) -> Result<(), SinkError> {
        let payload = serde_json::to_string(snapshot)?;
        info!(
            target: "turnstile::metrics",
            limiter = %snapshot.limiter,
            %payload,
            "Rate limiter metrics"
        );
        Ok(())
    }
}

/// Sink keeping every snapshot in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    snapshots: Arc<Mutex<Vec<MetricsSnapshot>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots published so far.
    pub fn snapshots(&self) -> Vec<MetricsSnapshot> {
        self.snapshots.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().is_empty()
    }
}

#[async_trait]
impl MetricsSink for MemorySink {
    async fn publish(&self, snapshot: &MetricsSnapshot) -> Result<(), SinkError> {
        self.snapshots.lock().push(snapshot.clone());
        Ok(())
    }
}
