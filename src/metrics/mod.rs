//! Limiter metrics.
//!
//! Blocked decisions are counted by a [`BlockedTracker`] owned by each
//! limiter; a [`MetricsEmitter`] turns tracker and store statistics into
//! [`MetricsSnapshot`]s and publishes them through a [`MetricsSink`].

mod emitter;
mod sink;
mod tracker;

pub use emitter::{MetricsEmitter, MetricsSnapshot, DEFAULT_TOP_BLOCKED};
pub use sink::{ChannelSink, LogSink, MemorySink, MetricsSink, SinkError};
pub use tracker::{BlockedIdentifier, BlockedTracker, DEFAULT_TRACKED_KEYS};
