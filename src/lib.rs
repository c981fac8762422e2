//! Turnstile - Admission Control Rate Limiting
//!
//! This crate decides whether a caller identified by a string may perform an
//! action, using fixed window, sliding window or token bucket accounting over
//! a swappable per-key store. Limiters are built from named presets, blocked
//! requests are tracked and published as metrics, and expired state is swept
//! by a background task.

pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod ratelimit;
pub mod service;
pub mod task;
