//! Periodic background tasks.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Handle to a task spawned with [`TaskHandle::spawn_periodic`].
///
/// [`shutdown`](TaskHandle::shutdown) stops the task and waits for it.
/// Dropping the handle also stops the task, without waiting.
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl TaskHandle {
    /// Run `tick` every `period`, starting one period from now.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_periodic<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, mut signal) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(task = name, period_ms = period.as_millis() as u64, "Background task started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => tick().await,
                    // Fires on an explicit shutdown and when the handle is dropped.
                    _ = signal.changed() => break,
                }
            }

            debug!(task = name, "Background task stopped");
        });

        Self {
            name,
            shutdown,
            join,
        }
    }

    /// Name given at spawn time.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop the task and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.join.await {
            warn!(task = self.name, error = %err, "Background task ended abnormally");
        }
    }
}
