//! Periodic liveness ping

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Runs a callback on a fixed interval while started
///
/// The first tick fires one full interval after [`Heartbeat::start`]. The
/// callback returns `false` to end the heartbeat from inside.
#[derive(Debug, Default)]
pub struct Heartbeat {
    task: Option<JoinHandle<()>>,
}

impl Heartbeat {
    /// Create a stopped heartbeat
    #[must_use]
    pub const fn new() -> Self {
        Self { task: None }
    }

    /// Start ticking, replacing any running ticker
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<F>(&mut self, interval: Duration, mut tick: F)
    where
        F: FnMut() -> bool + Send + 'static,
    {
        self.stop();
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !tick() {
                    break;
                }
            }
        }));
    }

    /// Stop ticking; idempotent
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Check if the ticker is live
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}
