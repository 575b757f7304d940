//! Reconnection policy: constant delay, bounded attempts

use std::time::Duration;

use tokio::task::JoinHandle;

/// What to do after the transport failed or closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Try again after `delay`
    Retry {
        /// 1-based attempt number
        attempt: u32,
        /// Wait before attempting
        delay: Duration,
    },
    /// The attempt budget is spent
    GiveUp {
        /// Attempts made
        attempts: u32,
    },
}

/// Tracks consecutive reconnect attempts and the one pending retry
///
/// The counter only moves forward through [`ReconnectPolicy::next_attempt`]
/// and never exceeds the maximum; a successful open calls
/// [`ReconnectPolicy::reset`].
#[derive(Debug)]
pub struct ReconnectPolicy {
    interval: Duration,
    max_attempts: u32,
    attempts: u32,
    pending: Option<JoinHandle<()>>,
}

impl ReconnectPolicy {
    /// Create a policy with a fixed `interval` and at most `max_attempts` tries
    #[must_use]
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            attempts: 0,
            pending: None,
        }
    }

    /// Consume one attempt, or give up if none remain
    pub const fn next_attempt(&mut self) -> ReconnectDecision {
        if self.attempts >= self.max_attempts {
            return ReconnectDecision::GiveUp {
                attempts: self.attempts,
            };
        }
        self.attempts += 1;
        ReconnectDecision::Retry {
            attempt: self.attempts,
            delay: self.interval,
        }
    }

    /// Forget previous attempts
    pub const fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Consecutive attempts since the last reset
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Configured maximum
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Record the task that will perform the next attempt, cancelling any other
    pub fn set_pending(&mut self, task: JoinHandle<()>) {
        self.cancel();
        self.pending = Some(task);
    }

    /// Cancel the pending attempt, if any
    pub fn cancel(&mut self) {
        if let Some(task) = self.pending.take() {
            task.abort();
        }
    }

    /// Forget the pending attempt without cancelling it
    ///
    /// Called by the attempt itself once its delay has elapsed.
    pub fn settle(&mut self) {
        self.pending = None;
    }

    /// Check if an attempt is scheduled
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for ReconnectPolicy {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_up_to_max_then_gives_up() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(1000), 2);

        assert_eq!(
            policy.next_attempt(),
            ReconnectDecision::Retry {
                attempt: 1,
                delay: Duration::from_millis(1000)
            }
        );
        assert_eq!(
            policy.next_attempt(),
            ReconnectDecision::Retry {
                attempt: 2,
                delay: Duration::from_millis(1000)
            }
        );
        assert_eq!(
            policy.next_attempt(),
            ReconnectDecision::GiveUp { attempts: 2 }
        );
        assert_eq!(policy.attempts(), 2);
    }

    #[test]
    fn delay_is_constant() {
        let mut policy = ReconnectPolicy::new(Duration::from_secs(3), 5);
        for _ in 0..5 {
            let ReconnectDecision::Retry { delay, .. } = policy.next_attempt() else {
                panic!("expected retry");
            };
            assert_eq!(delay, Duration::from_secs(3));
        }
    }

    #[test]
    fn reset_restores_budget() {
        let mut policy = ReconnectPolicy::new(Duration::from_secs(1), 1);
        policy.next_attempt();
        assert!(matches!(policy.next_attempt(), ReconnectDecision::GiveUp { .. }));

        policy.reset();
        assert_eq!(policy.attempts(), 0);
        assert!(matches!(
            policy.next_attempt(),
            ReconnectDecision::Retry { attempt: 1, .. }
        ));
    }

    #[test]
    fn zero_max_never_retries() {
        let mut policy = ReconnectPolicy::new(Duration::from_secs(1), 0);
        assert_eq!(
            policy.next_attempt(),
            ReconnectDecision::GiveUp { attempts: 0 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_aborts_pending_attempt() {
        let mut policy = ReconnectPolicy::new(Duration::from_secs(1), 3);
        policy.set_pending(tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }));
        assert!(policy.is_pending());

        policy.cancel();
        assert!(!policy.is_pending());
    }
}
