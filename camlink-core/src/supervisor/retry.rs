//! Bounded retry with fixed or linearly growing backoff.

use std::time::Duration;

/// Retry limits for one connection-establishment episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failures tolerated before giving up (at least 1).
    pub max_attempts: u32,
    /// Wait after the first failure.
    pub backoff: Duration,
    /// Added to the wait after every further failure.
    pub backoff_step: Duration,
    /// Upper bound on any single wait.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_secs(2),
            backoff_step: Duration::ZERO,
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Fixed backoff.
    pub fn fixed(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
            backoff_step: Duration::ZERO,
            max_backoff: backoff.max(Duration::from_secs(60)),
        }
    }

    /// Wait before retrying after failure number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let extra = self.backoff_step.saturating_mul(attempt.saturating_sub(1));
        self.backoff.saturating_add(extra).min(self.max_backoff)
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    Exhausted { attempts: u32 },
}

/// Failure counter for one episode.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    attempt_count: u32,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempt_count: 0,
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts.max(1)
    }

    /// Count a failure. `Exhausted` is returned exactly when the count
    /// reaches `max_attempts`.
    pub fn record_failure(&mut self) -> RetryDecision {
        self.attempt_count = self.attempt_count.saturating_add(1);
        if self.attempt_count >= self.max_attempts() {
            RetryDecision::Exhausted {
                attempts: self.attempt_count,
            }
        } else {
            RetryDecision::RetryAfter(self.policy.delay_for(self.attempt_count))
        }
    }

    /// Start a new episode (after a successful connect).
    pub fn reset(&mut self) {
        self.attempt_count = 0;
    }
}
