use std::time::Duration;

/// Reconnect delays never go below this, to avoid hot-looping a dead server.
pub const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Bounded exponential reconnection schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(8), 5)
    }
}

impl BackoffPolicy {
    /// Build a policy, raising values that would break the reconnect contract:
    /// the first delay is at least [`MIN_RECONNECT_DELAY`], the cap is at
    /// least the first delay, and at least one attempt is made.
    pub fn new(initial_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        let initial_delay = initial_delay.max(MIN_RECONNECT_DELAY);
        Self {
            initial_delay,
            max_delay: max_delay.max(initial_delay),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Delay before the 1-based `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }
}

/// Stateful walk through a [`BackoffPolicy`].
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts {
            return None;
        }
        self.attempt += 1;
        Some(self.policy.delay_for(self.attempt))
    }

    /// Attempts handed out so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
