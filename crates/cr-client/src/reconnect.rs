//! Reconnect delay policy

use std::time::Duration;

use cr_core::config::BackoffConfig;

/// Backoff with multiplier, cap and jitter
///
/// With the default configuration (multiplier 1.0, no jitter) every delay
/// equals the initial interval.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    current: Duration,
    max: Duration,
    multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    jitter: f64,
}

impl ExponentialBackoff {
    /// Create a backoff from configuration
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.initial, config.max, config.multiplier, config.jitter)
    }

    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            initial,
            current: initial,
            max: max.max(initial),
            multiplier: multiplier.max(1.0),
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// Get the next delay and advance the backoff
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;

        let next = Duration::from_secs_f64(self.current.as_secs_f64() * self.multiplier);
        self.current = std::cmp::min(next, self.max);

        if self.jitter == 0.0 {
            return delay;
        }
        let jitter_amount = delay.as_secs_f64() * self.jitter * rand::random::<f64>();
        delay + Duration::from_secs_f64(jitter_amount)
    }

    /// Start over from the initial delay
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
