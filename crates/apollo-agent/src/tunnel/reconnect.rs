//! Reconnect delay policy

use std::time::Duration;

use apollo_core::config::BackoffConfig;

/// Exponential backoff with jitter between reconnect attempts.
///
/// With the default multiplier of 1.0 this is a fixed reconnect interval.
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

    /// Create a backoff with custom parameters.
    ///
    /// `max` is raised to `initial` if it is smaller. A NaN multiplier
    /// counts as 1.0 and a NaN jitter as 0.0.
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            initial,
            current: initial,
            max: max.max(initial),
            multiplier: if multiplier.is_nan() { 1.0 } else { multiplier.max(1.0) },
            jitter: if jitter.is_nan() { 0.0 } else { jitter.clamp(0.0, 1.0) },
        }
    }

    /// Get the next delay and advance the backoff
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;

        let next = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max);
        self.current = next.min(self.max);

        if self.jitter == 0.0 {
            return delay;
        }
        let jitter_amount = delay.as_secs_f64() * self.jitter * rand::random::<f64>();
        Duration::try_from_secs_f64(jitter_amount)
            .ok()
            .and_then(|jitter| delay.checked_add(jitter))
            .unwrap_or(delay)
    }

    /// Go back to the initial delay
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
