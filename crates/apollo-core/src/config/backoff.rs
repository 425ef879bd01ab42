//! Reconnect backoff configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::error::ConfigError;

/// Exponential backoff configuration.
///
/// The defaults give a fixed five second reconnect interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Initial delay, the reconnect interval
    #[serde(with = "duration_secs")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_secs")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(5),
            max: Duration::from_secs(60),
            multiplier: 1.0,
            jitter: 0.0,
        }
    }
}

impl BackoffConfig {
    /// Fixed-interval backoff
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial: interval,
            max: interval,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Reject factors that cannot produce a delay
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "backoff.multiplier must be a finite number >= 1.0, got {}",
                self.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::Invalid(format!(
                "backoff.jitter must be between 0.0 and 1.0, got {}",
                self.jitter
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> BackoffConfig {
        toml::from_str(text).unwrap()
    }

    #[test]
    fn test_default_is_valid() {
        assert!(BackoffConfig::default().validate().is_ok());
        assert!(BackoffConfig::fixed(Duration::from_secs(1)).validate().is_ok());
        assert!(parse("multiplier = 2.0\njitter = 1.0").validate().is_ok());
    }

    #[test]
    fn test_non_finite_multiplier_rejected() {
        assert!(matches!(
            parse("multiplier = inf").validate(),
            Err(ConfigError::Invalid(_))
        ));
        assert!(parse("multiplier = nan").validate().is_err());
        assert!(parse("multiplier = 0.5").validate().is_err());
    }

    #[test]
    fn test_out_of_range_jitter_rejected() {
        assert!(parse("jitter = nan").validate().is_err());
        assert!(parse("jitter = -0.1").validate().is_err());
        assert!(parse("jitter = 1.5").validate().is_err());
    }
}
