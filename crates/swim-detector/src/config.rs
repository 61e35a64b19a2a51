//! Failure detector configuration.

use std::time::Duration;

use swim_membership::DirectoryConfig;

use crate::error::{Error, Result};

/// Timing and dissemination parameters of the failure detector.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Delay between two direct probes.
    pub probe_interval: Duration,

    /// How long to wait for a pong before suspecting the target.
    pub ping_timeout: Duration,

    /// How long a suspect gets before the dead timer is armed.
    pub suspected_timeout: Duration,

    /// Final grace period for indirect probes before declaring death.
    pub dead_timeout: Duration,

    /// Delay between two status reports.
    pub status_interval: Duration,

    /// Indirect probe fan-out.
    pub k: usize,

    /// Maximum gossip records piggybacked on one pong.
    pub max_message_size: usize,

    /// Dissemination redundancy factor (λ).
    pub lambda: f64,

    /// Seed for probe order and helper selection.
    pub seed: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_millis(1000),
            ping_timeout: Duration::from_millis(2000),
            suspected_timeout: Duration::from_millis(2000),
            dead_timeout: Duration::from_millis(2000),
            status_interval: Duration::from_millis(1000),
            k: 4,
            max_message_size: 10_000,
            lambda: 3.0,
            seed: 0,
        }
    }
}

impl DetectorConfig {
    #[must_use]
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    #[must_use]
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_suspected_timeout(mut self, timeout: Duration) -> Self {
        self.suspected_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_dead_timeout(mut self, timeout: Duration) -> Self {
        self.dead_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = interval;
        self
    }

    /// Set the indirect probe fan-out.
    #[must_use]
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    #[must_use]
    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.lambda = lambda;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Check that every interval is non-zero and λ is a positive number.
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("probe_interval", self.probe_interval),
            ("ping_timeout", self.ping_timeout),
            ("suspected_timeout", self.suspected_timeout),
            ("dead_timeout", self.dead_timeout),
            ("status_interval", self.status_interval),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(Error::InvalidConfig(format!("{name} must be non-zero")));
            }
        }
        if !self.lambda.is_finite() || self.lambda <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "lambda must be positive, got {}",
                self.lambda
            )));
        }
        if self.max_message_size == 0 {
            return Err(Error::InvalidConfig(
                "max_message_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Settings for the membership directory.
    pub fn directory(&self) -> DirectoryConfig {
        DirectoryConfig {
            max_message_size: self.max_message_size,
            lambda: self.lambda,
            seed: self.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = DetectorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.k, 4);
        assert_eq!(config.ping_timeout, Duration::from_secs(2));
    }

    #[test]
    fn rejects_zero_interval_and_bad_lambda() {
        let config = DetectorConfig::default().with_dead_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(msg)) if msg.contains("dead_timeout")));

        assert!(DetectorConfig::default().with_lambda(0.0).validate().is_err());
        assert!(DetectorConfig::default().with_lambda(f64::NAN).validate().is_err());
        assert!(DetectorConfig::default()
            .with_max_message_size(0)
            .validate()
            .is_err());
    }
}
