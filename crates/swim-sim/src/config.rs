//! Simulation configuration.

use std::time::Duration;

use swim_detector::DetectorConfig;
use swim_relay::RelayConfig;

use crate::error::{Error, Result};

/// Configuration for the simulation.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Seed for deterministic simulation
    pub seed: u64,
    /// Lower bound of the uniform link latency
    pub min_latency: Duration,
    /// Upper bound of the uniform link latency
    pub max_latency: Duration,
    /// Probability that a single message is lost (0.0 - 1.0)
    pub loss: f64,
    /// How often each node receives a peer sample
    pub sample_interval: Duration,
    /// Peers per sample
    pub sample_size: usize,
    pub detector: DetectorConfig,
    pub relay: RelayConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            min_latency: Duration::from_millis(50),
            max_latency: Duration::from_millis(500),
            loss: 0.0,
            sample_interval: Duration::from_millis(1000),
            sample_size: 5,
            detector: DetectorConfig::default(),
            relay: RelayConfig::default(),
        }
    }
}

impl SimulationConfig {
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    #[must_use]
    pub fn with_latency(mut self, min: Duration, max: Duration) -> Self {
        self.min_latency = min;
        self.max_latency = max;
        self
    }

    #[must_use]
    pub fn with_loss(mut self, loss: f64) -> Self {
        self.loss = loss;
        self
    }

    #[must_use]
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    #[must_use]
    pub fn with_sample_size(mut self, size: usize) -> Self {
        self.sample_size = size;
        self
    }

    #[must_use]
    pub fn with_detector(mut self, detector: DetectorConfig) -> Self {
        self.detector = detector;
        self
    }

    #[must_use]
    pub fn with_relay(mut self, relay: RelayConfig) -> Self {
        self.relay = relay;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.detector.validate().map_err(swim_node::Error::from)?;
        self.relay.validate().map_err(swim_node::Error::from)?;
        if self.min_latency > self.max_latency {
            return Err(Error::Config(format!(
                "min_latency {:?} exceeds max_latency {:?}",
                self.min_latency, self.max_latency
            )));
        }
        if !(0.0..=1.0).contains(&self.loss) {
            return Err(Error::Config(format!("loss {} outside [0, 1]", self.loss)));
        }
        if self.sample_interval.is_zero() {
            return Err(Error::Config("sample_interval must be non-zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(SimulationConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_latency_and_bad_loss() {
        let inverted = SimulationConfig::default()
            .with_latency(Duration::from_millis(10), Duration::from_millis(5));
        assert!(matches!(inverted.validate(), Err(Error::Config(_))));

        let lossy = SimulationConfig::default().with_loss(1.5);
        assert!(matches!(lossy.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn protocol_settings_are_checked_too() {
        let config = SimulationConfig::default()
            .with_detector(DetectorConfig::default().with_k(4).with_lambda(0.0));
        assert!(matches!(config.validate(), Err(Error::Node(_))));
    }
}
