//! Relay configuration.

use std::time::Duration;

use crate::error::{Error, Result};

/// Parent maintenance parameters. Only NAT'd nodes use them.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Target number of parents.
    pub parent_count: usize,

    /// Delay between two heartbeat rounds.
    pub heartbeat_interval: Duration,

    /// How long a parent has to answer a heartbeat.
    pub ping_timeout: Duration,

    /// Seed for parent choice and candidate shuffling.
    pub seed: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            parent_count: 3,
            heartbeat_interval: Duration::from_millis(500),
            ping_timeout: Duration::from_millis(500),
            seed: 0,
        }
    }
}

impl RelayConfig {
    #[must_use]
    pub fn with_parent_count(mut self, count: usize) -> Self {
        self.parent_count = count;
        self
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Check that at least one parent is wanted and both intervals are
    /// non-zero.
    pub fn validate(&self) -> Result<()> {
        if self.parent_count == 0 {
            return Err(Error::InvalidConfig(
                "parent_count must be at least 1".to_string(),
            ));
        }
        if self.heartbeat_interval.is_zero() || self.ping_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "heartbeat_interval and ping_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
