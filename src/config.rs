//! Election timing configuration.

use core::time::Duration;
use log::error;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The runtime configuration of an election manager. All values are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// Deadline for a single GetStatus or PingFollower call.
    pub rpc_timeout: u64,
    /// Pause between consecutive pings of one follower.
    pub follower_ping_interval: u64,
    /// A follower that hears nothing from its leader for this long starts voting again.
    ///
    /// Must exceed `follower_ping_interval`, so that a single lost ping does not end the epoch.
    pub follower_ping_timeout: u64,
    /// Watchdog armed when following starts, covering the wait for the first ping.
    pub ready_to_follow_timeout: u64,
    /// How long a new leader tolerates rejected pings from a follower that has not yet answered
    /// successfully during this leadership.
    pub potential_follower_timeout: u64,
    /// Pause before the next voting round after an inconclusive one. `0` re-votes immediately.
    pub revote_delay: u64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: 1000,
            follower_ping_interval: 1000,
            follower_ping_timeout: 5000,
            ready_to_follow_timeout: 5000,
            potential_follower_timeout: 5000,
            revote_delay: 0,
        }
    }
}

impl ElectionConfig {
    /// Start building a config from the defaults. Call `validate` when done.
    pub fn build() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout)
    }

    pub fn follower_ping_interval(&self) -> Duration {
        Duration::from_millis(self.follower_ping_interval)
    }

    pub fn follower_ping_timeout(&self) -> Duration {
        Duration::from_millis(self.follower_ping_timeout)
    }

    pub fn ready_to_follow_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_to_follow_timeout)
    }

    pub fn potential_follower_timeout(&self) -> Duration {
        Duration::from_millis(self.potential_follower_timeout)
    }

    pub fn revote_delay(&self) -> Duration {
        Duration::from_millis(self.revote_delay)
    }

    /// Check a config obtained without the builder, e.g. through serde.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_timeout == 0 {
            error!("Configured value for `rpc_timeout` must be positive.");
            return Err(ConfigError::ZeroRpcTimeout);
        }
        if self.follower_ping_interval == 0 {
            error!("Configured value for `follower_ping_interval` must be positive.");
            return Err(ConfigError::ZeroPingInterval);
        }
        if self.follower_ping_timeout <= self.follower_ping_interval {
            error!(
                "Configured `follower_ping_timeout` ({}ms) does not exceed `follower_ping_interval` ({}ms).",
                self.follower_ping_timeout, self.follower_ping_interval
            );
            return Err(ConfigError::PingTimeoutTooShort {
                timeout: self.follower_ping_timeout,
                interval: self.follower_ping_interval,
            });
        }
        Ok(())
    }
}

/// A builder ensuring that an election manager's runtime config is valid.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: ElectionConfig,
}

impl ConfigBuilder {
    pub fn rpc_timeout(mut self, millis: u64) -> Self {
        self.config.rpc_timeout = millis;
        self
    }

    pub fn follower_ping_interval(mut self, millis: u64) -> Self {
        self.config.follower_ping_interval = millis;
        self
    }

    pub fn follower_ping_timeout(mut self, millis: u64) -> Self {
        self.config.follower_ping_timeout = millis;
        self
    }

    pub fn ready_to_follow_timeout(mut self, millis: u64) -> Self {
        self.config.ready_to_follow_timeout = millis;
        self
    }

    pub fn potential_follower_timeout(mut self, millis: u64) -> Self {
        self.config.potential_follower_timeout = millis;
        self
    }

    pub fn revote_delay(mut self, millis: u64) -> Self {
        self.config.revote_delay = millis;
        self
    }

    /// Validate the state of this builder and produce a new `ElectionConfig` if valid.
    pub fn validate(self) -> Result<ElectionConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("rpc_timeout must be positive")]
    ZeroRpcTimeout,
    #[error("follower_ping_interval must be positive")]
    ZeroPingInterval,
    #[error("follower_ping_timeout ({timeout}ms) must exceed follower_ping_interval ({interval}ms)")]
    PingTimeoutTooShort { timeout: u64, interval: u64 },
}
