use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Liveness and event fan-out parameters of the discovery registry
///
/// An instance that stays silent for `liveness_timeout_ms` is presumed dead.
/// The sweeper runs every `sweep_interval_ms`, so a dead instance disappears
/// from every watcher within `liveness_timeout_ms + sweep_interval_ms`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DiscoveryConfig {
    /// How often a running instance reports that it is alive
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Silence after which an instance is presumed dead
    #[serde(default = "default_liveness_timeout_ms")]
    pub liveness_timeout_ms: u64,

    /// Period of the expiry sweeper
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Capacity of the membership event channel; lagging watchers resync
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            liveness_timeout_ms: default_liveness_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            event_buffer_size: default_event_buffer_size(),
        }
    }
}

impl DiscoveryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "heartbeat_interval_ms cannot be 0".into(),
            )));
        }

        if self.liveness_timeout_ms <= self.heartbeat_interval_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "liveness_timeout_ms {}ms must be greater than heartbeat_interval_ms {}ms",
                self.liveness_timeout_ms, self.heartbeat_interval_ms
            ))));
        }

        if self.sweep_interval_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "sweep_interval_ms cannot be 0".into(),
            )));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "event_buffer_size must be > 0".into(),
            )));
        }

        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Worst-case delay before a silent instance leaves every watcher's view
    pub fn staleness_bound(&self) -> Duration {
        self.liveness_timeout() + self.sweep_interval()
    }
}

fn default_heartbeat_interval_ms() -> u64 {
    1000
}
fn default_liveness_timeout_ms() -> u64 {
    3000
}
fn default_sweep_interval_ms() -> u64 {
    500
}
fn default_event_buffer_size() -> usize {
    1024
}
