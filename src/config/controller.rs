use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ControllerConfig {
    /// Upper bound of `terminate()`
    #[serde(default = "default_terminate_timeout_ms")]
    pub terminate_timeout_ms: u64,

    /// Time between the stop signal and a kill, and between a kill and
    /// forced cleanup of stragglers
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,

    /// Delay before a failed instance is relaunched
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,

    /// Restart budget per replica under `RestartPolicy::Always`
    #[serde(default = "default_max_restarts_for_always")]
    pub max_restarts_for_always: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            terminate_timeout_ms: default_terminate_timeout_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            restart_delay_ms: default_restart_delay_ms(),
            max_restarts_for_always: default_max_restarts_for_always(),
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.terminate_timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "terminate_timeout_ms cannot be 0".into(),
            )));
        }

        if self.stop_grace_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "stop_grace_ms cannot be 0".into(),
            )));
        }

        Ok(())
    }

    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_millis(self.terminate_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

fn default_terminate_timeout_ms() -> u64 {
    30_000
}
fn default_stop_grace_ms() -> u64 {
    5_000
}
fn default_restart_delay_ms() -> u64 {
    200
}
fn default_max_restarts_for_always() -> u32 {
    u32::MAX
}
