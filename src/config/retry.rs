use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Basic retry policy template
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct BackoffPolicy {
    /// Maximum number of attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Single operation timeout (unit: milliseconds)
    #[serde(default = "default_op_timeout_ms")]
    pub timeout_ms: u64,

    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff time (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_ms: default_op_timeout_ms(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BackoffPolicy {
    fn validate(
        &self,
        name: &str,
    ) -> Result<()> {
        if self.max_retries == 0 {
            return Err(Error::Config(ConfigError::Message(format!(
                "{name}.max_retries must be > 0"
            ))));
        }

        if self.base_delay_ms > self.max_delay_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "{name}.base_delay_ms {} exceeds max_delay_ms {}",
                self.base_delay_ms, self.max_delay_ms
            ))));
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Divide strategies by backend call
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryPolicies {
    // Instance launch requests
    #[serde(default)]
    pub launch: BackoffPolicy,

    // Stop / kill signals
    #[serde(default)]
    pub signal: BackoffPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            launch: BackoffPolicy {
                max_retries: 3,
                timeout_ms: 10_000,
                base_delay_ms: 100,
                max_delay_ms: 2_000,
            },
            signal: BackoffPolicy {
                max_retries: 3,
                timeout_ms: 1_000,
                base_delay_ms: 50,
                max_delay_ms: 1_000,
            },
        }
    }
}

impl RetryPolicies {
    pub fn validate(&self) -> Result<()> {
        self.launch.validate("retry.launch")?;
        self.signal.validate("retry.signal")?;
        Ok(())
    }
}

fn default_max_retries() -> usize {
    3
}
fn default_op_timeout_ms() -> u64 {
    1_000
}
fn default_base_delay_ms() -> u64 {
    50
}
fn default_max_delay_ms() -> u64 {
    1_000
}
