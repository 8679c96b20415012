//! Configuration management for the orchestration engine.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support (`CONFIG_PATH`)
//! - Environment variable overrides (`FLEET__` prefix)
//! - Component-wise validation
mod controller;
mod discovery;
mod logging;
mod retry;
mod staging;
pub use controller::*;
pub use discovery::*;
pub use logging::*;
pub use retry::*;
pub use staging::*;


use std::env;
use std::fmt::Debug;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::CONFIG_ENV_PREFIX;
use crate::constants::CONFIG_PATH_ENV;
use crate::Result;

/// Main configuration container for the driver and its collaborators
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct FleetConfig {
    /// Service discovery and liveness parameters
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Resource staging and instance working directories
    #[serde(default)]
    pub staging: StagingConfig,
    /// Application supervision and termination bounds
    #[serde(default)]
    pub controller: ControllerConfig,
    /// Retry policies for cluster backend calls
    #[serde(default)]
    pub retry: RetryPolicies,
    /// Log file of the driver binary
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Debug for FleetConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("FleetConfig")
            .field("discovery", &self.discovery)
            .field("controller", &self.controller)
            .field("logging", &self.logging)
            .finish_non_exhaustive()
    }
}

impl FleetConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Configuration sources are merged in the following order (later sources override earlier):
    /// 1. Type defaults (lowest priority)
    /// 2. Configuration file from `CONFIG_PATH` environment variable (if set)
    /// 3. Environment variables with `FLEET__` prefix (highest priority)
    ///
    /// # Note
    /// This method does NOT validate the configuration. Callers MUST call `validate()`
    /// before using the configuration.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("FLEET__DISCOVERY__LIVENESS_TIMEOUT_MS", "5000");
    /// let cfg = FleetConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var(CONFIG_PATH_ENV) {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(CONFIG_ENV_PREFIX)
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .ignore_empty(true)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates configuration and returns validated instance.
    ///
    /// Must be called after all configuration overrides are applied.
    pub fn validate(self) -> Result<Self> {
        self.discovery.validate()?;
        self.staging.validate()?;
        self.controller.validate()?;
        self.retry.validate()?;
        self.logging.validate()?;
        Ok(self)
    }
}
