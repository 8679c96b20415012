use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StagingConfig {
    /// Where bundles are captured at prepare time
    #[serde(default = "default_staging_root")]
    pub staging_root: PathBuf,

    /// Parent of every instance working directory (local backend)
    #[serde(default = "default_work_root")]
    pub work_root: PathBuf,

    /// Buffer used when streaming bundle content
    #[serde(default = "default_copy_buffer_size")]
    pub copy_buffer_size: usize,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            staging_root: default_staging_root(),
            work_root: default_work_root(),
            copy_buffer_size: default_copy_buffer_size(),
        }
    }
}

impl StagingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.staging_root.as_os_str().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "staging_root path cannot be empty".into(),
            )));
        }

        if self.work_root.as_os_str().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "work_root path cannot be empty".into(),
            )));
        }

        if self.staging_root == self.work_root {
            return Err(Error::Config(ConfigError::Message(format!(
                "staging_root and work_root must differ (both {})",
                self.staging_root.display()
            ))));
        }

        if self.copy_buffer_size < 512 {
            return Err(Error::Config(ConfigError::Message(format!(
                "copy_buffer_size {} must be at least 512 bytes",
                self.copy_buffer_size
            ))));
        }

        Ok(())
    }
}

fn default_staging_root() -> PathBuf {
    std::env::temp_dir().join("d-fleet").join("staging")
}
fn default_work_root() -> PathBuf {
    std::env::temp_dir().join("d-fleet").join("work")
}
fn default_copy_buffer_size() -> usize {
    64 * 1024
}
