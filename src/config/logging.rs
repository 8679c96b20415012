use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Where the driver binary writes its log file
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default = "default_log_file")]
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            file_name: default_log_file(),
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.log_dir.as_os_str().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "log_dir path cannot be empty".into(),
            )));
        }

        if self.file_name.is_empty() || self.file_name.contains(['/', '\\']) {
            return Err(Error::Config(ConfigError::Message(format!(
                "log file_name {:?} must be a plain file name",
                self.file_name
            ))));
        }

        Ok(())
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_dir.join(&self.file_name)
    }
}

fn default_log_dir() -> PathBuf {
    std::env::temp_dir().join("d-fleet").join("logs")
}
fn default_log_file() -> String {
    "d-fleet.log".to_string()
}
