//! Runner configuration file handling
//!
//! This is the runner's own settings file, not the cucumber `.wire` file
//! (see [`crate::wire::config`] for that one).

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use super::paths::config_path;
use super::Result;
use crate::wire::ShutdownMode;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct RunnerConfig {
    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Wire server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Extra environment variables for the test runner
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize)]
pub struct Timeouts {
    /// How long the test runner may run before it is terminated
    #[serde(default = "default_cucumber")]
    pub cucumber_secs: u64,

    /// How long a terminated test runner gets to exit before it is killed
    #[serde(default = "default_kill_grace")]
    pub kill_grace_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            cucumber_secs: default_cucumber(),
            kill_grace_secs: default_kill_grace(),
        }
    }
}

fn default_cucumber() -> u64 {
    10
}
fn default_kill_grace() -> u64 {
    2
}

impl Timeouts {
    pub fn cucumber(&self) -> Duration {
        Duration::from_secs(self.cucumber_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }
}

/// Wire server settings
#[derive(Debug, Deserialize, Default)]
pub struct ServerConfig {
    /// How a pending accept is cancelled once the test runner is done
    #[serde(default)]
    pub shutdown: ShutdownMode,
}

impl RunnerConfig {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }
}
