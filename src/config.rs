//! Application configuration file
//!
//! Stored as TOML under `~/.teledrive/config.toml`. Every section falls back
//! to defaults, so a partial or missing file still yields a usable setup.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::controller::CollectorSettings;
use crate::drive::{DriveError, DriveSettings};
use crate::mqtt::config::MqttConfig;

const CONFIG_DIR: &str = ".teledrive";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error(transparent)]
    Drive(#[from] DriveError),

    #[error("Invalid controller setting: {0}")]
    Controller(String),

    #[error("Invalid mqtt setting: {0}")]
    Mqtt(String),
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub drive: DriveSettings,
    pub controller: CollectorSettings,
}

impl Config {
    pub fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| {
            warn!("No home directory found, using current directory");
            PathBuf::from(".")
        });
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    /// Loads the file at `path`, writing defaults there first if it does
    /// not exist yet.
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("Creating default configuration at {}", path.display());
            let config = Config::default();
            config.save(path)?;
            return Ok(config);
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&content)?;
        debug!("Loaded configuration from {}: {:?}", path.display(), config);
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(write_err)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.drive.validate()?;

        if !(0.0..1.0).contains(&self.controller.release_threshold) {
            return Err(ConfigError::Controller(format!(
                "release_threshold must be in [0, 1), got {}",
                self.controller.release_threshold
            )));
        }
        if self.controller.event_buffer == 0 {
            return Err(ConfigError::Controller(
                "event_buffer must be positive".into(),
            ));
        }
        if self.mqtt.host.trim().is_empty() {
            return Err(ConfigError::Mqtt("host must not be empty".into()));
        }
        if self.mqtt.client_id.trim().is_empty() {
            return Err(ConfigError::Mqtt("client_id must not be empty".into()));
        }
        Ok(())
    }
}
