//! Host configuration file
//!
//! TOML settings for the host: processing format, where to look for plugins,
//! the registry cache and a default chain. Stored in the platform config
//! directory unless a path is given:
//! - Linux: ~/.config/vstbridge/config.toml
//! - Windows: %APPDATA%\vstbridge\config.toml
//! - macOS: ~/Library/Application Support/vstbridge/config.toml

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::plugin::{default_search_paths, HostSettings, MAX_BLOCK_SIZE};

/// Application name used for the configuration directory
const APP_NAME: &str = "vstbridge";

const DEFAULT_SAMPLE_RATE: f32 = 44100.0;
const DEFAULT_BLOCK_SIZE: usize = 512;

#[derive(Error, Debug)]
pub enum ConfigFileError {
    #[error("Could not determine the configuration directory")]
    NoConfigDir,

    #[error("Failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Host configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    /// Processing sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f32,

    /// Maximum frames per process call, 1..=8192
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Directories scanned for plugin modules
    #[serde(default = "default_search_paths")]
    pub search_paths: Vec<PathBuf>,

    /// JSON registry cache; rescanned on every run when unset
    #[serde(default)]
    pub registry_cache: Option<PathBuf>,

    /// Unique IDs of the default effect chain, in order
    #[serde(default)]
    pub chain: Vec<String>,
}

fn default_sample_rate() -> f32 {
    DEFAULT_SAMPLE_RATE
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            search_paths: default_search_paths(),
            registry_cache: None,
            chain: Vec::new(),
        }
    }
}

impl HostConfig {
    /// Validate the configuration values
    pub fn validate(&self) -> Result<(), ConfigFileError> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(ConfigFileError::Invalid(format!(
                "sample_rate must be positive, got {}",
                self.sample_rate
            )));
        }

        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return Err(ConfigFileError::Invalid(format!(
                "block_size must be between 1 and {}, got {}",
                MAX_BLOCK_SIZE, self.block_size
            )));
        }

        if let Some(id) = self.chain.iter().find(|id| id.chars().count() != 4) {
            return Err(ConfigFileError::Invalid(format!(
                "chain entry {:?} is not a four-character plugin ID",
                id
            )));
        }

        Ok(())
    }

    pub fn host_settings(&self) -> HostSettings {
        HostSettings::from(self)
    }
}

impl From<&HostConfig> for HostSettings {
    fn from(config: &HostConfig) -> Self {
        HostSettings {
            sample_rate: config.sample_rate,
            max_block_size: config.block_size,
        }
    }
}

/// Default configuration file path, if the platform has a config directory
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load and validate the configuration at `path`
pub fn load_config(path: &Path) -> Result<HostConfig, ConfigFileError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let config: HostConfig = toml::from_str(&content).map_err(|source| ConfigFileError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    config.validate()?;
    Ok(config)
}

/// Save configuration to `path`, creating its directory if needed
pub fn save_config(path: &Path, config: &HostConfig) -> Result<(), ConfigFileError> {
    config.validate()?;

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|source| ConfigFileError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    fs::write(path, content).map_err(|source| ConfigFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(())
}
