use crate::core::config::data::{path_display, Config};
use directories::ProjectDirs;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A config file that exists but cannot be used.
#[derive(Debug)]
pub enum ConfigError {
    Read(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read(path, err) => {
                write!(f, "Failed to read config at {}: {err}", path_display(path))
            }
            ConfigError::Parse(path, err) => {
                write!(f, "Failed to parse config at {}: {err}", path_display(path))
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read(_, err) => Some(err),
            ConfigError::Parse(_, err) => Some(err),
        }
    }
}

impl Config {
    /// Load the file at `config_path`; a missing file yields the defaults.
    pub fn load_from_path(config_path: &Path) -> Result<Config, ConfigError> {
        if !config_path.exists() {
            debug!(path = %path_display(config_path), "no config file, using defaults");
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(config_path)
            .map_err(|err| ConfigError::Read(config_path.to_path_buf(), err))?;
        toml::from_str(&contents).map_err(|err| ConfigError::Parse(config_path.to_path_buf(), err))
    }

    /// Load from the platform config directory, or the defaults when none
    /// can be determined.
    pub fn load() -> Result<Config, ConfigError> {
        match Self::get_config_path() {
            Some(path) => Self::load_from_path(&path),
            None => {
                warn!("could not determine config directory, using defaults");
                Ok(Config::default())
            }
        }
    }

    pub fn get_config_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "disa", "disa")
            .map(|proj_dirs| proj_dirs.config_dir().join("config.toml"))
    }
}
