//! Framework configuration: defaults, then `ftrack_connect.yaml` in the
//! config directory, then environment overrides.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

pub const CONFIG_FILE_NAME: &str = "ftrack_connect.yaml";
pub const CONFIG_PATH_ENV: &str = "FTRACK_CONNECT_CONFIG_PATH";
pub const MULTITHREADING_ENV: &str = "FTRACK_FRAMEWORK_MULTITHREADING";
pub const DEPENDENCIES_ENV: &str = "FRAMEWORK_DEPENDENCIES";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameworkConfig {
    pub discovery_timeout_ms: u64,
    pub run_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Run requests on a worker thread instead of the event thread.
    pub multithreading: bool,
    /// Broker address (`host:port`); `None` keeps everything in-process.
    pub broker: Option<String>,
    pub definition_paths: Vec<PathBuf>,
    /// Runs kept per host for `log_viewer` requests.
    pub history_size: usize,
    /// Host types whose plugins always run on the DCC main thread.
    pub main_thread_host_types: Vec<String>,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            discovery_timeout_ms: 3_000,
            run_timeout_ms: 600_000,
            connect_timeout_ms: 5_000,
            multithreading: true,
            broker: None,
            definition_paths: Vec::new(),
            history_size: 50,
            main_thread_host_types: ["maya", "nuke", "houdini", "max", "blender", "unreal"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl FrameworkConfig {
    /// Resolves the config directory and loads from it, then applies the
    /// process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match config_dir() {
            Some(dir) => Self::load_from(&dir.join(CONFIG_FILE_NAME))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Reads `path` wholesale. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Writes the whole config to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io = |source: std::io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io)?;
        }
        let text = serde_yaml::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        std::fs::write(path, text).map_err(io)
    }

    /// Applies environment overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(MULTITHREADING_ENV) {
            self.multithreading = parse_switch(&value);
        }
        if let Some(value) = lookup(DEPENDENCIES_ENV) {
            let extra = PathBuf::from(value.trim());
            if !extra.as_os_str().is_empty() && !self.definition_paths.contains(&extra) {
                self.definition_paths.push(extra);
            }
        }
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_millis(self.run_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// `FTRACK_CONNECT_CONFIG_PATH`, else the per-user data directory.
pub fn config_dir() -> Option<PathBuf> {
    match std::env::var_os(CONFIG_PATH_ENV) {
        Some(path) if !path.is_empty() => Some(PathBuf::from(path)),
        _ => dirs::data_dir().map(|dir| dir.join("ftrack-connect")),
    }
}

fn parse_switch(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}
