//! Configuration module
//!
//! Handles loading and saving treasurehunt client configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::network::NetworkConfig;
use crate::protocol::DEFAULT_PORT;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// How to reach the manager over TCP
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Locally spawned manager
    #[serde(default)]
    pub process: ProcessConfig,

    /// Saved credentials
    #[serde(default)]
    pub state: StateConfig,
}

/// General configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Connection timeout in ms
    #[serde(default = "default_timeout")]
    pub connect_timeout_ms: u64,
    /// Per read/write deadline in ms, 0 disables it
    #[serde(default = "default_timeout")]
    pub io_timeout_ms: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout() -> u64 {
    10_000
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_timeout(),
            io_timeout_ms: default_timeout(),
        }
    }
}

/// Spawned manager configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Spawn this executable and talk over its stdin/stdout instead of TCP
    pub executable: Option<PathBuf>,
    /// Working directory (default: the executable's directory)
    pub working_dir: Option<PathBuf>,
}

/// Credential store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    pub directory: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("treasurehunt/config.toml")),
            Some(PathBuf::from("./treasurehunt.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                tracing::debug!("Using config {}", path.display());
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Settings for reaching the manager
    pub fn to_network_config(&self) -> NetworkConfig {
        NetworkConfig {
            executable: self.process.executable.clone(),
            working_dir: self.process.working_dir.clone(),
            connect_timeout_ms: self.connection.connect_timeout_ms,
            io_timeout_ms: self.connection.io_timeout_ms,
            ..NetworkConfig::new(self.connection.host.clone(), self.connection.port)
        }
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        connection: ConnectionConfig {
            host: "treasurehunt.local".to_string(),
            ..Default::default()
        },
        process: ProcessConfig {
            executable: Some(PathBuf::from("/opt/treasurehunt/treasurehunt")),
            working_dir: None,
        },
        state: StateConfig {
            directory: Some(PathBuf::from("/var/lib/treasurehunt")),
        },
        ..Default::default()
    };

    Ok(toml::to_string_pretty(&config)?)
}
