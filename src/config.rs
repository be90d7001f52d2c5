//! Configuration file support for the bridge.
//!
//! Settings load from an explicit `--config` path, or from
//! `~/.config/dx-bridge/config.toml` (platform-appropriate location on
//! other OSes). Every option has a default; the bridge runs with no
//! configuration file at all.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Cluster-facing connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Cluster hostname.
    pub host: String,

    /// Cluster telnet port.
    pub port: u16,

    /// Callsign sent in response to the login prompt. Empty disables
    /// login entirely.
    pub user: String,

    /// Password sent in response to the password prompt, if any.
    pub password: String,

    /// Connection timeout in seconds.
    pub connect_timeout: f64,

    /// Per-line read timeout in seconds; expiry tears the session down
    /// for a reconnect.
    pub read_timeout: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 7300,
            user: String::new(),
            password: String::new(),
            connect_timeout: 30.0,
            read_timeout: 120.0,
        }
    }
}

/// Subscriber-facing WebSocket listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the listener on.
    pub bind: String,

    /// Listener port.
    pub port: u16,

    /// WebSocket subscription path; connections to any other path are
    /// rejected.
    pub path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 7373,
            path: "/spots".to_string(),
        }
    }
}

/// Reconnect backoff bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first retry, in seconds.
    pub initial_delay: f64,

    /// Backoff ceiling, in seconds.
    pub max_delay: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: 3.0,
            max_delay: 60.0,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error).
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cluster: ClusterConfig,
    pub server: ServerConfig,
    pub reconnect: ReconnectConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit path must exist and parse. With no path, the default
    /// location is used if present; otherwise built-in defaults apply.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_file(path),
            None => match Self::config_path() {
                Some(path) if path.exists() => Self::load_file(&path),
                _ => Ok(Config::default()),
            },
        }
    }

    fn load_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Invalid TOML in config file: {}", path.display()))
    }

    /// Returns the default config file path.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("dx-bridge/config.toml"))
    }

    /// Validate configuration settings.
    pub fn validate(&self) -> Result<()> {
        if !self.server.path.starts_with('/') {
            bail!("server.path must start with '/': {}", self.server.path);
        }
        if self.reconnect.initial_delay <= 0.0 {
            bail!(
                "reconnect.initial_delay must be positive: {}",
                self.reconnect.initial_delay
            );
        }
        if self.reconnect.max_delay < self.reconnect.initial_delay {
            bail!(
                "reconnect.max_delay ({}) must be >= reconnect.initial_delay ({})",
                self.reconnect.max_delay,
                self.reconnect.initial_delay
            );
        }
        if self.cluster.read_timeout <= 0.0 {
            bail!(
                "cluster.read_timeout must be positive: {}",
                self.cluster.read_timeout
            );
        }
        Ok(())
    }
}
