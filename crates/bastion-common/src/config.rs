//! Configuration management for bastion

use bastion_core::{Error, FismaLevel, HostDescriptor, Result, Version};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Filesystem locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Host classification and overrides
    #[serde(default)]
    pub host: HostConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config: {}", e)))
    }

    /// Create a configuration builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Merge with environment variables (BASTION_ prefix)
    pub fn merge_env(mut self) -> Self {
        // Paths
        if let Ok(val) = std::env::var("BASTION_STATE_DIR") {
            self.paths.state_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("BASTION_ARCHIVE_DIR") {
            self.paths.archive_dir = Some(PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("BASTION_RULE_CONFIG") {
            self.paths.rule_config = PathBuf::from(val);
        }

        // Host
        if let Ok(val) = std::env::var("BASTION_FISMA") {
            if let Some(level) = parse_fisma(&val) {
                self.host.fisma = level;
            }
        }

        // Logging
        if let Ok(val) = std::env::var("BASTION_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("BASTION_LOG_FORMAT") {
            self.logging.format = val;
        }

        self
    }
}

fn parse_fisma(value: &str) -> Option<FismaLevel> {
    match value.trim().to_lowercase().as_str() {
        "low" => Some(FismaLevel::Low),
        "med" | "medium" => Some(FismaLevel::Med),
        "high" => Some(FismaLevel::High),
        _ => None,
    }
}

/// Filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding the change event log
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Directory holding file backups (defaults to `<state_dir>/archive`)
    pub archive_dir: Option<PathBuf>,

    /// Persisted rule configuration items
    #[serde(default = "default_rule_config")]
    pub rule_config: PathBuf,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/bastion")
}

fn default_rule_config() -> PathBuf {
    PathBuf::from("/etc/bastion/rules.toml")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            archive_dir: None,
            rule_config: default_rule_config(),
        }
    }
}

impl PathsConfig {
    /// Effective backup directory
    pub fn archive_dir(&self) -> PathBuf {
        self.archive_dir
            .clone()
            .unwrap_or_else(|| self.state_dir.join("archive"))
    }

    /// Location of the durable change event log
    pub fn event_log(&self) -> PathBuf {
        self.state_dir.join("eventlog.json")
    }
}

/// Host classification and detection overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    /// FIPS 199 risk category of this host
    #[serde(default)]
    pub fisma: FismaLevel,

    /// Override the detected OS type
    pub os_type: Option<String>,

    /// Override the detected OS version
    pub os_version: Option<String>,
}

impl HostConfig {
    /// Apply the configured category and overrides to a detected host
    pub fn apply(&self, mut host: HostDescriptor) -> HostDescriptor {
        if let Some(os_type) = &self.os_type {
            host.os_type = os_type.clone();
        }
        if let Some(os_version) = &self.os_version {
            host.os_version = Version::parse(os_version.as_str());
        }
        host.with_fisma(self.fisma)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    String::from("info")
}

fn default_log_format() -> String {
    String::from("compact")
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Builder for constructing Config
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.paths.state_dir = dir.into();
        self
    }

    pub fn archive_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.paths.archive_dir = Some(dir.into());
        self
    }

    pub fn rule_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.paths.rule_config = path.into();
        self
    }

    pub fn fisma(mut self, level: FismaLevel) -> Self {
        self.config.host.fisma = level;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
