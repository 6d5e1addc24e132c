//! Configuration management for the module host.
//!
//! Loads and validates the host configuration from a TOML file and converts
//! it into the settings the module system expects.

use module_api::ENGLISH;
use module_system::{is_locale_name, ModuleSystemConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Log levels accepted in `[logging] level`.
pub const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Errors raised while loading or validating the configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access configuration file {path}: {reason}")]
    Io { path: String, reason: String },
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
    #[error("Failed to serialize configuration: {0}")]
    Serialize(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Application configuration loaded from a TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Module loading settings
    #[serde(default)]
    pub modules: ModuleSettings,
    /// Localization settings
    #[serde(default)]
    pub localization: LocalizationSettings,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Where bundles come from and where their files go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSettings {
    /// Directory scanned for module bundles
    pub directory: String,
    /// Directory bundle resources are mounted under
    #[serde(default = "default_resource_root")]
    pub resource_root: String,
    /// Directory payload libraries are staged in
    #[serde(default = "default_cache_directory")]
    pub cache_directory: String,
    /// Load modules on startup
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_resource_root() -> String {
    "resources".to_string()
}

fn default_cache_directory() -> String {
    "cache".to_string()
}

fn default_enabled() -> bool {
    true
}

impl Default for ModuleSettings {
    fn default() -> Self {
        Self {
            directory: "modules".to_string(),
            resource_root: default_resource_root(),
            cache_directory: default_cache_directory(),
            enabled: default_enabled(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizationSettings {
    /// Language selected once module translations are registered
    pub default_language: String,
}

impl Default for LocalizationSettings {
    fn default() -> Self {
        Self {
            default_language: ENGLISH.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter, overridden by `RUST_LOG`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration to `path`
    /// and returns it.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    pub async fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let io_error = |e: std::io::Error| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        };

        if path.exists() {
            let content = tokio::fs::read_to_string(path).await.map_err(io_error)?;
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)
                .map_err(|e| ConfigError::Serialize(e.to_string()))?;
            tokio::fs::write(path, toml_content).await.map_err(io_error)?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Directories handed to the module system.
    pub fn to_module_system_config(&self) -> ModuleSystemConfig {
        ModuleSystemConfig {
            modules_directory: PathBuf::from(&self.modules.directory),
            resource_root: PathBuf::from(&self.modules.resource_root),
            cache_directory: PathBuf::from(&self.modules.cache_directory),
        }
    }

    /// Checks directories, the log level and the default language.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let directories = [
            ("Module directory", &self.modules.directory),
            ("Resource root", &self.modules.resource_root),
            ("Cache directory", &self.modules.cache_directory),
        ];
        for (label, value) in directories {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{} cannot be empty", label)));
            }
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level, VALID_LOG_LEVELS
            )));
        }

        if !is_locale_name(&self.localization.default_language) {
            return Err(ConfigError::Invalid(format!(
                "Invalid default language: {}",
                self.localization.default_language
            )));
        }

        Ok(())
    }
}
