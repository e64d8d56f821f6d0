//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use config::{Config as ConfigBuilder, ConfigError as BuilderError, Environment, File};
use clap::Args;

use crate::extension::runtime::Platform;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid storage configuration: {0}")]
    InvalidStorage(String),

    #[error("Invalid runtime configuration: {0}")]
    InvalidRuntime(String),

    #[error("Invalid compatibility configuration: {0}")]
    InvalidCompatibility(String),

    #[error("Invalid http configuration: {0}")]
    InvalidHttp(String),

    #[error("Invalid logging configuration: {0}")]
    InvalidLogging(String),

    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

impl From<BuilderError> for ConfigError {
    fn from(err: BuilderError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

impl From<ConfigError> for crate::core::error::BridgeError {
    fn from(err: ConfigError) -> Self {
        crate::core::error::BridgeError::Config(err.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub runtime: RuntimeConfig,
    pub compatibility: CompatibilityConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
}

/// Global command-line options that override configuration values
#[derive(Debug, Clone, Default, Args)]
pub struct GlobalArgs {
    /// Path to configuration file (TOML format)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory path
    #[arg(long, value_name = "DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Runtime platform (auto, managed, desktop)
    #[arg(long, value_name = "PLATFORM", global = true)]
    pub platform: Option<String>,

    /// Log level (debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("./data"))
        .join("tachi-bridge")
}

fn with_defaults(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
    Ok(builder
        .set_default("storage.data_dir", default_data_dir().display().to_string())?
        .set_default("runtime.platform", "auto")?
        .set_default("runtime.converter_program", "d2j-dex2jar.sh")?
        .set_default("runtime.converter_args", vec!["-f"])?
        .set_default("compatibility.min_lib_version", 1.3)?
        .set_default("compatibility.max_lib_version", 1.5)?
        .set_default("http.timeout_secs", 30)?
        .set_default("http.user_agent", format!("tachi-bridge/{}", env!("CARGO_PKG_VERSION")))?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stdout")?
        .set_default("logging.max_file_size", 10485760)? // 10 MB
        .set_default("logging.max_backups", 5)?)
}

impl Config {
    /// Load configuration with precedence: CLI args > Environment variables > Config file > Defaults
    pub fn load(args: &GlobalArgs) -> Result<Self, ConfigError> {
        // 1. Start with defaults (lowest priority)
        let mut builder = with_defaults(ConfigBuilder::builder())?;

        // 2. Load from config file if specified (medium priority)
        if let Some(config_path) = &args.config {
            if !config_path.exists() {
                return Err(ConfigError::FileNotFound(
                    config_path.display().to_string()
                ));
            }
            builder = builder.add_source(File::from(config_path.as_path()));
        }

        // 3. Override with environment variables (higher priority)
        // Example: TACHI__HTTP__TIMEOUT_SECS=60
        builder = builder.add_source(
            Environment::with_prefix("TACHI")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
        );

        // 4. Override with CLI arguments (highest priority)
        if let Some(data_dir) = &args.data_dir {
            builder = builder.set_override("storage.data_dir", data_dir.display().to_string())?;
        }
        if let Some(platform) = &args.platform {
            builder = builder.set_override("runtime.platform", platform.clone())?;
        }
        if let Some(log_level) = &args.log_level {
            builder = builder.set_override("logging.level", log_level.clone())?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file path, filling gaps with defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let config: Config = with_defaults(ConfigBuilder::builder())?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Build the default configuration without consulting files or the environment
    pub fn defaults() -> Result<Self, ConfigError> {
        let config: Config = with_defaults(ConfigBuilder::builder())?
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::LoadError(e.to_string()))
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.storage.validate()?;
        self.runtime.validate()?;
        self.compatibility.validate()?;
        self.http.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Defaults to `<data_dir>/tachi-extensions`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions_dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn extensions_dir(&self) -> PathBuf {
        self.extensions_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("tachi-extensions"))
    }

    pub fn preferences_file(&self) -> PathBuf {
        self.data_dir.join("preferences.json")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidStorage("data_dir cannot be empty".to_string()));
        }

        if let Some(dir) = &self.extensions_dir {
            if dir.as_os_str().is_empty() {
                return Err(ConfigError::InvalidStorage("extensions_dir cannot be empty".to_string()));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub platform: String,
    pub converter_program: PathBuf,
    #[serde(default)]
    pub converter_args: Vec<String>,
}

impl RuntimeConfig {
    /// Resolve the configured platform, mapping `auto` to the build target
    pub fn platform(&self) -> Result<Platform, ConfigError> {
        match self.platform.to_lowercase().as_str() {
            "auto" => Ok(Platform::detect()),
            "managed" => Ok(Platform::Managed),
            "desktop" => Ok(Platform::Desktop),
            other => Err(ConfigError::InvalidRuntime(format!("unknown platform: {}", other))),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.platform()?;

        if self.converter_program.as_os_str().is_empty() {
            return Err(ConfigError::InvalidRuntime("converter_program cannot be empty".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CompatibilityConfig {
    pub min_lib_version: f64,
    pub max_lib_version: f64,
}

impl Default for CompatibilityConfig {
    fn default() -> Self {
        Self {
            min_lib_version: 1.3,
            max_lib_version: 1.5,
        }
    }
}

impl CompatibilityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.min_lib_version.is_finite() || !self.max_lib_version.is_finite() {
            return Err(ConfigError::InvalidCompatibility("lib versions must be finite".to_string()));
        }

        if self.min_lib_version > self.max_lib_version {
            return Err(ConfigError::InvalidCompatibility(
                "min_lib_version must not exceed max_lib_version".to_string()
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl HttpConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidHttp("timeout_secs must be greater than 0".to_string()));
        }

        if self.user_agent.is_empty() {
            return Err(ConfigError::InvalidHttp("user_agent cannot be empty".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    pub max_file_size: usize, // bytes
    pub max_backups: usize,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(ConfigError::InvalidLogging(
                format!("level must be one of: {:?}", valid_levels)
            ));
        }

        let valid_formats = ["json", "text"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(ConfigError::InvalidLogging(
                format!("format must be one of: {:?}", valid_formats)
            ));
        }

        let valid_outputs = ["stdout", "file"];
        if !valid_outputs.contains(&self.output.as_str()) {
            return Err(ConfigError::InvalidLogging(
                format!("output must be one of: {:?}", valid_outputs)
            ));
        }

        if self.output == "file" && self.log_file.is_none() {
            return Err(ConfigError::InvalidLogging(
                "log_file must be specified when output is 'file'".to_string()
            ));
        }

        if self.max_file_size == 0 {
            return Err(ConfigError::InvalidLogging("max_file_size must be greater than 0".to_string()));
        }

        if self.max_backups == 0 {
            return Err(ConfigError::InvalidLogging("max_backups must be greater than 0".to_string()));
        }

        Ok(())
    }
}
