//! Configuration for the cic command-line compiler
//!
//! Loaded from a YAML file; environment variables always override file
//! values (`CIC_*` for compiler settings, `RUST_LOG`/`LOG_*` for logging).

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use cic_compiler::Dialect;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid value for {variable}: {message}")]
    InvalidEnvVar { variable: String, message: String },
}

/// Result cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Substitute fresh materializations during compilation
    pub enabled: bool,

    /// Schema the materialized tables live under
    pub schema: String,

    /// Recorded against every committed entry
    pub committer: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            schema: "cache".to_string(),
            committer: "cic".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or module-specific
    pub level: String,

    /// Output format: pretty, json, compact
    pub format: String,

    /// Output destination: stdout, file, both
    pub output: String,

    /// Directory for log files
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            output: "stdout".to_string(),
            directory: "./logs".to_string(),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub dialect: Dialect,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dialect: Dialect::MicrosoftSql,
            cache: CacheConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file with environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&contents)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Environment-only configuration when no file is present
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(dialect) = std::env::var("CIC_DIALECT") {
            self.dialect = dialect
                .parse()
                .map_err(|message| ConfigError::InvalidEnvVar {
                    variable: "CIC_DIALECT".to_string(),
                    message,
                })?;
        }
        if let Ok(enabled) = std::env::var("CIC_CACHE_ENABLED") {
            self.cache.enabled = matches!(enabled.as_str(), "1" | "true" | "yes");
        }
        if let Ok(schema) = std::env::var("CIC_CACHE_SCHEMA") {
            self.cache.schema = schema;
        }
        if let Ok(committer) = std::env::var("CIC_COMMITTER") {
            self.cache.committer = committer;
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Ok(output) = std::env::var("LOG_OUTPUT") {
            self.logging.output = output;
        }
        if let Ok(directory) = std::env::var("LOG_DIR") {
            self.logging.directory = directory;
        }
        Ok(())
    }

    /// Export logging settings for the logging module to pick up
    pub fn apply_logging_env(&self) {
        std::env::set_var("RUST_LOG", &self.logging.level);
        std::env::set_var("LOG_FORMAT", &self.logging.format);
        std::env::set_var("LOG_OUTPUT", &self.logging.output);
        std::env::set_var("LOG_DIR", &self.logging.directory);
    }
}
