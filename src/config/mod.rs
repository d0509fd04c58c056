//! Configuration management for exportd
//!
//! Configuration is assembled from several sources:
//! - Configuration file (TOML format)
//! - Environment variables (`EXPORTD_*`)
//! - Command-line arguments
//!
//! Configuration precedence (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file
//! 4. Default values

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Longest accepted retention window, one hundred years
pub const MAX_RETENTION_HOURS: u64 = 100 * 365 * 24;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Export engine configuration
    #[serde(default)]
    pub export: ExportSettings,

    /// Data source configuration
    #[serde(default)]
    pub source: SourceConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Export engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSettings {
    /// Directory receiving artifacts
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Maximum number of distinct pending exports
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Number of workers, fixed at startup
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Depth of each producer/consumer page channel
    #[serde(default = "default_channel_depth")]
    pub channel_depth: usize,

    /// Dispatch tick in milliseconds
    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,

    /// Retention sweep tick in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// How long finished exports and their artifacts are kept, in hours
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,

    /// Gzip-compress artifacts
    #[serde(default = "default_compress")]
    pub compress: bool,
}

/// Data source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// MongoDB connection URI
    #[serde(default = "default_uri")]
    pub uri: String,

    /// Application name reported to the server
    #[serde(default = "default_app_name")]
    pub app_name: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// Enable timestamps in logs
    #[serde(default = "default_log_timestamps")]
    pub timestamps: bool,
}

/// Log level options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

// Default value functions
fn default_base_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("exportd")
        .join("artifacts")
}

fn default_queue_capacity() -> usize {
    10
}

fn default_workers() -> usize {
    2
}

fn default_channel_depth() -> usize {
    10
}

fn default_dispatch_interval_ms() -> u64 {
    1000
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

fn default_retention_hours() -> u64 {
    24
}

fn default_compress() -> bool {
    true
}

fn default_uri() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_app_name() -> String {
    "exportd".to_string()
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_log_timestamps() -> bool {
    true
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
            channel_depth: default_channel_depth(),
            dispatch_interval_ms: default_dispatch_interval_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
            retention_hours: default_retention_hours(),
            compress: default_compress(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            app_name: default_app_name(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            timestamps: default_log_timestamps(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a file
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file (TOML format)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.display().to_string())
            } else {
                ConfigError::InvalidFormat(format!("{}: {}", path.display(), e))
            }
        })?;
        Self::from_toml(&text)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| ConfigError::InvalidFormat(e.to_string()).into())
    }

    /// Load the file (explicit path, else the default path if it exists),
    /// then apply environment overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Self::default_path();
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `EXPORTD_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("EXPORTD_BASE_DIR") {
            self.export.base_dir = PathBuf::from(dir);
        }
        if let Some(value) = lookup("EXPORTD_WORKERS") {
            self.export.workers = parse_number("EXPORTD_WORKERS", &value)?;
        }
        if let Some(value) = lookup("EXPORTD_QUEUE_CAPACITY") {
            self.export.queue_capacity = parse_number("EXPORTD_QUEUE_CAPACITY", &value)?;
        }
        if let Some(value) = lookup("EXPORTD_RETENTION_HOURS") {
            self.export.retention_hours = parse_number("EXPORTD_RETENTION_HOURS", &value)?;
        }
        if let Some(uri) = lookup("EXPORTD_SOURCE_URI") {
            self.source.uri = uri;
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("exportd")
            .join("config.toml")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let export = &self.export;
        let checks = [
            ("export.workers", export.workers as u64),
            ("export.queue_capacity", export.queue_capacity as u64),
            ("export.channel_depth", export.channel_depth as u64),
            ("export.dispatch_interval_ms", export.dispatch_interval_ms),
            ("export.sweep_interval_secs", export.sweep_interval_secs),
            ("export.retention_hours", export.retention_hours),
        ];
        for (field, value) in checks {
            if value == 0 {
                return Err(invalid(field, value));
            }
        }
        if export.retention_hours > MAX_RETENTION_HOURS {
            return Err(invalid("export.retention_hours", export.retention_hours));
        }
        Ok(())
    }
}

impl ExportSettings {
    /// Dispatch tick as Duration
    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    /// Sweep tick as Duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Retention window
    ///
    /// Saturates at `chrono::Duration::MAX`; [`Config::validate`] rejects
    /// values above [`MAX_RETENTION_HOURS`].
    pub fn retention(&self) -> chrono::Duration {
        i64::try_from(self.retention_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .unwrap_or(chrono::Duration::MAX)
    }
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

fn invalid(field: &str, value: u64) -> crate::error::ExportdError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
    .into()
}

fn parse_number<T: std::str::FromStr>(field: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.export.queue_capacity, 10);
        assert_eq!(config.export.workers, 2);
        assert_eq!(config.export.channel_depth, 10);
        assert!(config.export.compress);
        assert_eq!(config.source.uri, "mongodb://localhost:27017");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [export]
            base_dir = "/var/lib/exportd"
            workers = 4

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.export.base_dir, PathBuf::from("/var/lib/exportd"));
        assert_eq!(config.export.workers, 4);
        assert_eq!(config.export.retention_hours, 24);
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            Config::from_toml("export = 3"),
            Err(crate::error::ExportdError::Config(ConfigError::InvalidFormat(_)))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(|key| match key {
                "EXPORTD_WORKERS" => Some("8".to_string()),
                "EXPORTD_SOURCE_URI" => Some("mongodb://db:27017".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.export.workers, 8);
        assert_eq!(config.source.uri, "mongodb://db:27017");

        let bad = config.apply_env(|key| (key == "EXPORTD_QUEUE_CAPACITY").then(|| "many".to_string()));
        assert!(bad.is_err());
    }

    #[test]
    fn test_validate_rejects_zero() {
        let mut config = Config::default();
        config.export.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_retention() {
        let mut config = Config::default();
        config.export.retention_hours = MAX_RETENTION_HOURS;
        assert!(config.validate().is_ok());

        config.export.retention_hours = MAX_RETENTION_HOURS + 1;
        assert!(matches!(
            config.validate(),
            Err(crate::error::ExportdError::Config(ConfigError::InvalidValue { .. }))
        ));

        config
            .apply_env(|key| (key == "EXPORTD_RETENTION_HOURS").then(|| u64::MAX.to_string()))
            .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_retention_saturates() {
        let export = ExportSettings {
            retention_hours: u64::MAX,
            ..ExportSettings::default()
        };
        assert_eq!(export.retention(), chrono::Duration::MAX);

        let export = ExportSettings {
            retention_hours: i64::MAX as u64,
            ..ExportSettings::default()
        };
        assert_eq!(export.retention(), chrono::Duration::MAX);
    }

    #[test]
    fn test_durations() {
        let export = ExportSettings::default();
        assert_eq!(export.dispatch_interval(), Duration::from_secs(1));
        assert_eq!(export.retention(), chrono::Duration::hours(24));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Config::from_file("/nonexistent/exportd.toml"),
            Err(crate::error::ExportdError::Config(ConfigError::FileNotFound(_)))
        ));
    }
}
