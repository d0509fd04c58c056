use std::path::PathBuf;
use std::{fmt, io};

use crate::model::ItemId;

/// Crate-wide `Result` type using [`ExportdError`] as the error.
///
/// This alias is re-exported by the parent `error` module and is intended
/// to be used throughout the crate for fallible operations.
pub type Result<T> = std::result::Result<T, ExportdError>;

/// Top-level error type for exportd operations.
///
/// This type wraps more specific error kinds and provides a single
/// error type that can be used throughout the crate.
#[derive(Debug)]
pub enum ExportdError {
    /// Request rejected at admission; nothing was mutated.
    Admission(AdmissionError),

    /// Export execution errors, captured on the item.
    Execution(ExecutionError),

    /// Configuration errors.
    Config(ConfigError),

    /// I/O errors.
    Io(io::Error),

    /// MongoDB driver errors.
    MongoDb(mongodb::error::Error),

    /// JSON encoding or decoding errors.
    Json(serde_json::Error),

    /// Generic error with a free-form message.
    Generic(String),
}

/// Admission-specific errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// The queue already holds `capacity` distinct items.
    QueueFull { capacity: usize },

    /// The requester already subscribes to an equal item.
    AlreadySubscribed(ItemId),
}

/// Execution-specific errors.
#[derive(Debug)]
pub enum ExecutionError {
    /// The data source failed while paging.
    DataSource(String),

    /// Rows could not be encoded.
    Formatter(String),

    /// Writing, flushing or removing the artifact failed.
    Filesystem(String),

    /// The artifact path is already taken.
    ArtifactExists(PathBuf),
}

/// Configuration-specific errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file not found.
    FileNotFound(String),

    /// Invalid config format.
    InvalidFormat(String),

    /// Invalid field value.
    InvalidValue { field: String, value: String },
}

/* ========================= Display & Error impls ========================= */

impl fmt::Display for ExportdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportdError::Admission(e) => write!(f, "{e}"),
            ExportdError::Execution(e) => write!(f, "Export failed: {e}"),
            ExportdError::Config(e) => write!(f, "Configuration error: {e}"),
            ExportdError::Io(e) => write!(f, "I/O error: {e}"),
            ExportdError::MongoDb(e) => write!(f, "MongoDB error: {e}"),
            ExportdError::Json(e) => write!(f, "JSON error: {e}"),
            ExportdError::Generic(msg) => write!(f, "{msg}"),
        }
    }
}

impl fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionError::QueueFull { capacity } => {
                write!(f, "Export queue is full ({capacity} pending)")
            }
            AdmissionError::AlreadySubscribed(id) => {
                write!(f, "Already subscribed to export {id}")
            }
        }
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::DataSource(msg) => write!(f, "data source failure: {msg}"),
            ExecutionError::Formatter(msg) => write!(f, "formatter failure: {msg}"),
            ExecutionError::Filesystem(msg) => write!(f, "filesystem failure: {msg}"),
            ExecutionError::ArtifactExists(path) => {
                write!(f, "artifact already exists: {}", path.display())
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {path}"),
            ConfigError::InvalidFormat(msg) => write!(f, "Invalid config format: {msg}"),
            ConfigError::InvalidValue { field, value } => {
                write!(f, "Invalid value '{value}' for field '{field}'")
            }
        }
    }
}

impl std::error::Error for ExportdError {}
impl std::error::Error for AdmissionError {}
impl std::error::Error for ExecutionError {}
impl std::error::Error for ConfigError {}

/* ========================= Conversions to ExportdError ========================= */

impl From<io::Error> for ExportdError {
    fn from(err: io::Error) -> Self {
        ExportdError::Io(err)
    }
}

impl From<mongodb::error::Error> for ExportdError {
    fn from(err: mongodb::error::Error) -> Self {
        ExportdError::MongoDb(err)
    }
}

impl From<serde_json::Error> for ExportdError {
    fn from(err: serde_json::Error) -> Self {
        ExportdError::Json(err)
    }
}

impl From<AdmissionError> for ExportdError {
    fn from(err: AdmissionError) -> Self {
        ExportdError::Admission(err)
    }
}

impl From<ExecutionError> for ExportdError {
    fn from(err: ExecutionError) -> Self {
        ExportdError::Execution(err)
    }
}

impl From<ConfigError> for ExportdError {
    fn from(err: ConfigError) -> Self {
        ExportdError::Config(err)
    }
}

impl From<String> for ExportdError {
    fn from(msg: String) -> Self {
        ExportdError::Generic(msg)
    }
}

impl From<&str> for ExportdError {
    fn from(msg: &str) -> Self {
        ExportdError::Generic(msg.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_error_display() {
        let err = ExportdError::from(AdmissionError::QueueFull { capacity: 3 });
        assert_eq!(err.to_string(), "Export queue is full (3 pending)");
    }

    #[test]
    fn test_execution_error_display() {
        let err = ExecutionError::ArtifactExists(PathBuf::from("/tmp/a.csv"));
        assert_eq!(err.to_string(), "artifact already exists: /tmp/a.csv");
    }
}
