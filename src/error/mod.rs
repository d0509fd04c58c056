//! Error handling for the export service.
//!
//! Errors fall into four groups:
//! - Admission errors, returned synchronously to the requester with no state change
//! - Execution errors, captured on the export item as its terminal message
//! - Configuration errors, raised while loading settings at startup
//! - Transport errors (I/O, MongoDB driver, JSON) wrapped for `?` propagation
//!
//! Cancellation is not an error: a canceled export ends in `Status::Canceled`.

pub mod kinds;

// Re-export commonly used types
pub use kinds::{AdmissionError, ConfigError, ExecutionError, ExportdError, Result};
