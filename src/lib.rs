//! Background export service
//!
//! Accepts export requests from many requesters, deduplicates equal requests,
//! runs them on a bounded pool of workers that stream query results into
//! (optionally gzip-compressed) CSV or JSON Lines artifacts, keeps finished
//! exports in an archive and expires them after a retention window.
//!
//! # Modules
//!
//! - `model`: export items, configurations and identities
//! - `queue`: bounded deduplicating admission queue
//! - `worker`: worker pool executing one export per worker
//! - `dispatcher`: moves queued items onto idle workers, drives retention
//! - `pipeline`: producer/consumer streaming from source to artifact
//! - `archive`: finished exports and the retention sweeper
//! - `source`: paged data source abstraction and its MongoDB implementation
//! - `notify`: subscriber notifications
//! - `service`: the public operations tying everything together
//! - `cli`: command-line interface and stdin protocol
//! - `config`: configuration management
//! - `error`: error types and handling
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use exportd::{config::Config, notify::LogNotifier, service::ExportService, source::MongoDataSource};
//! use exportd::model::{ExportConfig, Selector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let source = MongoDataSource::connect(&config.source).await?;
//!     let service = ExportService::new(config.export, Arc::new(source), Arc::new(LogNotifier));
//!     service.start().await?;
//!
//!     let admission = service
//!         .enqueue(vec![Selector::new("shop", "orders")], ExportConfig::default(), "orders", "alice".into())
//!         .await?;
//!     println!("Export {} queued", admission.id());
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod model;
pub mod notify;
pub mod pipeline;
pub mod queue;
pub mod service;
pub mod source;
pub mod worker;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::Config;
pub use error::{ExportdError, Result};
pub use model::{ExportConfig, ExportItem, ItemId, RequesterId, Selector, Status};
pub use queue::Admission;
pub use service::{ExportService, Removal};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version string
///
/// # Returns
/// * `&str` - Version string
pub fn version() -> &'static str {
    VERSION
}
