//! Data model for export requests
//!
//! - `ExportConfig` / `Selector` / `Column`: what to extract and how to format it
//! - `ExportItem`: the tracked unit of work with its subscribers and status

pub mod export_config;
pub mod item;

pub use export_config::{Column, ExportConfig, ExportFormat, Selector, ValueFormat};
pub use item::{ExportItem, ItemId, RequesterId, Status};
