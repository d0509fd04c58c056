//! Row formatters for export artifacts
//!
//! A formatter turns one page of documents into bytes. It is called once per
//! page in fetch order and owns the decision of when to emit a header.

use mongodb::bson::Document;

use crate::error::ExecutionError;
use crate::model::{ExportConfig, ExportFormat};

pub mod csv;
pub mod jsonl;

pub use csv::CsvFormatter;
pub use jsonl::JsonLinesFormatter;

/// Encodes pages of rows
pub trait RowFormatter: Send {
    /// Encode one page; the first call also carries the header, if any
    fn encode(&mut self, rows: &[Document]) -> Result<Vec<u8>, ExecutionError>;

    /// Bytes for an export that produced no rows at all
    fn empty(&mut self) -> Vec<u8> {
        Vec::new()
    }
}

/// Formatter for the configured output format
pub fn for_config(config: &ExportConfig) -> Box<dyn RowFormatter> {
    match config.format {
        ExportFormat::Csv { separator } => {
            Box::new(CsvFormatter::new(config.columns.clone(), separator))
        }
        ExportFormat::JsonLines => Box::new(JsonLinesFormatter::new(config.columns.clone())),
    }
}
