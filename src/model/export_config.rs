//! Export configuration: what to extract and how to format it
//!
//! Configurations are plain comparable values. Two requests with equal
//! selectors, configuration and title describe the same extraction and are
//! merged into one export item.

use mongodb::bson::Document;
use serde::{Deserialize, Serialize};

/// Default number of rows requested per page.
pub const DEFAULT_CHUNK_SIZE: u32 = 1000;

/// One query against the data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selector {
    /// Database name
    pub database: String,

    /// Collection name
    pub collection: String,

    /// Query filter
    #[serde(default)]
    pub filter: Document,

    /// Sort specification; paging falls back to `_id` ascending when absent
    #[serde(default)]
    pub sort: Option<Document>,
}

impl Selector {
    /// Create a selector matching every document of a collection
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
            filter: Document::new(),
            sort: None,
        }
    }

    /// Set the query filter
    pub fn with_filter(mut self, filter: Document) -> Self {
        self.filter = filter;
        self
    }

    /// Set the sort specification
    pub fn with_sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    /// `database.collection` namespace, used in log lines
    pub fn namespace(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }
}

/// Output format of an export; each variant carries its own options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExportFormat {
    /// Delimited text with a header row
    Csv {
        #[serde(default = "default_separator")]
        separator: char,
    },

    /// One JSON document per line
    JsonLines,
}

fn default_separator() -> char {
    ','
}

impl Default for ExportFormat {
    fn default() -> Self {
        ExportFormat::Csv {
            separator: default_separator(),
        }
    }
}

impl ExportFormat {
    /// File extension of the uncompressed artifact
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv { .. } => "csv",
            ExportFormat::JsonLines => "jsonl",
        }
    }
}

/// Per-column rendering hint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueFormat {
    /// Natural text form of the value
    #[default]
    Plain,

    /// Dates rendered as RFC 3339 strings
    Iso8601,

    /// Dates rendered as milliseconds since the Unix epoch
    EpochMillis,

    /// Numbers rendered with a fixed number of decimals
    Fixed(u8),
}

/// Projected column: source field, output label and format hint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Field path, dots descend into embedded documents
    pub field: String,

    /// Header label; the field path is used when absent
    #[serde(default)]
    pub label: Option<String>,

    /// Rendering hint
    #[serde(default)]
    pub format: ValueFormat,
}

impl Column {
    /// Create a plain column labelled by its field path
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            label: None,
            format: ValueFormat::Plain,
        }
    }

    /// Set the header label
    pub fn labelled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the format hint
    pub fn formatted(mut self, format: ValueFormat) -> Self {
        self.format = format;
        self
    }

    /// Header label
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.field)
    }
}

/// Everything that shapes the artifact of an export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Output format
    #[serde(default)]
    pub format: ExportFormat,

    /// Column projection; empty exports every field
    #[serde(default)]
    pub columns: Vec<Column>,

    /// Maximum number of rows written across all selectors
    #[serde(default)]
    pub row_limit: Option<u64>,

    /// Rows requested per data source page
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,
}

fn default_chunk_size() -> u32 {
    DEFAULT_CHUNK_SIZE
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            format: ExportFormat::default(),
            columns: Vec::new(),
            row_limit: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ExportConfig {
    /// Create a configuration for the given format
    pub fn new(format: ExportFormat) -> Self {
        Self {
            format,
            ..Default::default()
        }
    }

    /// Set the column projection
    pub fn with_columns(mut self, columns: Vec<Column>) -> Self {
        self.columns = columns;
        self
    }

    /// Set the row limit
    pub fn with_row_limit(mut self, limit: u64) -> Self {
        self.row_limit = Some(limit);
        self
    }

    /// Set the page size
    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Page size, never zero
    pub fn page_size(&self) -> u32 {
        self.chunk_size.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[test]
    fn test_config_equality_is_fieldwise() {
        let a = ExportConfig::default().with_columns(vec![Column::new("name").labelled("Name")]);
        let b = ExportConfig::default().with_columns(vec![Column::new("name").labelled("Name")]);
        let c = ExportConfig::default().with_columns(vec![Column::new("name").labelled("NAME")]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, a.clone().with_row_limit(10));
    }

    #[test]
    fn test_column_order_matters() {
        let ab = ExportConfig::default().with_columns(vec![Column::new("a"), Column::new("b")]);
        let ba = ExportConfig::default().with_columns(vec![Column::new("b"), Column::new("a")]);
        assert_ne!(ab, ba);
    }

    #[test]
    fn test_deserialize_from_json() {
        let json = r#"{
            "format": {"type": "csv", "separator": ";"},
            "columns": [
                {"field": "createdAt", "label": "Created", "format": "iso8601"},
                {"field": "price", "format": {"fixed": 2}}
            ],
            "row_limit": 500
        }"#;
        let config: ExportConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.format, ExportFormat::Csv { separator: ';' });
        assert_eq!(config.columns[0].label(), "Created");
        assert_eq!(config.columns[1].label(), "price");
        assert_eq!(config.columns[1].format, ValueFormat::Fixed(2));
        assert_eq!(config.row_limit, Some(500));
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_selector_filter_from_json() {
        let selector: Selector = serde_json::from_str(
            r#"{"database": "shop", "collection": "orders", "filter": {"status": "paid"}}"#,
        )
        .unwrap();
        assert_eq!(selector.filter, doc! { "status": "paid" });
        assert_eq!(selector.namespace(), "shop.orders");
    }

    #[test]
    fn test_page_size_never_zero() {
        assert_eq!(ExportConfig::default().with_chunk_size(0).page_size(), 1);
    }
}
