//! Delimited-text formatter
//!
//! With an explicit projection the header is taken from the column labels.
//! Without one, the header is the sorted set of field names seen on the first
//! page; fields that only show up later are dropped since the header has
//! already been written.

use std::collections::BTreeSet;

use mongodb::bson::Document;
use tracing::debug;

use super::RowFormatter;
use crate::error::ExecutionError;
use crate::model::Column;
use crate::pipeline::value;

/// Formatter for CSV-like output with a configurable separator
pub struct CsvFormatter {
    /// Projected columns; filled from the first page when empty
    columns: Vec<Column>,
    /// Field separator
    separator: char,
    /// Whether the header row has been emitted
    header_written: bool,
}

impl CsvFormatter {
    pub fn new(columns: Vec<Column>, separator: char) -> Self {
        Self {
            columns,
            separator,
            header_written: false,
        }
    }

    /// Derive plain columns from the field names of a page
    fn collect_columns(docs: &[Document]) -> Vec<Column> {
        let mut fields = BTreeSet::new();
        for doc in docs {
            for key in doc.keys() {
                fields.insert(key.clone());
            }
        }
        fields.into_iter().map(Column::new).collect()
    }

    fn push_header(&self, out: &mut String) {
        let labels: Vec<String> = self
            .columns
            .iter()
            .map(|column| self.escape(column.label()))
            .collect();
        out.push_str(&labels.join(&self.separator.to_string()));
        out.push('\n');
    }

    fn push_row(&self, doc: &Document, out: &mut String) {
        let cells: Vec<String> = self
            .columns
            .iter()
            .map(|column| {
                let text = value::lookup(doc, &column.field)
                    .map(|v| value::to_text(v, column.format))
                    .unwrap_or_default();
                self.escape(&text)
            })
            .collect();
        out.push_str(&cells.join(&self.separator.to_string()));
        out.push('\n');
    }

    /// Quote a value if it contains the separator, a quote, or a line break
    fn escape(&self, value: &str) -> String {
        if value.contains(self.separator)
            || value.contains('"')
            || value.contains('\n')
            || value.contains('\r')
        {
            format!("\"{}\"", value.replace('"', "\"\""))
        } else {
            value.to_string()
        }
    }
}

impl RowFormatter for CsvFormatter {
    fn encode(&mut self, rows: &[Document]) -> Result<Vec<u8>, ExecutionError> {
        let mut out = String::new();

        if !self.header_written {
            if self.columns.is_empty() {
                self.columns = Self::collect_columns(rows);
                debug!("Derived {} CSV columns from first page", self.columns.len());
            }
            if self.columns.is_empty() {
                return Err(ExecutionError::Formatter(
                    "no columns to export: first page has no fields".to_string(),
                ));
            }
            self.push_header(&mut out);
            self.header_written = true;
        }

        for doc in rows {
            self.push_row(doc, &mut out);
        }

        Ok(out.into_bytes())
    }

    fn empty(&mut self) -> Vec<u8> {
        if self.header_written || self.columns.is_empty() {
            return Vec::new();
        }
        let mut out = String::new();
        self.push_header(&mut out);
        self.header_written = true;
        out.into_bytes()
    }
}
