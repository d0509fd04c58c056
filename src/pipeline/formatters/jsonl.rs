//! JSON Lines formatter
//!
//! Writes one JSON object per row. Whole documents are written in relaxed
//! extended JSON; with a projection, each object holds the projected columns
//! under their labels; missing fields become `null`.

use mongodb::bson::{Bson, Document};
use serde_json::{Map, Value as JsonValue};

use super::RowFormatter;
use crate::error::ExecutionError;
use crate::model::Column;
use crate::pipeline::value;

/// Formatter for newline-delimited JSON
pub struct JsonLinesFormatter {
    columns: Vec<Column>,
}

impl JsonLinesFormatter {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    fn project(&self, doc: &Document) -> JsonValue {
        if self.columns.is_empty() {
            return Bson::Document(doc.clone()).into_relaxed_extjson();
        }
        let mut object = Map::with_capacity(self.columns.len());
        for column in &self.columns {
            let value = value::lookup(doc, &column.field)
                .map(|v| value::to_json(v, column.format))
                .unwrap_or(JsonValue::Null);
            object.insert(column.label().to_string(), value);
        }
        JsonValue::Object(object)
    }
}

impl RowFormatter for JsonLinesFormatter {
    fn encode(&mut self, rows: &[Document]) -> Result<Vec<u8>, ExecutionError> {
        let mut out = Vec::new();
        for doc in rows {
            serde_json::to_writer(&mut out, &self.project(doc))
                .map_err(|e| ExecutionError::Formatter(format!("Failed to encode row: {}", e)))?;
            out.push(b'\n');
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ValueFormat;
    use mongodb::bson::{DateTime, doc};

    #[test]
    fn test_whole_documents() {
        let mut f = JsonLinesFormatter::new(Vec::new());
        let out = f.encode(&[doc! { "a": 1 }, doc! { "b": "x" }]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "{\"a\":1}\n{\"b\":\"x\"}\n");
    }

    #[test]
    fn test_projection_uses_labels() {
        let columns = vec![
            Column::new("at").labelled("when").formatted(ValueFormat::EpochMillis),
            Column::new("nested.v").labelled("v"),
            Column::new("absent"),
        ];
        let mut f = JsonLinesFormatter::new(columns);
        let out = f
            .encode(&[doc! { "at": DateTime::from_millis(1000), "nested": { "v": true } }])
            .unwrap();
        let line: JsonValue = serde_json::from_slice(&out).unwrap();
        assert_eq!(line, serde_json::json!({ "when": 1000, "v": true, "absent": null }));
    }
}
