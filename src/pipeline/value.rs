//! BSON value rendering for row formatters
//!
//! Text rendering feeds delimited formats, JSON rendering feeds JSON Lines.
//! Both honour the per-column [`ValueFormat`] hint and fall back to the
//! natural form of the value when the hint does not apply to its type.

use mongodb::bson::{Bson, DateTime, Document};
use serde_json::Value as JsonValue;

use crate::model::ValueFormat;

/// Look up a dotted field path
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    if let Some(value) = doc.get(path) {
        return Some(value);
    }
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Bson::Document(inner) => inner.get(part)?,
            Bson::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Render a value as plain text
pub fn to_text(value: &Bson, format: ValueFormat) -> String {
    match (value, format) {
        (Bson::DateTime(dt), ValueFormat::EpochMillis) => dt.timestamp_millis().to_string(),
        (Bson::DateTime(dt), _) => datetime_to_iso_string(dt),
        (_, ValueFormat::Fixed(decimals)) => match as_f64(value) {
            Some(n) => format!("{:.*}", decimals as usize, n),
            None => plain_text(value),
        },
        _ => plain_text(value),
    }
}

/// Render a value as JSON
pub fn to_json(value: &Bson, format: ValueFormat) -> JsonValue {
    match (value, format) {
        (Bson::DateTime(dt), ValueFormat::EpochMillis) => JsonValue::from(dt.timestamp_millis()),
        (Bson::DateTime(dt), ValueFormat::Iso8601) => JsonValue::String(datetime_to_iso_string(dt)),
        (_, ValueFormat::Fixed(decimals)) => match as_f64(value) {
            Some(n) => serde_json::from_str(&format!("{:.*}", decimals as usize, n))
                .unwrap_or(JsonValue::Null),
            None => value.clone().into_relaxed_extjson(),
        },
        _ => value.clone().into_relaxed_extjson(),
    }
}

fn plain_text(value: &Bson) -> String {
    match value {
        Bson::String(s) => s.clone(),
        Bson::Int32(n) => n.to_string(),
        Bson::Int64(n) => n.to_string(),
        Bson::Double(f) => f.to_string(),
        Bson::Boolean(b) => b.to_string(),
        Bson::Null | Bson::Undefined => String::new(),
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::DateTime(dt) => datetime_to_iso_string(dt),
        Bson::Decimal128(d) => d.to_string(),
        Bson::Binary(bin) => hex::encode(&bin.bytes),
        Bson::RegularExpression(regex) => format!("/{}/{}", regex.pattern, regex.options),
        Bson::Timestamp(ts) => format!("Timestamp({}, {})", ts.time, ts.increment),
        Bson::MinKey => String::from("MinKey"),
        Bson::MaxKey => String::from("MaxKey"),
        Bson::Array(_) | Bson::Document(_) => value.clone().into_relaxed_extjson().to_string(),
        other => format!("{:?}", other),
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(f) => Some(*f),
        Bson::Decimal128(d) => d.to_string().parse().ok(),
        _ => None,
    }
}

fn datetime_to_iso_string(dt: &DateTime) -> String {
    dt.try_to_rfc3339_string()
        .unwrap_or_else(|_| dt.timestamp_millis().to_string())
}
