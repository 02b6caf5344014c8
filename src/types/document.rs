//! Loosely typed entity documents

use serde_json::{Map, Value};

/// An entity body as an ordered map of field name to JSON value.
///
/// `serde_json` is built with `preserve_order`, so field order survives a
/// read-modify-write cycle through the pipeline.
pub type Document = Map<String, Value>;

/// Resolve a dot-separated field path against a document.
///
/// Missing intermediate objects resolve to `None` instead of failing.
/// Numeric segments index into arrays (`milestones.0.due`).
pub fn resolve_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = doc.get(first)?;

    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Read the first non-empty string among several candidate field names
pub fn string_field(doc: &Document, names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| doc.get(*name))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}
