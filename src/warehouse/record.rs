//! Raw record projections
//!
//! The warehouse API returns records as free-form JSON objects. They are
//! never mutated, only read and projected into the fields the pipeline
//! cares about. Some report endpoints do not carry a bare `id` field; for
//! those the identity is the trailing path segment of the record's
//! self-referencing `meta.href` URL.

use chrono::DateTime;
use chrono_tz::Europe::Kiev;
use serde_json::Value;

/// A raw record as returned by the warehouse API
pub type RawRecord = serde_json::Map<String, Value>;

/// Extract the trailing path segment of a self-referencing URL, with any
/// query string stripped
pub fn extract_id_from_href(href: &str) -> Option<String> {
    let last = href.rsplit('/').next()?;
    let id = last.split('?').next().unwrap_or(last);
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Stable identity of a record: a bare `id` field when present, otherwise
/// the trailing segment of `meta.href`. `None` marks a malformed record.
pub fn identity(record: &RawRecord) -> Option<String> {
    if let Some(Value::String(id)) = record.get("id") {
        if !id.is_empty() {
            return Some(id.clone());
        }
    }
    record
        .get("meta")
        .and_then(|meta| meta.get("href"))
        .and_then(Value::as_str)
        .and_then(extract_id_from_href)
}

/// String field with an empty-string default
pub fn str_field(record: &RawRecord, name: &str) -> String {
    record
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Sale price in currency units. Entity endpoints wrap the price in
/// `{"value": ...}` denominated in minor units; report endpoints return a
/// bare number already in currency units.
pub fn sale_price(record: &RawRecord) -> f64 {
    match record.get("salePrice") {
        Some(Value::Object(map)) => map.get("value").and_then(Value::as_f64).unwrap_or(0.0) / 100.0,
        Some(value) => value.as_f64().unwrap_or(0.0),
        None => 0.0,
    }
}

/// Stock count, 0 when absent
pub fn stock(record: &RawRecord) -> f64 {
    record.get("stock").and_then(Value::as_f64).unwrap_or(0.0)
}

/// Comma-joined names of warehouses holding a non-zero balance
pub fn stores(record: &RawRecord) -> String {
    let Some(Value::Array(by_store)) = record.get("stockByStore") else {
        return String::new();
    };
    let names: Vec<&str> = by_store
        .iter()
        .filter(|entry| entry.get("stock").and_then(Value::as_f64).unwrap_or(0.0) > 0.0)
        .filter_map(|entry| entry.get("name").and_then(Value::as_str))
        .collect();
    names.join(", ")
}

/// Category path: `pathName` when present, otherwise the containing
/// folder's path name or plain name
pub fn category_path(record: &RawRecord) -> String {
    let path_name = str_field(record, "pathName");
    if !path_name.is_empty() {
        return path_name;
    }
    let Some(Value::Object(folder)) = record.get("folder") else {
        return String::new();
    };
    match folder.get("pathName").and_then(Value::as_str) {
        Some(path) if !path.is_empty() => path.to_string(),
        _ => folder
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

/// Normalize an API `updated` timestamp to "DD.MM.YY HH:MM" in Kiev time,
/// the format the business reads. Unparseable input passes through as-is.
pub fn format_updated(updated: &str) -> String {
    if updated.is_empty() {
        return String::new();
    }
    // API format: "2024-05-12 10:15:30.000" (Moscow time) or RFC 3339
    let parsed = DateTime::parse_from_rfc3339(updated).ok().or_else(|| {
        DateTime::parse_from_str(&format!("{} +0300", updated), "%Y-%m-%d %H:%M:%S%.3f %z").ok()
    });
    match parsed {
        Some(dt) => dt.with_timezone(&Kiev).format("%d.%m.%y %H:%M").to_string(),
        None => updated.to_string(),
    }
}
