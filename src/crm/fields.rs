//! Accessors for raw record values
//!
//! Empty fields come back as `false`; relational fields as `[id, "display name"]`.

use serde_json::Value;

use super::{Record, RecordId};

pub fn id(record: &Record) -> Option<RecordId> {
    record.get("id").and_then(Value::as_i64)
}

/// Id side of a many-to-one field
pub fn many2one_id(record: &Record, field: &str) -> Option<RecordId> {
    match record.get(field)? {
        Value::Array(pair) => pair.first().and_then(Value::as_i64),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
    .filter(|id| *id > 0)
}

/// Display-name side of a many-to-one field
pub fn many2one_name(record: &Record, field: &str) -> Option<String> {
    match record.get(field)? {
        Value::Array(pair) => pair.get(1).and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// Non-empty string value
pub fn text(record: &Record, field: &str) -> Option<String> {
    record
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

pub fn float(record: &Record, field: &str) -> Option<f64> {
    record.get(field).and_then(Value::as_f64)
}

pub fn flag(record: &Record, field: &str) -> Option<bool> {
    record.get(field).and_then(Value::as_bool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn many2one_handles_pairs_and_false() {
        let r = record(json!({ "id": 3, "property_id": [42, "REF-42"], "location_id": false }));
        assert_eq!(id(&r), Some(3));
        assert_eq!(many2one_id(&r, "property_id"), Some(42));
        assert_eq!(many2one_name(&r, "property_id").as_deref(), Some("REF-42"));
        assert_eq!(many2one_id(&r, "location_id"), None);
        assert_eq!(many2one_name(&r, "location_id"), None);
        assert_eq!(many2one_id(&r, "missing"), None);
    }

    #[test]
    fn text_treats_false_and_blank_as_missing() {
        let r = record(json!({ "a": "Mozilla/5.0", "b": false, "c": "  " }));
        assert_eq!(text(&r, "a").as_deref(), Some("Mozilla/5.0"));
        assert_eq!(text(&r, "b"), None);
        assert_eq!(text(&r, "c"), None);
    }

    #[test]
    fn numbers_and_flags() {
        let r = record(json!({ "price": 120000, "ratio": 0.5, "active": false, "none": false }));
        assert_eq!(float(&r, "price"), Some(120000.0));
        assert_eq!(float(&r, "ratio"), Some(0.5));
        assert_eq!(float(&r, "none"), None);
        assert_eq!(flag(&r, "active"), Some(false));
        assert_eq!(flag(&r, "missing"), None);
    }
}
