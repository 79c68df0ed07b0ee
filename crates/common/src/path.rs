//! Dotted-path access into JSON trees.
//!
//! Paths such as `"aggregate.id"` address nested object members. The empty
//! path addresses the value itself.

use serde_json::{Map, Value};

/// Returns the value at `path`, if every segment exists.
pub fn get<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.')
        .try_fold(value, |current, segment| current.as_object()?.get(segment))
}

/// Returns the value at `path` unless it is missing or `null`.
pub fn get_present<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    get(value, path).filter(|v| !v.is_null())
}

/// Writes `new_value` at `path`, creating intermediate objects.
///
/// Non-object values found along the way are replaced by objects.
pub fn set(value: &mut Value, path: &str, new_value: Value) {
    if path.is_empty() {
        *value = new_value;
        return;
    }

    let mut current = value;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Some(map) = current.as_object_mut() else {
            return;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), new_value);
            return;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}
