//! Dotted-path lookups over raw device metadata documents.
//!
//! The appliance returns arbitrarily nested JSON whose shape varies by
//! recording category; every field probe in the resolver goes through
//! [`lookup`]/[`resolve`] so that absent or malformed paths uniformly fall
//! back to a caller-supplied default instead of erroring. `serde_json::Value`
//! is the tagged-variant model (null / bool / number / string / array /
//! object) consumed here — no reflection on runtime types.

use std::collections::BTreeMap;

use serde_json::Value;

/// Descend `doc` one object key per `.`-separated segment of `path`.
///
/// Returns `None` when any traversed step is not an object, the key is
/// absent, or the final value is JSON null. Never errors.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = doc;
    for key in path.split('.') {
        match cur {
            Value::Object(map) => cur = map.get(key)?,
            _ => return None,
        }
    }
    if cur.is_null() {
        None
    } else {
        Some(cur)
    }
}

/// [`lookup`] with a default: absence is always signaled by returning
/// `default`, never by an error. This is the uniform contract every
/// higher-level field probe depends on.
pub fn resolve<'a>(doc: &'a Value, path: &str, default: &'a Value) -> &'a Value {
    lookup(doc, path).unwrap_or(default)
}

/// Render a scalar value as text. Arrays resolve to their first element
/// (the device hands back single-element lists for fields like genres).
/// Objects and empty arrays yield `None`.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => items.first().and_then(scalar_text),
        _ => None,
    }
}

/// Resolve a path to text, reducing lists to their first element.
pub fn resolve_text(doc: &Value, path: &str, default: &str) -> String {
    lookup(doc, path)
        .and_then(scalar_text)
        .unwrap_or_else(|| default.to_string())
}

/// Resolve a path to an integer; numeric strings are accepted.
pub fn resolve_i64(doc: &Value, path: &str, default: i64) -> i64 {
    match lookup(doc, path) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

/// Flatten a document into dotted-path → scalar-text pairs.
///
/// Array elements use their index as a path segment. Used to expose every
/// raw metadata field to custom naming templates.
pub fn flatten(doc: &Value) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    walk(doc, String::new(), &mut out);
    out
}

fn walk(value: &Value, prefix: String, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                walk(child, join(&prefix, key), out);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                walk(child, join(&prefix, &i.to_string()), out);
            }
        }
        Value::Null => {}
        scalar => {
            if let Some(text) = scalar_text(scalar) {
                out.insert(prefix, text);
            }
        }
    }
}

fn join(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", prefix, segment)
    }
}
