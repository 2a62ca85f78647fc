//! Audit data sanitization
//!
//! Values under sensitive keys are replaced with a fixed mask at any depth.
//! Long strings are truncated. The key itself is always kept.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// Replacement for sensitive values
pub const MASK: &str = "***";

static SENSITIVE_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(password|senha|token|secret|key|authorization|cookie|credential)").unwrap()
});

/// Whether a key names sensitive data
pub fn is_sensitive_key(key: &str) -> bool {
    SENSITIVE_KEY.is_match(key)
}

/// Sanitize a whole data map
pub fn sanitize_map(data: Map<String, Value>, max_chars: usize) -> Map<String, Value> {
    data.into_iter()
        .map(|(key, value)| {
            let value = if is_sensitive_key(&key) {
                Value::String(MASK.to_string())
            } else {
                sanitize_value(value, max_chars)
            };
            (key, value)
        })
        .collect()
}

/// Sanitize a value recursively
pub fn sanitize_value(value: Value, max_chars: usize) -> Value {
    match value {
        Value::Object(map) => Value::Object(sanitize_map(map, max_chars)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| sanitize_value(item, max_chars))
                .collect(),
        ),
        Value::String(s) if s.chars().count() > max_chars => {
            Value::String(crate::truncate_safe(&s, max_chars))
        }
        other => other,
    }
}
