//! Response field filter.

use serde_json::Value;

/// Field names stripped from every tool response, in normalized form
/// (lower-case, separators removed).
const SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "passwordhash",
    "email",
    "apikey",
    "token",
    "accesstoken",
    "refreshtoken",
    "paymentinfo",
    "cardnumber",
    "ssn",
];

fn normalize(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// True when `key` names a field that must never leave the gateway.
pub fn is_sensitive_field(key: &str) -> bool {
    let normalized = normalize(key);
    SENSITIVE_FIELDS.contains(&normalized.as_str())
}

/// Remove sensitive fields at any depth. Returns how many were removed.
pub fn filter_sensitive_fields(value: &mut Value) -> usize {
    match value {
        Value::Object(map) => {
            let before = map.len();
            map.retain(|key, _| !is_sensitive_field(key));
            let mut removed = before - map.len();
            for child in map.values_mut() {
                removed += filter_sensitive_fields(child);
            }
            removed
        }
        Value::Array(items) => items.iter_mut().map(filter_sensitive_fields).sum(),
        _ => 0,
    }
}
