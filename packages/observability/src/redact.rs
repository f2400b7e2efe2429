//! Secret redaction for structured log fields.

use crate::RedactionMode;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

const REDACTED: &str = "[REDACTED]";

const DENYLIST_KEYS: [&str; 9] = [
    "token",
    "authorization",
    "cookie",
    "password",
    "passwd",
    "secret",
    "credential",
    "samlresponse",
    "private_key",
];

const METADATA_ALLOWED_FIELDS: [&str; 6] = [
    "service",
    "attempt",
    "status",
    "request_id",
    "surface_id",
    "outcome",
];

/// Returns true when a field name should never be written verbatim.
pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    DENYLIST_KEYS.iter().any(|entry| lower.contains(entry))
}

/// Sanitize a full field map according to the redaction mode.
pub fn sanitize_fields(
    fields: BTreeMap<String, Value>,
    mode: RedactionMode,
) -> BTreeMap<String, Value> {
    fields
        .into_iter()
        .filter(|(key, _)| match mode {
            RedactionMode::Standard => true,
            RedactionMode::MetadataOnly => METADATA_ALLOWED_FIELDS.contains(&key.as_str()),
        })
        .map(|(key, value)| {
            let clean = sanitize_value(&key, &value);
            (key, clean)
        })
        .collect()
}

fn sanitize_value(key: &str, value: &Value) -> Value {
    if is_sensitive_key(key) {
        return Value::String(REDACTED.to_string());
    }

    match value {
        Value::String(s) => sanitize_string(s),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), sanitize_value(k, v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| sanitize_value(key, item))
                .collect::<Vec<_>>(),
        ),
        _ => value.clone(),
    }
}

fn sanitize_string(raw: &str) -> Value {
    if looks_like_sensitive_value(raw) {
        return Value::String(REDACTED.to_string());
    }
    if raw.len() > 1024 {
        return Value::String(format!("[TRUNCATED:{}]", sha256_prefixed(raw)));
    }
    Value::String(raw.to_string())
}

fn looks_like_sensitive_value(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    if lower.starts_with("bearer ") {
        return true;
    }
    // JWT shape: three dot-separated base64url segments.
    if raw.matches('.').count() == 2 && raw.len() > 40 && !raw.contains(' ') {
        return true;
    }
    is_long_base64(raw)
}

fn is_long_base64(value: &str) -> bool {
    value.len() > 48
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=' || c == '_' || c == '-')
}

fn sha256_prefixed(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    let hex: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
    format!("sha256:{}", hex)
}
