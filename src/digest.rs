// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Content digests and object-id sanitization.
//!
//! The canonical form of a value is compact JSON with object keys sorted at
//! every level, so equal content always hashes to the same digest regardless
//! of insertion order.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::WeaveError;

/// Maximum length of a sanitized object id.
pub const MAX_OBJECT_NAME_LENGTH: usize = 128;

static DISALLOWED_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w._-]+").unwrap());
static REPEATED_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[._-]{2,}").unwrap());
static EDGE_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[._-]+|[._-]+$").unwrap());

/// Render a value as canonical JSON (sorted keys, compact separators).
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Serializing a string cannot fail.
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Digest of a string: URL-safe base64 of its SHA-256, with `-`/`_` mapped to `X`/`Y`.
pub fn str_digest(content: &str) -> String {
    bytes_digest(content.as_bytes())
}

/// Digest of raw bytes, same encoding as [`str_digest`].
pub fn bytes_digest(content: &[u8]) -> String {
    let hash = Sha256::digest(content);
    URL_SAFE_NO_PAD
        .encode(hash)
        .replace('-', "X")
        .replace('_', "Y")
}

/// Digest of a JSON value's canonical form.
pub fn compute_digest(value: &Value) -> String {
    str_digest(&canonical_json(value))
}

/// Turn a user-supplied name into a valid object id.
///
/// Runs of disallowed characters become `-`, runs of separators collapse to a
/// single `-`, leading/trailing separators are trimmed, and the result is
/// truncated to [`MAX_OBJECT_NAME_LENGTH`] characters.
pub fn sanitize_object_name(name: &str) -> Result<String, WeaveError> {
    let replaced = DISALLOWED_CHARS.replace_all(name, "-");
    let collapsed = REPEATED_SEPARATORS.replace_all(&replaced, "-");
    let trimmed = EDGE_SEPARATORS.replace_all(&collapsed, "");
    let truncated: String = trimmed.chars().take(MAX_OBJECT_NAME_LENGTH).collect();

    if truncated.is_empty() {
        return Err(WeaveError::InvalidObjectName(format!(
            "'{}' is empty after sanitization",
            name
        )));
    }
    Ok(truncated)
}
