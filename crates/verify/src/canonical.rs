// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Canonical JSON serialization (RFC 8785 subset).
//!
//! Signed-field values are compared and MAC'd as canonical JSON, so two
//! representations of the same document must serialize to identical
//! bytes: object members sorted by UTF-16 code units, no insignificant
//! whitespace, minimal string escapes, integer-preferring numbers.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CanonicalError {
    #[error("plugins value is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Serialize `value` to its canonical form.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// The canonical empty-plugins document. Empty sequences, `null`, and
/// absent plugin declarations all collapse to this form.
pub const EMPTY_PLUGINS: &str = "[]";

/// Canonicalise a step's plugin declaration.
pub fn canonical_plugins(plugins: Option<&Value>) -> String {
    match plugins {
        None | Some(Value::Null) => EMPTY_PLUGINS.to_string(),
        Some(Value::Array(items)) if items.is_empty() => EMPTY_PLUGINS.to_string(),
        Some(Value::String(s)) if is_empty_plugins_token(s) => EMPTY_PLUGINS.to_string(),
        Some(other) => canonical_json(other),
    }
}

/// Canonicalise the plugin declaration as it appears in the job
/// environment, where it is carried as a string.
pub fn canonical_plugins_from_env(raw: Option<&str>) -> Result<String, CanonicalError> {
    match raw {
        None => Ok(EMPTY_PLUGINS.to_string()),
        Some(s) if is_empty_plugins_token(s) => Ok(EMPTY_PLUGINS.to_string()),
        Some(s) => {
            let value: Value = serde_json::from_str(s)?;
            Ok(canonical_plugins(Some(&value)))
        }
    }
}

fn is_empty_plugins_token(s: &str) -> bool {
    matches!(s.trim(), "" | "null" | "[]")
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => write_number(out, n),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                if let Some(v) = map.get(*key) {
                    write_value(out, v);
                }
            }
            out.push('}');
        }
    }
}

fn write_number(out: &mut String, n: &serde_json::Number) {
    if let Some(i) = n.as_i64() {
        out.push_str(&i.to_string());
    } else if let Some(u) = n.as_u64() {
        out.push_str(&u.to_string());
    } else if let Some(f) = n.as_f64() {
        // Integral doubles render without a fractional part, matching
        // the ECMAScript number-to-string rules for the values that
        // occur in pipeline documents.
        if f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15 {
            out.push_str(&format!("{}", f as i64));
        } else {
            out.push_str(&f.to_string());
        }
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
#[path = "canonical_tests.rs"]
mod tests;
