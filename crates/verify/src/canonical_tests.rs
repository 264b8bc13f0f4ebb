// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tests for canonical JSON serialization.

use super::*;
use serde_json::json;
use yare::parameterized;

#[test]
fn object_keys_are_sorted() {
    let value = json!({"zebra": 1, "apple": 2, "mango": 3});
    assert_eq!(canonical_json(&value), r#"{"apple":2,"mango":3,"zebra":1}"#);
}

#[test]
fn nested_objects_are_sorted_recursively() {
    let value = json!({"b": {"y": 1, "x": 2}, "a": [{"q": 1, "p": 2}]});
    assert_eq!(canonical_json(&value), r#"{"a":[{"p":2,"q":1}],"b":{"x":2,"y":1}}"#);
}

#[test]
fn no_insignificant_whitespace() {
    let value: serde_json::Value =
        serde_json::from_str("{ \"a\" : [ 1 , 2 ] , \"b\" : \"c d\" }").unwrap();
    assert_eq!(canonical_json(&value), r#"{"a":[1,2],"b":"c d"}"#);
}

#[test]
fn strings_escape_controls_minimally() {
    let value = json!({"k": "line1\nline2\ttab \"quoted\" back\\slash \u{01}"});
    assert_eq!(canonical_json(&value), "{\"k\":\"line1\\nline2\\ttab \\\"quoted\\\" back\\\\slash \\u0001\"}");
}

#[test]
fn integral_doubles_render_as_integers() {
    let value: serde_json::Value = serde_json::from_str(r#"{"n": 1.0}"#).unwrap();
    assert_eq!(canonical_json(&value), r#"{"n":1}"#);
}

#[test]
fn canonical_form_round_trips() {
    let value = json!({"plugins": [{"docker#v5": {"image": "alpine", "args": ["a", "b"]}}]});
    let first = canonical_json(&value);
    let reparsed: serde_json::Value = serde_json::from_str(&first).unwrap();
    assert_eq!(canonical_json(&reparsed), first);
}

#[parameterized(
    absent = { None },
    empty_string = { Some("") },
    null_token = { Some("null") },
    empty_array = { Some("[]") },
    padded = { Some("  ") },
)]
fn empty_plugins_env_tokens_normalize(raw: Option<&str>) {
    assert_eq!(canonical_plugins_from_env(raw).unwrap(), EMPTY_PLUGINS);
}

#[test]
fn plugins_value_none_and_null_normalize() {
    assert_eq!(canonical_plugins(None), EMPTY_PLUGINS);
    assert_eq!(canonical_plugins(Some(&serde_json::Value::Null)), EMPTY_PLUGINS);
    assert_eq!(canonical_plugins(Some(&json!([]))), EMPTY_PLUGINS);
}

#[test]
fn plugins_env_and_step_forms_agree() {
    let step_plugins = json!([{"docker#v5": {"image": "alpine"}}]);
    let env_raw = r#"[ { "docker#v5" : { "image" : "alpine" } } ]"#;
    assert_eq!(
        canonical_plugins(Some(&step_plugins)),
        canonical_plugins_from_env(Some(env_raw)).unwrap()
    );
}

#[test]
fn malformed_plugins_env_is_an_error() {
    assert!(canonical_plugins_from_env(Some("{not json")).is_err());
}
