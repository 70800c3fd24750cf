// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cache key derivation.

use std::fmt::Write;

use serde_json::Value;

/// Separates a function name from the derived key in storage keys.
pub(crate) const SEPARATOR: char = '~';

/// Turns a serialized argument value into a cache key.
///
/// Strings are used verbatim; every other value is stringified with object keys sorted at
/// every depth, so logically equal values yield the same key.
pub(crate) fn derive(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => stable_stringify(other),
    }
}

pub(crate) fn storage_key(name: &str, key: &str) -> String {
    format!("{name}{SEPARATOR}{key}")
}

pub(crate) fn storage_prefix(name: &str) -> String {
    format!("{name}{SEPARATOR}")
}

fn stable_stringify(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<_> = map.iter().collect();
            fields.sort_unstable_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (name, field)) in fields.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Value's Display escapes the string the same way the serializer does.
                let _ = write!(out, "{}", Value::String(name.clone()));
                out.push(':');
                write_value(out, field);
            }
            out.push('}');
        }
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
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn strings_are_used_verbatim() {
        assert_eq!(derive(&json!("user-42")), "user-42");
        assert_eq!(derive(&json!("")), "");
    }

    #[test]
    fn scalars_are_stringified() {
        assert_eq!(derive(&json!(5)), "5");
        assert_eq!(derive(&json!(1.5)), "1.5");
        assert_eq!(derive(&json!(true)), "true");
        assert_eq!(derive(&Value::Null), "null");
    }

    #[test]
    fn object_keys_are_sorted_at_every_depth() {
        let a = json!({ "b": 1, "a": { "y": [1, 2], "x": null } });
        let b = json!({ "a": { "x": null, "y": [1, 2] }, "b": 1 });

        assert_eq!(derive(&a), r#"{"a":{"x":null,"y":[1,2]},"b":1}"#);
        assert_eq!(derive(&a), derive(&b));
    }

    #[test]
    fn array_order_is_significant() {
        assert_ne!(derive(&json!([1, 2])), derive(&json!([2, 1])));
    }

    #[test]
    fn nested_strings_are_escaped() {
        assert_eq!(derive(&json!(["a\"b"])), r#"["a\"b"]"#);
        assert_eq!(derive(&json!({ "k\n": "v" })), r#"{"k\n":"v"}"#);
    }

    #[test]
    fn storage_keys_are_namespaced() {
        assert_eq!(storage_key("fetch", "5"), "fetch~5");
        assert_eq!(storage_prefix("fetch"), "fetch~");
        assert!(storage_key("fetch", "5").starts_with(&storage_prefix("fetch")));
    }
}
