// crates/recall-server/src/util/canonical.rs
// Canonical JSON serialization and content hashing.
//
// The content hash must be a pure function of (type, value): object keys are
// sorted byte-wise at every nesting level, arrays keep their order, and no
// insignificant whitespace is emitted. Scalars are rendered by serde_json so
// strings are escaped correctly and numbers use their shortest round-trip
// form.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Separator between the type tag and the canonical value in the hash input.
const HASH_SEPARATOR: u8 = 0x1F;

/// Serialize a JSON value canonically: sorted object keys, compact output.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Escape the key exactly as serde_json would
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
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
        // Null, booleans, numbers, and strings already have a canonical
        // compact rendering
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Hex SHA-256 over `type || 0x1F || canonical_json(value)`.
pub fn content_hash(memory_type: &str, value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(memory_type.as_bytes());
    hasher.update([HASH_SEPARATOR]);
    hasher.update(canonical_json(value).as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_sorts_keys() {
        let v = json!({"b": 2, "a": 1});
        assert_eq!(canonical_json(&v), r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn test_canonical_sorts_nested_keys() {
        let v = json!({"z": {"y": 2, "x": 1}, "a": [{"c": 3, "b": 2}]});
        assert_eq!(
            canonical_json(&v),
            r#"{"a":[{"b":2,"c":3}],"z":{"x":1,"y":2}}"#
        );
    }

    #[test]
    fn test_canonical_preserves_array_order() {
        let v = json!([3, 1, 2]);
        assert_eq!(canonical_json(&v), "[3,1,2]");
    }

    #[test]
    fn test_canonical_escapes_strings() {
        let v = json!({"msg": "say \"hi\"\n"});
        assert_eq!(canonical_json(&v), r#"{"msg":"say \"hi\"\n"}"#);
    }

    #[test]
    fn test_canonical_scalars() {
        assert_eq!(canonical_json(&json!(null)), "null");
        assert_eq!(canonical_json(&json!(true)), "true");
        assert_eq!(canonical_json(&json!(1.5)), "1.5");
    }

    #[test]
    fn test_hash_is_order_independent() {
        let a = json!({"a": 1, "b": 2});
        let b = json!({"b": 2, "a": 1});
        assert_eq!(content_hash("pref", &a), content_hash("pref", &b));
    }

    #[test]
    fn test_hash_depends_on_type() {
        let v = json!({"a": 1});
        assert_ne!(content_hash("preference", &v), content_hash("pattern", &v));
    }

    #[test]
    fn test_hash_depends_on_value() {
        assert_ne!(
            content_hash("pref", &json!({"a": 1})),
            content_hash("pref", &json!({"a": 2}))
        );
    }

    #[test]
    fn test_hash_is_hex_sha256() {
        let h = content_hash("pref", &json!({"a": 1}));
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
