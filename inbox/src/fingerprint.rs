use serde_json::Value;
use sha2::{Digest, Sha256};

/// Content hash identifying the logical identity of an event.
///
/// The `(event_type, payload)` pair is serialized with recursively sorted
/// object keys, so two structurally equal payloads hash identically no
/// matter the key insertion order. Value types are preserved: `1` and `"1"`
/// produce different fingerprints.
pub fn fingerprint(event_type: &str, payload: &Value) -> String {
    let mut canonical = String::new();
    canonical.push_str("{\"event_type\":");
    write_canonical(&Value::String(event_type.to_owned()), &mut canonical);
    canonical.push_str(",\"payload\":");
    write_canonical(payload, &mut canonical);
    canonical.push('}');

    hex::encode(Sha256::digest(canonical.as_bytes()))
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
                out.push_str(&Value::String((*key).clone()).to_string());
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

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::fingerprint;

    #[test]
    fn is_deterministic() {
        let payload = json!({"user_id": "123", "email": "user@example.com"});

        assert_eq!(
            fingerprint("user.signup", &payload),
            fingerprint("user.signup", &payload)
        );
    }

    #[test]
    fn ignores_key_order() {
        let first: serde_json::Value =
            serde_json::from_str(r#"{"a": 1, "b": {"x": true, "y": null}}"#).unwrap();
        let second: serde_json::Value =
            serde_json::from_str(r#"{"b": {"y": null, "x": true}, "a": 1}"#).unwrap();

        assert_eq!(
            fingerprint("order.created", &first),
            fingerprint("order.created", &second)
        );
    }

    #[test]
    fn distinguishes_value_types() {
        assert_ne!(
            fingerprint("order.created", &json!({"id": 1})),
            fingerprint("order.created", &json!({"id": "1"}))
        );
    }

    #[test]
    fn distinguishes_event_types() {
        let payload = json!({"id": 1});

        assert_ne!(
            fingerprint("order.created", &payload),
            fingerprint("order.updated", &payload)
        );
    }

    #[test]
    fn distinguishes_array_order() {
        assert_ne!(
            fingerprint("batch", &json!({"ids": [1, 2]})),
            fingerprint("batch", &json!({"ids": [2, 1]}))
        );
    }

    #[test]
    fn is_fixed_length_hex() {
        let digest = fingerprint("user.signup", &json!({}));

        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
