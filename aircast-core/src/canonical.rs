use serde_json::Value;

/// Serializes a JSON value with object keys sorted lexicographically at
/// every nesting level.
///
/// Webhook signatures are computed over this form, and consumers recompute
/// them by the same rule, so the ordering is contractual.
pub fn to_canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push('{');
            for (index, key) in keys.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }

                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_value(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }

                write_value(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sorts_keys_at_every_level() {
        let value = json!({
            "zulu": 1,
            "alpha": { "delta": true, "bravo": [{ "yankee": 0, "echo": 1 }] },
        });

        assert_eq!(
            to_canonical_json(&value),
            r#"{"alpha":{"bravo":[{"echo":1,"yankee":0}],"delta":true},"zulu":1}"#,
            "keys should be sorted recursively, including inside arrays"
        );
    }

    #[test]
    fn test_scalars_and_escapes_are_plain_json() {
        let value = json!({ "b": "line\nbreak", "a": null });

        assert_eq!(
            to_canonical_json(&value),
            "{\"a\":null,\"b\":\"line\\nbreak\"}"
        );
    }

    #[test]
    fn test_canonical_form_is_stable() {
        let first = json!({ "one": 1, "two": 2 });
        let second = json!({ "two": 2, "one": 1 });

        assert_eq!(
            to_canonical_json(&first),
            to_canonical_json(&second),
            "insertion order should not affect the canonical form"
        );
    }
}
