//! Key-order-independent JSON encoding.
//!
//! Objects are written with keys in byte order at every depth and without
//! whitespace, so two values that are equal as JSON always encode to the
//! same bytes, whatever order their maps were built in.

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// Canonical bytes of any serializable value.
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    let mut out = Vec::new();
    write_value(&value, &mut out)?;
    Ok(out)
}

fn write_value(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push(b'{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_value(item, out)?;
            }
            out.push(b'}');
        }
        scalar => serde_json::to_writer(&mut *out, scalar)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_keys_are_sorted() {
        let bytes = canonical_bytes(&json!({"b": {"z": 1, "a": [true, null]}, "a": "x"})).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":"x","b":{"a":[true,null],"z":1}}"#
        );
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        let mut first = serde_json::Map::new();
        first.insert("mood".into(), json!("calm"));
        first.insert("energy".into(), json!(7));
        let mut second = serde_json::Map::new();
        second.insert("energy".into(), json!(7));
        second.insert("mood".into(), json!("calm"));
        assert_eq!(
            canonical_bytes(&Value::Object(first)).unwrap(),
            canonical_bytes(&Value::Object(second)).unwrap()
        );
    }

    #[test]
    fn test_array_order_is_significant() {
        assert_ne!(
            canonical_bytes(&json!([1, 2])).unwrap(),
            canonical_bytes(&json!([2, 1])).unwrap()
        );
    }
}
