// canonical.rs - Deterministic JSON canonicalization.
//
// Signatures and content hashes are computed over bytes, so every record must
// have exactly one byte representation. The canonical form is compact JSON
// with object keys sorted lexicographically at every nesting level. Arrays
// keep their order.
//
// We sort explicitly instead of relying on serde_json's map ordering, which
// changes if any crate in the build enables the `preserve_order` feature.

use serde::Serialize;
use serde_json::Value;

use crate::error::CryptoError;

/// Render a JSON value in canonical form.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

/// Serialize any record and render it in canonical form.
pub fn to_canonical_string<T: Serialize + ?Sized>(record: &T) -> Result<String, CryptoError> {
    let value = serde_json::to_value(record)?;
    Ok(canonical_json(&value))
}

/// Serialize a record, drop the named top-level fields, and canonicalize.
///
/// Used to compute hashes and signatures "over every other field", e.g. a
/// token without its `signature` or a receipt without its chain fields.
pub fn canonical_without<T: Serialize + ?Sized>(
    record: &T,
    excluded: &[&str],
) -> Result<String, CryptoError> {
    let mut value = serde_json::to_value(record)?;
    if let Value::Object(map) = &mut value {
        for key in excluded {
            map.remove(*key);
        }
    }
    Ok(canonical_json(&value))
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::from(key.as_str()).to_string());
                out.push(':');
                write_value(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        // Scalars: serde_json's Display is already compact and escaped.
        scalar => out.push_str(&scalar.to_string()),
    }
}
