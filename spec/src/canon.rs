//! Canonical JSON serialization and sha256 artifact hashing.
//!
//! Mirrors the domain-separated "canonical bytes in, fixed hash out" shape
//! of `ledger_spec::hash_body`/`envelope_hash`, but operating over untyped
//! `serde_json::Value` documents (RFC-8259, keys sorted ascending by
//! code-point, no insignificant whitespace) rather than a fixed `Envelope`
//! struct, and using sha256 rather than blake3 per spec.md §4.1.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors raised while canonicalizing or hashing a document.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CanonError {
    /// A number was NaN or Infinity; canonical JSON has no representation for these.
    #[error("INVALID_CANONICAL_NUMBER")]
    InvalidCanonicalNumber,
    /// An enum-typed field held a value outside its recognized set.
    #[error("invalid value for {field}: {value}")]
    InvalidEnum {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: String,
    },
}

/// Recursively sort object keys by code point and re-emit as a `Value`.
///
/// Arrays preserve order. Numbers are passed through unchanged (serde_json
/// already rejects NaN/Infinity at construction time for the `Number` type,
/// so by the time a `Value::Number` reaches here it is already finite).
pub fn canonicalize_value(value: &Value) -> Result<Value, CanonError> {
    match value {
        Value::Object(map) => {
            let mut sorted = Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                let canon_child = canonicalize_value(&map[key])?;
                sorted.insert(key.clone(), canon_child);
            }
            Ok(Value::Object(sorted))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(canonicalize_value(item)?);
            }
            Ok(Value::Array(out))
        }
        Value::Number(n) => {
            if n.as_f64().map(|f| f.is_finite()).unwrap_or(true) {
                Ok(value.clone())
            } else {
                Err(CanonError::InvalidCanonicalNumber)
            }
        }
        other => Ok(other.clone()),
    }
}

/// Serialize a value to canonical JSON bytes: sorted keys, no insignificant
/// whitespace, stable array order.
pub fn canonical_json(value: &Value) -> Result<Vec<u8>, CanonError> {
    let canon = canonicalize_value(value)?;
    // serde_json's default Value::Object is a BTreeMap when the
    // `preserve_order` feature is off, but the workspace enables
    // `preserve_order` (needed elsewhere for deterministic ZIP indexes), so
    // we sort explicitly above rather than relying on map iteration order.
    serde_json::to_vec(&canon).map_err(|_| CanonError::InvalidCanonicalNumber)
}

/// Lowercase hex sha256 digest of arbitrary bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Compute the sha256 hex digest of a value's canonical form with
/// `artifactHash` absent, per spec.md §4.1.
pub fn artifact_hash(value: &Value) -> Result<String, CanonError> {
    let mut stripped = value.clone();
    if let Value::Object(map) = &mut stripped {
        map.remove("artifactHash");
    }
    let bytes = canonical_json(&stripped)?;
    Ok(sha256_hex(&bytes))
}

/// Compute the artifact hash over `value` (with `artifactHash` absent) and
/// return a copy of `value` with `artifactHash` set to that digest.
///
/// `value` must be a JSON object; any other shape is an error.
pub fn stamp_artifact_hash(value: &Value) -> Result<Value, CanonError> {
    let hash = artifact_hash(value)?;
    let mut out = value.clone();
    match &mut out {
        Value::Object(map) => {
            map.insert("artifactHash".to_string(), Value::String(hash));
        }
        _ => return Err(CanonError::InvalidEnum { field: "<root>", value: "not-an-object".into() }),
    }
    Ok(out)
}

/// Base64url (no padding) encode.
pub fn base64url_encode(bytes: &[u8]) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Base64url (no padding) decode.
pub fn base64url_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    URL_SAFE_NO_PAD.decode(s)
}

/// Encode a JSON value as base64url of its canonical bytes.
pub fn base64url_json(value: &Value) -> Result<String, CanonError> {
    Ok(base64url_encode(&canonical_json(value)?))
}

/// Decode a base64url JSON envelope back into a `Value`.
pub fn decode_base64url_json(s: &str) -> Result<Value, CanonError> {
    let bytes = base64url_decode(s).map_err(|_| CanonError::InvalidEnum {
        field: "base64url",
        value: s.to_string(),
    })?;
    serde_json::from_slice(&bytes).map_err(|_| CanonError::InvalidEnum {
        field: "json",
        value: s.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_keys_recursively() {
        let v = json!({"b": 1, "a": {"z": 1, "y": 2}});
        let bytes = canonical_json(&v).unwrap();
        let s = String::from_utf8(bytes).unwrap();
        assert_eq!(s, r#"{"a":{"y":2,"z":1},"b":1}"#);
    }

    #[test]
    fn artifact_hash_excludes_its_own_field() {
        let v = json!({"a": 1, "artifactHash": "stale"});
        let h1 = artifact_hash(&v).unwrap();
        let v2 = json!({"a": 1, "artifactHash": "different-stale"});
        let h2 = artifact_hash(&v2).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn stamp_is_idempotent_on_hash_value() {
        let v = json!({"a": 1});
        let stamped = stamp_artifact_hash(&v).unwrap();
        let restamped = stamp_artifact_hash(&stamped).unwrap();
        assert_eq!(stamped["artifactHash"], restamped["artifactHash"]);
    }

    #[test]
    fn base64url_json_roundtrips() {
        let v = json!({"hello": "world", "n": 7});
        let encoded = base64url_json(&v).unwrap();
        let decoded = decode_base64url_json(&encoded).unwrap();
        assert_eq!(canonicalize_value(&v).unwrap(), decoded);
    }

    #[test]
    fn base64url_has_no_padding_characters() {
        let v = json!({"x": "y"});
        let encoded = base64url_json(&v).unwrap();
        assert!(!encoded.contains('='));
    }
}
