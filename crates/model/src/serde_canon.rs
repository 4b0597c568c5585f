//! Canonical JSON serialization for deterministic hashing
//!
//! Model descriptions are hashed over a canonical JSON form:
//! - Sorted map keys
//! - No whitespace or pretty-printing
//! - Shortest round-trip float formatting (serde_json)
//! - Blake3 digest, rendered as lowercase hex

use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CanonicalError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Serialize a value to canonical JSON (sorted keys, no whitespace)
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String, CanonicalError> {
    let json = serde_json::to_value(value).map_err(|e| CanonicalError::SerializationError(e.to_string()))?;
    serde_json::to_string(&sort_keys(json)).map_err(|e| CanonicalError::SerializationError(e.to_string()))
}

fn sort_keys(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let sorted: BTreeMap<String, JsonValue> = map.into_iter().map(|(k, v)| (k, sort_keys(v))).collect();
            JsonValue::Object(sorted.into_iter().collect())
        }
        JsonValue::Array(items) => JsonValue::Array(items.into_iter().map(sort_keys).collect()),
        scalar => scalar,
    }
}

/// Blake3 hash of the canonical JSON representation, as hex
pub fn hash_canonical_hex<T: Serialize>(value: &T) -> Result<String, CanonicalError> {
    let json = to_canonical_json(value)?;
    let hash = blake3::hash(json.as_bytes());
    Ok(hex::encode(hash.as_bytes()))
}
