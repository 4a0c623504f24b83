//! Canonical encoding and hashing of workflow specs.
//!
//! Canonical form: JSON with keys sorted recursively, UTF-8, no insignificant
//! whitespace. The session records `spec_hash = sha256(canonical(spec))` at
//! creation; resume compares against the stored snapshot and warns (does not
//! block) on mismatch, so intended spec edits stay possible.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::EngineError;
use crate::spec::WorkflowSpec;

/// Recursively sorts object keys so encoding is order-independent.
fn sort_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(&String, &Value)> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), sort_value(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_value).collect()),
        other => other.clone(),
    }
}

/// The canonical byte encoding of a spec.
pub fn canonical_bytes(spec: &WorkflowSpec) -> Result<Vec<u8>, EngineError> {
    let value = serde_json::to_value(spec)
        .map_err(|e| EngineError::Unexpected(format!("spec to value: {}", e)))?;
    let canonical = sort_value(&value);
    serde_json::to_vec(&canonical)
        .map_err(|e| EngineError::Unexpected(format!("canonical encode: {}", e)))
}

/// Hex sha256 of arbitrary bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Hex sha256 of the canonicalized spec.
pub fn spec_hash(spec: &WorkflowSpec) -> Result<String, EngineError> {
    Ok(sha256_hex(&canonical_bytes(spec)?))
}
