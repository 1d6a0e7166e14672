//! Deterministic JSON serialization used for struct-token estimation,
//! `tool_schema_key` hashing, and the `CONTEXT_SUMMARY_JSON:` /
//! `TURN_RESULT_CARD_JSON:` summary payloads — object keys are sorted so the
//! same logical value always serializes to the same bytes.

use serde_json::Value;
use std::collections::BTreeMap;

fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map.iter().map(|(k, v)| (k.clone(), normalize(v))).collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        other => other.clone(),
    }
}

/// Serialize `value` with object keys sorted, for stable hashing/estimation.
pub fn to_stable_json(value: &Value) -> String {
    serde_json::to_string(&normalize(value)).unwrap_or_default()
}

/// sha256 of `to_stable_json(value)`, hex-encoded — used as a cache key for
/// tool/response schemas so unchanged schemas don't re-trigger estimation.
pub fn stable_hash(value: &Value) -> String {
    use sha2::{Digest, Sha256};
    let json = to_stable_json(value);
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    hex::encode(hasher.finalize())
}
