//! Shallow diff of two flat records
//!
//! Values are compared structurally (`serde_json::Value` equality), so key
//! order inside nested objects never produces a false difference.

use serde_json::{Map, Value};

/// Top-level key → replacement value
pub type DiffMap = Map<String, Value>;

/// Keys that identify a document and must never be replayed onto another
const ID_KEYS: [&str; 2] = ["id", "_id"];

/// Keys of `a` whose value differs from the value at the same key in `b`.
///
/// A key missing from `b` counts as different. Identity keys are stripped.
pub fn shallow_diff(a: &DiffMap, b: &DiffMap) -> DiffMap {
    let mut diff: DiffMap = a
        .iter()
        .filter(|(key, value)| b.get(key.as_str()) != Some(value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    strip_ids(&mut diff);
    diff
}

/// Remove identity keys from a body
pub fn strip_ids(body: &mut DiffMap) {
    for key in ID_KEYS {
        body.remove(key);
    }
}

/// Write every key of `diff` onto `target`
pub fn apply_diff(target: &mut DiffMap, diff: &DiffMap) {
    for (key, value) in diff {
        if ID_KEYS.contains(&key.as_str()) {
            continue;
        }
        target.insert(key.clone(), value.clone());
    }
}
