//! JSON merge patch (RFC 7386) creation.
//!
//! The caller keeps an untouched baseline of the fetched object, mutates a working copy and
//! submits only the difference. Fields equal on both sides are left out, so anything the
//! working copy did not touch (status, resourceVersion, ...) is never sent back.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::Error;

/// Merge patch turning `original` into `modified`.
pub fn create<T: Serialize>(original: &T, modified: &T) -> Result<Value, Error> {
    let original = serde_json::to_value(original)?;
    let modified = serde_json::to_value(modified)?;
    Ok(diff(&original, &modified))
}

pub fn diff(original: &Value, modified: &Value) -> Value {
    match (original, modified) {
        (Value::Object(original), Value::Object(modified)) => {
            let mut patch = Map::new();
            for (key, value) in modified {
                match original.get(key) {
                    Some(previous) if previous == value => {}
                    Some(previous) => {
                        patch.insert(key.clone(), diff(previous, value));
                    }
                    None => {
                        patch.insert(key.clone(), value.clone());
                    }
                }
            }
            for key in original.keys().filter(|key| !modified.contains_key(*key)) {
                patch.insert(key.clone(), Value::Null);
            }
            Value::Object(patch)
        }
        _ => modified.clone(),
    }
}
