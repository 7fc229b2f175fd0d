//! Array-length shadow fields.
//!
//! Vector stores cannot filter on array length, so every array-valued field is mirrored
//! at ingest time into a sibling `<field>__len` holding its length. `$size` on the vector
//! backend matches against that sibling. Both sides derive the name from [`length_field`].

use serde_json::{Map, Value as JsonValue};

pub const LENGTH_SUFFIX: &str = "__len";

/// Name of the shadow field holding the length of the array at `path`.
pub fn length_field(path: &str) -> String {
    format!("{}{}", path, LENGTH_SUFFIX)
}

/// Adds a `<key>__len` sibling for every array in `object`, at every depth, including
/// objects nested inside arrays. Existing shadow fields are recomputed, so calling this
/// twice is harmless.
pub fn mirror_array_lengths(object: &mut Map<String, JsonValue>) {
    let mut lengths = Vec::new();
    for (key, value) in object.iter_mut() {
        if key.ends_with(LENGTH_SUFFIX) {
            continue;
        }
        mirror_value(value);
        if let JsonValue::Array(items) = value {
            lengths.push((length_field(key), items.len()));
        }
    }
    for (key, len) in lengths {
        object.insert(key, JsonValue::from(len));
    }
}

fn mirror_value(value: &mut JsonValue) {
    match value {
        JsonValue::Object(map) => mirror_array_lengths(map),
        JsonValue::Array(items) => items.iter_mut().for_each(mirror_value),
        _ => {}
    }
}
