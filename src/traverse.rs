//! Deep traversal for `deep` watchers.

use crate::hash::FastHashBuilder;
use crate::value::Value;
use std::collections::HashSet;

/// Read every nested property of `value` so the active watcher subscribes to
/// all of them.
///
/// Containers are visited once each, keyed by identity, so shared and
/// cyclic graphs terminate.
pub fn traverse(value: &Value) {
    let mut seen = HashSet::with_hasher(FastHashBuilder);
    visit(value, &mut seen);
}

fn visit(value: &Value, seen: &mut HashSet<usize, FastHashBuilder>) {
    let Some(id) = value.container_id() else {
        return;
    };
    if !seen.insert(id) {
        return;
    }
    match value {
        Value::Object(object) => {
            for key in object.keys() {
                visit(&object.get(&key), seen);
            }
        }
        Value::Array(array) => {
            for item in array.to_vec() {
                visit(&item, seen);
            }
        }
        _ => {}
    }
}
