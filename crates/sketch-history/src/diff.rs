#![forbid(unsafe_code)]

//! Structural deltas between JSON state trees.
//!
//! [`StructuralDiff`] is the capability the tracker uses to turn two
//! snapshots into a [`Delta`] and to move a tree forward (`patch`) or
//! backward (`unpatch`) along it. [`JsonDiff`] is the built-in
//! implementation.
//!
//! # Delta Encoding
//!
//! Deltas are plain JSON so they can be persisted verbatim:
//!
//! ```text
//! null                      no change
//! [new]                     value added
//! [old, new]                value replaced
//! [old, 0, 0]               value deleted
//! {"key": delta, ...}       object members changed
//! {"_t": "a", ...}          array changed:
//!     "<i>":  delta         element i changed in place (same index on both sides)
//!     "_<i>": [old, 0, 0]   element i of the old array deleted
//!     "<j>":  [new]         element j of the new array inserted
//! ```
//!
//! Array deltas trim the common prefix and suffix first. Positions that
//! exist on both sides of the remaining window are diffed in place, the
//! surplus on the old side is deleted and the surplus on the new side is
//! inserted. Applying an array delta runs in-place changes, then deletions
//! by descending index, then insertions by ascending index.
//!
//! # Invariants
//!
//! 1. `patch(a, diff(a, b)) == b`
//! 2. `unpatch(b, diff(a, b)) == a`
//! 3. `unpatch(b, d) == patch(b, d.reverse())`
//! 4. `diff(a, a)` is the empty delta, which both directions treat as identity.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{HistoryError, Result};
use crate::store::StateTree;

/// Marker key identifying an array delta.
const ARRAY_MARKER: &str = "_t";
/// Marker value identifying an array delta.
const ARRAY_MARKER_VALUE: &str = "a";

/// An invertible change between two state trees.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Delta(Value);

impl Delta {
    /// The delta that changes nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self(Value::Null)
    }

    /// Wrap an encoded delta, e.g. one read back from persisted history.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    /// Whether this delta changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_null()
    }

    /// Borrow the encoded form.
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Take the encoded form.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Whether the delta changes the top-level member `key` of an object tree.
    #[must_use]
    pub fn references_key(&self, key: &str) -> bool {
        match &self.0 {
            Value::Object(map) if !is_array_delta(map) => map.contains_key(key),
            _ => false,
        }
    }

    /// The delta that undoes this one.
    #[must_use]
    pub fn reverse(&self) -> Delta {
        Delta(reverse_value(&self.0))
    }
}

/// Computes and applies structural deltas between state trees.
pub trait StructuralDiff {
    /// Compute the delta that turns `from` into `to`.
    fn diff(&self, from: &StateTree, to: &StateTree) -> Delta;

    /// Apply `delta` forward to `from`.
    fn patch(&self, from: &StateTree, delta: &Delta) -> Result<StateTree>;

    /// Apply `delta` backward to `to`.
    fn unpatch(&self, to: &StateTree, delta: &Delta) -> Result<StateTree>;
}

/// Built-in [`StructuralDiff`] over `serde_json` trees.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDiff;

impl StructuralDiff for JsonDiff {
    fn diff(&self, from: &StateTree, to: &StateTree) -> Delta {
        Delta(diff_value(from, to).unwrap_or(Value::Null))
    }

    fn patch(&self, from: &StateTree, delta: &Delta) -> Result<StateTree> {
        let mut tree = from.clone();
        apply(&mut tree, &delta.0, "")?;
        Ok(tree)
    }

    fn unpatch(&self, to: &StateTree, delta: &Delta) -> Result<StateTree> {
        self.patch(to, &delta.reverse())
    }
}

// ============================================================================
// Diff
// ============================================================================

fn diff_value(a: &Value, b: &Value) -> Option<Value> {
    if a == b {
        return None;
    }
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => Some(Value::Object(diff_object(a, b))),
        (Value::Array(a), Value::Array(b)) => Some(Value::Object(diff_array(a, b))),
        _ => Some(replaced(a.clone(), b.clone())),
    }
}

fn diff_object(a: &Map<String, Value>, b: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, old) in a {
        match b.get(key) {
            Some(new) => {
                if let Some(d) = diff_value(old, new) {
                    out.insert(key.clone(), d);
                }
            }
            None => {
                out.insert(key.clone(), deleted(old.clone()));
            }
        }
    }
    for (key, new) in b {
        if !a.contains_key(key) {
            out.insert(key.clone(), added(new.clone()));
        }
    }
    out
}

fn diff_array(a: &[Value], b: &[Value]) -> Map<String, Value> {
    let prefix = a.iter().zip(b).take_while(|(x, y)| x == y).count();
    let max_suffix = a.len().min(b.len()) - prefix;
    let suffix = a
        .iter()
        .rev()
        .zip(b.iter().rev())
        .take(max_suffix)
        .take_while(|(x, y)| x == y)
        .count();

    let old_end = a.len() - suffix;
    let new_end = b.len() - suffix;
    let shared_end = prefix + (old_end - prefix).min(new_end - prefix);

    let mut out = Map::new();
    out.insert(
        ARRAY_MARKER.to_string(),
        Value::String(ARRAY_MARKER_VALUE.to_string()),
    );
    for (i, (old, new)) in a.iter().zip(b).enumerate().take(shared_end).skip(prefix) {
        if let Some(d) = diff_value(old, new) {
            out.insert(i.to_string(), d);
        }
    }
    for (i, old) in a.iter().enumerate().take(old_end).skip(shared_end) {
        out.insert(format!("_{i}"), deleted(old.clone()));
    }
    for (j, new) in b.iter().enumerate().take(new_end).skip(shared_end) {
        out.insert(j.to_string(), added(new.clone()));
    }
    out
}

fn added(new: Value) -> Value {
    Value::Array(vec![new])
}

fn replaced(old: Value, new: Value) -> Value {
    Value::Array(vec![old, new])
}

fn deleted(old: Value) -> Value {
    Value::Array(vec![old, Value::from(0), Value::from(0)])
}

// ============================================================================
// Reverse
// ============================================================================

fn reverse_value(delta: &Value) -> Value {
    match delta {
        Value::Array(items) => match items.as_slice() {
            [new] => deleted(new.clone()),
            [old, new] => replaced(new.clone(), old.clone()),
            [old, _, _] if is_deletion(items) => added(old.clone()),
            _ => delta.clone(),
        },
        Value::Object(map) if is_array_delta(map) => {
            let mut out = Map::new();
            for (key, d) in map {
                if key == ARRAY_MARKER {
                    out.insert(key.clone(), d.clone());
                } else if let Some(index) = key.strip_prefix('_') {
                    // A deleted old element becomes an inserted new one.
                    out.insert(index.to_string(), reverse_value(d));
                } else if is_insertion(d) {
                    out.insert(format!("_{key}"), reverse_value(d));
                } else {
                    out.insert(key.clone(), reverse_value(d));
                }
            }
            Value::Object(out)
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, d)| (key.clone(), reverse_value(d)))
                .collect(),
        ),
        _ => delta.clone(),
    }
}

fn is_array_delta(map: &Map<String, Value>) -> bool {
    map.get(ARRAY_MARKER).and_then(Value::as_str) == Some(ARRAY_MARKER_VALUE)
}

fn is_insertion(delta: &Value) -> bool {
    matches!(delta, Value::Array(items) if items.len() == 1)
}

fn is_deletion(items: &[Value]) -> bool {
    items.len() == 3 && items[1] == Value::from(0) && items[2] == Value::from(0)
}

// ============================================================================
// Patch
// ============================================================================

fn apply(target: &mut Value, delta: &Value, path: &str) -> Result<()> {
    match delta {
        Value::Null => Ok(()),
        Value::Array(items) => match items.as_slice() {
            [new] | [_, new] => {
                *target = new.clone();
                Ok(())
            }
            _ if is_deletion(items) => Err(HistoryError::patch(
                path,
                "deletion is only valid inside an object or array delta",
            )),
            _ => Err(HistoryError::patch(path, "unrecognized delta shape")),
        },
        Value::Object(map) if is_array_delta(map) => {
            let Value::Array(items) = target else {
                return Err(HistoryError::patch(path, "expected an array"));
            };
            apply_array(items, map, path)
        }
        Value::Object(map) => {
            let Value::Object(members) = target else {
                return Err(HistoryError::patch(path, "expected an object"));
            };
            apply_object(members, map, path)
        }
        _ => Err(HistoryError::patch(path, "unrecognized delta shape")),
    }
}

fn apply_object(
    members: &mut Map<String, Value>,
    delta: &Map<String, Value>,
    path: &str,
) -> Result<()> {
    for (key, d) in delta {
        let child = format!("{path}/{key}");
        match d {
            Value::Array(items) if is_deletion(items) => {
                members.remove(key);
            }
            Value::Array(items) if items.len() == 1 => {
                members.insert(key.clone(), items[0].clone());
            }
            _ => {
                let Some(value) = members.get_mut(key) else {
                    return Err(HistoryError::patch(&child, "member is missing"));
                };
                apply(value, d, &child)?;
            }
        }
    }
    Ok(())
}

fn apply_array(items: &mut Vec<Value>, delta: &Map<String, Value>, path: &str) -> Result<()> {
    let mut removals = Vec::new();
    let mut insertions = Vec::new();
    let mut changes = Vec::new();

    for (key, d) in delta {
        if key == ARRAY_MARKER {
            continue;
        }
        if let Some(raw) = key.strip_prefix('_') {
            let index = parse_index(raw, path)?;
            match d {
                Value::Array(parts) if is_deletion(parts) => removals.push(index),
                _ => {
                    return Err(HistoryError::patch(
                        &format!("{path}/{index}"),
                        "expected a deletion",
                    ));
                }
            }
        } else {
            let index = parse_index(key, path)?;
            match d {
                Value::Array(parts) if parts.len() == 1 => {
                    insertions.push((index, parts[0].clone()));
                }
                _ => changes.push((index, d)),
            }
        }
    }

    for (index, d) in changes {
        let child = format!("{path}/{index}");
        let Some(value) = items.get_mut(index) else {
            return Err(HistoryError::patch(&child, "index out of range"));
        };
        apply(value, d, &child)?;
    }

    removals.sort_unstable_by(|a, b| b.cmp(a));
    for index in removals {
        if index >= items.len() {
            return Err(HistoryError::patch(
                &format!("{path}/{index}"),
                "index out of range",
            ));
        }
        items.remove(index);
    }

    insertions.sort_unstable_by_key(|(index, _)| *index);
    for (index, value) in insertions {
        if index > items.len() {
            return Err(HistoryError::patch(
                &format!("{path}/{index}"),
                "index out of range",
            ));
        }
        items.insert(index, value);
    }
    Ok(())
}

fn parse_index(raw: &str, path: &str) -> Result<usize> {
    raw.parse()
        .map_err(|_| HistoryError::patch(path, format!("invalid array index {raw:?}")))
}

// ============================================================================
// Tests
// ============================================================================
