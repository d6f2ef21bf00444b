//! Applying patches to plain JSON values.
//!
//! The entry-level helpers here are shared with the state tree, which layers
//! protection and change notification on top of them.

use serde_json::Value;
use tree_path::{format_json_pointer, PathSegment};

use super::types::Patch;
use crate::error::{Error, Result};

/// A path segment did not resolve to a writable location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InvalidLocation;

/// How a value is written into its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteMode {
    /// Object keys are inserted or overwritten; array slots are overwritten,
    /// or appended when the index equals the length.
    Assign,
    /// Array elements are inserted, shifting later ones to the right.
    Insert,
    /// The slot must already exist on arrays.
    Replace,
}

/// Immutable navigation to the value at `path`.
pub(crate) fn resolve<'a>(doc: &'a Value, path: &[PathSegment]) -> Option<&'a Value> {
    path.iter().try_fold(doc, |current, segment| lookup(current, segment))
}

/// Mutable navigation to the value at `path`.
pub(crate) fn resolve_mut<'a>(doc: &'a mut Value, path: &[PathSegment]) -> Option<&'a mut Value> {
    let mut current = doc;
    for segment in path {
        current = match current {
            Value::Object(map) => map.get_mut(&segment.as_key())?,
            Value::Array(arr) => arr.get_mut(segment.as_index()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// The entry of `container` addressed by `segment`.
pub(crate) fn lookup<'a>(container: &'a Value, segment: &PathSegment) -> Option<&'a Value> {
    match container {
        Value::Object(map) => map.get(&segment.as_key()),
        Value::Array(arr) => arr.get(segment.as_index()?),
        _ => None,
    }
}

pub(crate) fn is_container(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

/// Write `value` into `container`, returning the value previously stored in
/// that slot (`None` when the slot was created).
pub(crate) fn write_entry(
    container: &mut Value,
    segment: &PathSegment,
    value: Value,
    mode: WriteMode,
) -> std::result::Result<Option<Value>, InvalidLocation> {
    match container {
        Value::Object(map) => Ok(map.insert(segment.as_key(), value)),
        Value::Array(arr) => {
            let idx = segment.as_index().ok_or(InvalidLocation)?;
            match mode {
                WriteMode::Insert if idx <= arr.len() => {
                    arr.insert(idx, value);
                    Ok(None)
                }
                WriteMode::Assign if idx == arr.len() => {
                    arr.push(value);
                    Ok(None)
                }
                WriteMode::Assign | WriteMode::Replace if idx < arr.len() => {
                    Ok(Some(std::mem::replace(&mut arr[idx], value)))
                }
                _ => Err(InvalidLocation),
            }
        }
        _ => Err(InvalidLocation),
    }
}

/// Delete the entry of `container` addressed by `segment`.
///
/// Missing object keys yield `Ok(None)`; out-of-range array indices are
/// invalid locations.
pub(crate) fn delete_entry(
    container: &mut Value,
    segment: &PathSegment,
) -> std::result::Result<Option<Value>, InvalidLocation> {
    match container {
        Value::Object(map) => Ok(map.remove(&segment.as_key())),
        Value::Array(arr) => {
            let idx = segment.as_index().ok_or(InvalidLocation)?;
            if idx >= arr.len() {
                return Err(InvalidLocation);
            }
            Ok(Some(arr.remove(idx)))
        }
        _ => Err(InvalidLocation),
    }
}

/// Apply a single patch to `doc`.
///
/// The path must be structurally valid up to its last segment; intermediate
/// containers are never created.
pub fn apply_patch(doc: &mut Value, patch: &Patch) -> Result<()> {
    let invalid = || Error::InvalidPatchPath { path: patch.pointer() };
    let (last, parent) = patch.path().split_last().ok_or_else(invalid)?;
    let container = resolve_mut(doc, parent)
        .filter(|v| is_container(v))
        .ok_or_else(invalid)?;
    let outcome = match patch {
        Patch::Add { value, .. } => write_entry(container, last, value.clone(), WriteMode::Insert).map(drop),
        Patch::Replace { value, .. } => write_entry(container, last, value.clone(), WriteMode::Replace).map(drop),
        Patch::Remove { .. } => match delete_entry(container, last) {
            Ok(Some(_)) => Ok(()),
            _ => Err(InvalidLocation),
        },
    };
    outcome.map_err(|_| invalid())
}

/// Apply patches to `doc` in array order, stopping at the first failure.
pub fn apply_patches(doc: &mut Value, patches: &[Patch]) -> Result<()> {
    for patch in patches {
        apply_patch(doc, patch).map_err(|err| {
            tracing::debug!(path = %format_json_pointer(patch.path()), op = patch.op_name(), "patch rejected");
            err
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tree_path::parse_json_pointer;

    fn path(s: &str) -> Vec<PathSegment> {
        parse_json_pointer(s)
    }

    #[test]
    fn add_to_object() {
        let mut doc = json!({"a": 1});
        apply_patch(&mut doc, &Patch::Add { path: path("/b"), value: json!(2) }).unwrap();
        assert_eq!(doc, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn add_to_array_shifts() {
        let mut doc = json!({"list": [1, 2, 3]});
        apply_patch(&mut doc, &Patch::Add { path: path("/list/1"), value: json!(99) }).unwrap();
        assert_eq!(doc, json!({"list": [1, 99, 2, 3]}));
        apply_patch(&mut doc, &Patch::Add { path: path("/list/4"), value: json!(4) }).unwrap();
        assert_eq!(doc["list"], json!([1, 99, 2, 3, 4]));
    }

    #[test]
    fn replace_and_remove() {
        let mut doc = json!({"a": 1, "list": [1, 2]});
        apply_patch(&mut doc, &Patch::Replace { path: path("/a"), value: json!(5) }).unwrap();
        apply_patch(&mut doc, &Patch::Remove { path: path("/list/0") }).unwrap();
        assert_eq!(doc, json!({"a": 5, "list": [2]}));
    }

    #[test]
    fn replace_past_array_end_is_invalid() {
        let mut doc = json!({"list": [1]});
        let err = apply_patch(&mut doc, &Patch::Replace { path: path("/list/1"), value: json!(2) }).unwrap_err();
        assert_eq!(err, Error::InvalidPatchPath { path: "/list/1".into() });
    }

    #[test]
    fn intermediate_scalar_is_invalid() {
        let mut doc = json!({"a": 1});
        let err = apply_patch(&mut doc, &Patch::Add { path: path("/a/b"), value: json!(2) }).unwrap_err();
        assert_eq!(err, Error::InvalidPatchPath { path: "/a/b".into() });
        let err = apply_patch(&mut doc, &Patch::Add { path: path("/x/y/z"), value: json!(2) }).unwrap_err();
        assert!(matches!(err, Error::InvalidPatchPath { .. }));
    }

    #[test]
    fn removing_missing_key_is_invalid() {
        let mut doc = json!({"a": 1});
        assert!(apply_patch(&mut doc, &Patch::Remove { path: path("/b") }).is_err());
    }

    #[test]
    fn root_path_is_invalid() {
        let mut doc = json!({});
        assert!(apply_patch(&mut doc, &Patch::Replace { path: vec![], value: json!(1) }).is_err());
    }

    #[test]
    fn sequence_applies_in_order() {
        let mut doc = json!({"a": 1});
        apply_patches(
            &mut doc,
            &[
                Patch::Add { path: path("/b"), value: json!([]) },
                Patch::Add { path: path("/b/0"), value: json!("x") },
                Patch::Replace { path: path("/a"), value: json!(10) },
            ],
        )
        .unwrap();
        assert_eq!(doc, json!({"a": 10, "b": ["x"]}));
    }
}
