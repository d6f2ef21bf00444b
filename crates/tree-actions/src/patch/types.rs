//! Patch values exchanged between the emitter, listeners and services.

use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tree_path::{format_json_pointer, relative_to, Path, PathSegment};

use crate::context::ActionContext;

/// One structural change at a path.
///
/// Serializes as `{"op": "replace", "path": ["count"], "value": 15}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Patch {
    Add { path: Path, value: Value },
    Remove { path: Path },
    Replace { path: Path, value: Value },
}

impl Patch {
    /// Returns the operation name (`add`, `remove` or `replace`).
    pub fn op_name(&self) -> &'static str {
        match self {
            Patch::Add { .. } => "add",
            Patch::Remove { .. } => "remove",
            Patch::Replace { .. } => "replace",
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Patch::Add { path, .. } | Patch::Remove { path } | Patch::Replace { path, .. } => path,
        }
    }

    /// The value carried by the patch; `None` for removals.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Patch::Add { value, .. } | Patch::Replace { value, .. } => Some(value),
            Patch::Remove { .. } => None,
        }
    }

    /// The path as a JSON Pointer string.
    pub fn pointer(&self) -> String {
        format_json_pointer(self.path())
    }

    /// Re-base the patch onto `base`. `None` unless `base` is an
    /// ancestor-or-self of the patched location.
    pub(crate) fn rebased(&self, base: &[PathSegment]) -> Option<Patch> {
        relative_to(base, self.path()).ok().map(|path| self.with_path(path))
    }

    fn with_path(&self, path: Path) -> Patch {
        match self {
            Patch::Add { value, .. } => Patch::Add { path, value: value.clone() },
            Patch::Remove { .. } => Patch::Remove { path },
            Patch::Replace { value, .. } => Patch::Replace { path, value: value.clone() },
        }
    }
}

/// Forward and inverse patches produced by one mutation batch, as delivered
/// to a listener.
///
/// `inverse_patches` is ordered so that applying it left-to-right right after
/// `patches` restores the state from before the batch.
#[derive(Debug, Clone)]
pub struct PatchBatch {
    pub patches: Vec<Patch>,
    pub inverse_patches: Vec<Patch>,
    /// The action step that was running when the batch was produced.
    pub context: Option<Rc<ActionContext>>,
}

impl PatchBatch {
    /// Returns true if the batch was produced while the action with the
    /// given id (or one of its steps or nested calls) was running.
    pub fn produced_by(&self, action_id: u64) -> bool {
        self.context
            .as_deref()
            .is_some_and(|ctx| ctx.belongs_to(action_id))
    }
}

/// Flatten a sequence of batches into one forward list and one inverse list.
///
/// The inverse list undoes the batches newest first, so applying it
/// left-to-right after the forward list is a no-op overall.
pub fn merge_batches<'a>(batches: impl DoubleEndedIterator<Item = &'a PatchBatch> + Clone) -> (Vec<Patch>, Vec<Patch>) {
    let patches = batches.clone().flat_map(|b| b.patches.iter().cloned()).collect();
    let inverse = batches
        .rev()
        .flat_map(|b| b.inverse_patches.iter().cloned())
        .collect();
    (patches, inverse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tree_path::PathSegment;

    #[test]
    fn serializes_with_op_tag() {
        let patch = Patch::Replace { path: vec!["count".into()], value: json!(15) };
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            json!({"op": "replace", "path": ["count"], "value": 15})
        );
        let removal: Patch = serde_json::from_value(json!({"op": "remove", "path": ["items", 2]})).unwrap();
        assert_eq!(removal, Patch::Remove { path: vec!["items".into(), PathSegment::Index(2)] });
        assert_eq!(removal.value(), None);
        assert_eq!(removal.pointer(), "/items/2");
    }

    #[test]
    fn rebasing_strips_leading_segments() {
        let patch = Patch::Add { path: vec!["a".into(), "b".into(), "c".into()], value: json!(1) };
        let base = vec![PathSegment::from("a"), PathSegment::from("b")];
        assert_eq!(patch.rebased(&base).map(|p| p.path().clone()), Some(vec![PathSegment::from("c")]));
        assert_eq!(patch.rebased(&[]), Some(patch.clone()));
        assert_eq!(patch.rebased(&[PathSegment::from("z")]), None);
    }

    #[test]
    fn merging_reverses_inverse_batches() {
        let p = |v: i64| Patch::Replace { path: vec!["x".into()], value: json!(v) };
        let first = PatchBatch { patches: vec![p(1)], inverse_patches: vec![p(0)], context: None };
        let second = PatchBatch { patches: vec![p(2)], inverse_patches: vec![p(1)], context: None };
        let batches = [first, second];
        let (forward, inverse) = merge_batches(batches.iter());
        assert_eq!(forward, vec![p(1), p(2)]);
        assert_eq!(inverse, vec![p(1), p(0)]);
    }
}
