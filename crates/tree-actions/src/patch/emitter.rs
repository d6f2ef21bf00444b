//! Turns mutation events into forward/inverse patch pairs and publishes them
//! to per-node listeners.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use indexmap::IndexMap;
use tree_path::{parent, starts_with, Path};

use super::types::{Patch, PatchBatch};
use crate::context::ActionContext;
use crate::tree::{MutationEvent, MutationKind};

/// Forward patch and inverse patch for one primitive mutation.
pub fn patch_pair(event: &MutationEvent) -> (Patch, Patch) {
    let path = event.path.clone();
    match &event.kind {
        MutationKind::Set { old: Some(old), new } => (
            Patch::Replace { path: path.clone(), value: new.clone() },
            Patch::Replace { path, value: old.clone() },
        ),
        MutationKind::Set { old: None, new } => (
            Patch::Add { path: path.clone(), value: new.clone() },
            Patch::Remove { path },
        ),
        MutationKind::Delete { old } => (
            Patch::Remove { path: path.clone() },
            Patch::Add { path, value: old.clone() },
        ),
    }
}

/// Forward and inverse sequences for an ordered batch of mutations.
///
/// The inverse sequence lists the elementwise inverses newest first: replaying
/// it left-to-right after the forward sequence restores the pre-batch state
/// even when several mutations touch the same index (as a splice does).
pub fn batch_patches(events: &[MutationEvent]) -> (Vec<Patch>, Vec<Patch>) {
    let (forward, mut inverse): (Vec<_>, Vec<_>) = events.iter().map(patch_pair).unzip();
    inverse.reverse();
    (forward, inverse)
}

type Callback = Box<dyn Fn(&PatchBatch)>;

struct Listener {
    path: Path,
    callback: Callback,
}

/// Per-tree listener registry.
#[derive(Default)]
pub(crate) struct PatchEmitter {
    listeners: RefCell<IndexMap<u64, Rc<Listener>>>,
    next_id: Cell<u64>,
}

impl PatchEmitter {
    pub(crate) fn subscribe(&self, path: Path, callback: Callback) -> u64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        self.listeners
            .borrow_mut()
            .insert(id, Rc::new(Listener { path, callback }));
        id
    }

    pub(crate) fn unsubscribe(&self, id: u64) {
        self.listeners.borrow_mut().shift_remove(&id);
    }

    /// Publish one mutation batch.
    ///
    /// Every listener whose node contains the mutated container is notified
    /// once, with paths relative to its own node. Listeners added or removed
    /// by a callback take effect from the next batch.
    pub(crate) fn emit(&self, events: &[MutationEvent], context: Option<Rc<ActionContext>>) {
        let Some(first) = events.first() else { return };
        let container = parent(&first.path).unwrap_or_default();
        let (patches, inverse_patches) = batch_patches(events);

        let targets: Vec<Rc<Listener>> = self
            .listeners
            .borrow()
            .values()
            .filter(|l| starts_with(&container, &l.path))
            .cloned()
            .collect();
        tracing::trace!(
            patches = patches.len(),
            listeners = targets.len(),
            action = context.as_deref().map(|c| c.name()),
            "emitting patch batch"
        );

        for listener in targets {
            let rebase = |list: &[Patch]| list.iter().map(|p| p.rebased(&listener.path)).collect::<Option<Vec<_>>>();
            let (Some(forward), Some(inverse)) = (rebase(&patches[..]), rebase(&inverse_patches[..])) else {
                continue;
            };
            let batch = PatchBatch { patches: forward, inverse_patches: inverse, context: context.clone() };
            (listener.callback)(&batch);
        }
    }
}
