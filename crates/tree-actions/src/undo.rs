//! Undo/redo history for a subtree.
//!
//! [`UndoManager`] records one [`UndoEvent`] per completed top-level
//! invocation that changed its node: a synchronous action, or a flow from
//! spawn to finish however many steps it took. The invocation may target the
//! node, a descendant or an ancestor. A failed invocation that a transaction
//! rolls back leaves no event behind. Events are replayed through
//! [`Node::apply_patches`], so undoing and redoing are actions too and pass
//! through the registered middleware.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tree_path::Path;

use crate::context::{ActionContext, ActionKind};
use crate::data::DataKey;
use crate::disposer::Disposer;
use crate::error::{ActionResult, Error, Result};
use crate::patch::{merge_batches, Patch, PatchBatch};
use crate::tracking::{track, ActionTracker};
use crate::transaction::rolls_back_on_failure;
use crate::tree::Node;

/// Name recorded for events produced by [`UndoManager::start_group`].
pub const GROUP_ACTION: &str = "@GROUP";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UndoOptions {
    /// Keep at most this many undo events, dropping the oldest.
    pub max_history: Option<usize>,
}

/// One undoable unit of history. Patch paths are relative to the manager's
/// node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndoEvent {
    /// Path of the action target from the tree root.
    pub target_path: Path,
    pub action_name: String,
    pub patches: Vec<Patch>,
    pub inverse_patches: Vec<Patch>,
}

struct Recording {
    target_path: Path,
    action_name: String,
    batches: Vec<PatchBatch>,
}

impl Recording {
    fn into_event(self) -> Option<UndoEvent> {
        if self.batches.is_empty() {
            return None;
        }
        let (patches, inverse_patches) = merge_batches(self.batches.iter());
        Some(UndoEvent {
            target_path: self.target_path,
            action_name: self.action_name,
            patches,
            inverse_patches,
        })
    }
}

struct UndoState {
    node: Node,
    options: UndoOptions,
    undo: RefCell<VecDeque<UndoEvent>>,
    redo: RefCell<Vec<UndoEvent>>,
    /// Present in the bag of a top-level invocation while it is recorded.
    open: DataKey<()>,
    /// Patches of running top-level invocations, by logical id.
    recording: RefCell<IndexMap<u64, Recording>>,
    group: RefCell<Option<Recording>>,
    group_depth: Cell<usize>,
    skipping: Cell<usize>,
    replaying: Cell<bool>,
    subscriptions: RefCell<Vec<Disposer>>,
}

impl UndoState {
    fn on_batch(&self, batch: &PatchBatch) {
        if self.replaying.get() || self.skipping.get() > 0 {
            return;
        }
        let Some(ctx) = batch.context.as_deref() else {
            tracing::trace!("ignoring patches made outside of an action");
            return;
        };
        // The outermost recorded invocation the batch belongs to.
        let mut owner = None;
        let mut current = Some(ctx);
        while let Some(step) = current {
            let call = step.logical();
            if call.data().contains(self.open) {
                owner = Some(call);
            }
            current = step.parent();
        }
        let Some(owner) = owner else {
            tracing::trace!(action = %ctx.name(), "ignoring patches of an unrecorded invocation");
            return;
        };
        self.recording
            .borrow_mut()
            .entry(owner.id())
            .or_insert_with(|| Recording {
                target_path: owner.target().path().clone(),
                action_name: owner.name().to_string(),
                batches: Vec::new(),
            })
            .batches
            .push(batch.clone());
    }

    fn begin(&self, call: &ActionContext) {
        call.data().insert(self.open, ());
    }

    fn end(&self, call: &ActionContext, outcome: &ActionResult) {
        call.data().remove(self.open);
        let Some(recording) = self.recording.borrow_mut().shift_remove(&call.id()) else {
            return;
        };
        if outcome.is_err() && rolls_back_on_failure(call) {
            tracing::debug!(action = %call.name(), "dropping patches of a rolled back action");
            return;
        }
        self.commit(recording);
    }

    fn commit(&self, recording: Recording) {
        if let Some(group) = self.group.borrow_mut().as_mut() {
            group.batches.extend(recording.batches);
            return;
        }
        let Some(event) = recording.into_event() else { return };
        tracing::debug!(action = %event.action_name, patches = event.patches.len(), "recorded undo event");
        self.push_undo(event);
        self.redo.borrow_mut().clear();
    }

    fn push_undo(&self, event: UndoEvent) {
        let mut undo = self.undo.borrow_mut();
        undo.push_back(event);
        if let Some(max) = self.options.max_history {
            while undo.len() > max {
                undo.pop_front();
            }
        }
    }

    fn replay(&self, patches: &[Patch]) -> Result<()> {
        self.replaying.set(true);
        let result = self.node.apply_patches(patches);
        self.replaying.set(false);
        result
    }
}

impl Drop for UndoState {
    fn drop(&mut self) {
        for subscription in self.subscriptions.take() {
            subscription.dispose();
        }
    }
}

struct UndoTracker {
    state: Weak<UndoState>,
}

impl ActionTracker for UndoTracker {
    /// Top-level invocations and nested flows. A nested flow's later steps
    /// may run after the invocation that spawned it has finished.
    fn filter(&self, call: &ActionContext) -> bool {
        (call.is_top_level() || call.kind() == ActionKind::FlowSpawn)
            && self.state.upgrade().is_some_and(|s| !s.replaying.get())
    }

    fn on_start(&self, call: &ActionContext) -> Option<ActionResult> {
        if let Some(state) = self.state.upgrade() {
            state.begin(call);
        }
        None
    }

    fn on_finish(&self, call: &ActionContext, outcome: &ActionResult) {
        if let Some(state) = self.state.upgrade() {
            state.end(call, outcome);
        }
    }
}

/// Undo/redo stacks for the actions performed on one node.
///
/// Dropping the manager unregisters it from the tree.
pub struct UndoManager {
    state: Rc<UndoState>,
}

impl UndoManager {
    pub fn new(node: &Node, options: UndoOptions) -> Self {
        let state = Rc::new(UndoState {
            node: node.clone(),
            options,
            undo: RefCell::default(),
            redo: RefCell::default(),
            open: DataKey::new(),
            recording: RefCell::default(),
            group: RefCell::default(),
            group_depth: Cell::new(0),
            skipping: Cell::new(0),
            replaying: Cell::new(false),
            subscriptions: RefCell::default(),
        });

        let weak = Rc::downgrade(&state);
        let listener = node.on_patches(move |batch| {
            if let Some(state) = weak.upgrade() {
                state.on_batch(batch);
            }
        });
        // Actions on ancestors can write below the node too.
        let tracker = track(&node.tree().root(), UndoTracker { state: Rc::downgrade(&state) });
        state.subscriptions.borrow_mut().extend([listener, tracker]);
        Self { state }
    }

    /// Revert the most recent event and move it to the redo stack.
    pub fn undo(&self) -> Result<()> {
        let event = self.state.undo.borrow_mut().pop_back().ok_or(Error::NothingToUndo)?;
        tracing::debug!(action = %event.action_name, "undo");
        match self.state.replay(&event.inverse_patches) {
            Ok(()) => {
                self.state.redo.borrow_mut().push(event);
                Ok(())
            }
            Err(err) => {
                self.state.undo.borrow_mut().push_back(event);
                Err(err)
            }
        }
    }

    /// Re-apply the most recently undone event.
    pub fn redo(&self) -> Result<()> {
        let event = self.state.redo.borrow_mut().pop().ok_or(Error::NothingToRedo)?;
        tracing::debug!(action = %event.action_name, "redo");
        match self.state.replay(&event.patches) {
            Ok(()) => {
                self.state.push_undo(event);
                Ok(())
            }
            Err(err) => {
                self.state.redo.borrow_mut().push(event);
                Err(err)
            }
        }
    }

    pub fn clear_undo(&self) {
        self.state.undo.borrow_mut().clear();
    }

    pub fn clear_redo(&self) {
        self.state.redo.borrow_mut().clear();
    }

    /// Undo events, oldest first.
    pub fn undo_queue(&self) -> Vec<UndoEvent> {
        self.state.undo.borrow().iter().cloned().collect()
    }

    /// Redo events, oldest first; [`UndoManager::redo`] takes the last one.
    pub fn redo_queue(&self) -> Vec<UndoEvent> {
        self.state.redo.borrow().clone()
    }

    pub fn can_undo(&self) -> bool {
        !self.state.undo.borrow().is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.state.redo.borrow().is_empty()
    }

    /// Run `f` without recording the patches it produces.
    pub fn without_undo<R>(&self, f: impl FnOnce() -> R) -> R {
        let skipping = &self.state.skipping;
        skipping.set(skipping.get() + 1);
        let out = f();
        skipping.set(skipping.get() - 1);
        out
    }

    /// Record every top-level action until the matching
    /// [`UndoManager::stop_group`] as one event. Groups nest.
    pub fn start_group(&self) {
        let depth = self.state.group_depth.get();
        if depth == 0 {
            *self.state.group.borrow_mut() = Some(Recording {
                target_path: self.state.node.path().clone(),
                action_name: GROUP_ACTION.to_string(),
                batches: Vec::new(),
            });
        }
        self.state.group_depth.set(depth + 1);
    }

    pub fn stop_group(&self) {
        match self.state.group_depth.get() {
            0 => {}
            1 => {
                self.state.group_depth.set(0);
                let group = self.state.group.borrow_mut().take();
                if let Some(group) = group {
                    self.state.commit(group);
                }
            }
            depth => self.state.group_depth.set(depth - 1),
        }
    }

    /// Run `f` inside a group.
    pub fn with_group<R>(&self, f: impl FnOnce() -> R) -> R {
        self.start_group();
        let out = f();
        self.stop_group();
        out
    }

    pub fn node(&self) -> &Node {
        &self.state.node
    }
}

impl fmt::Debug for UndoManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UndoManager")
            .field("node", &self.state.node)
            .field("undo", &self.state.undo.borrow().len())
            .field("redo", &self.state.redo.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tree_path::PathSegment;

    fn setup() -> (crate::tree::StateTree, UndoManager) {
        let tree = crate::tree::StateTree::new(json!({"count": 0, "items": []})).unwrap();
        tree.declare_action("inc", |cx| {
            let count = cx.target().get("count").and_then(|v| v.as_i64()).unwrap_or_default();
            cx.target().set("count", json!(count + 1))?;
            Ok(Value::Null)
        });
        let undo = UndoManager::new(&tree.root(), UndoOptions::default());
        (tree, undo)
    }

    #[test]
    fn empty_stacks_report_errors() {
        let (_tree, undo) = setup();
        assert_eq!(undo.undo(), Err(Error::NothingToUndo));
        assert_eq!(undo.redo(), Err(Error::NothingToRedo));
        assert!(!undo.can_undo());
    }

    #[test]
    fn records_one_event_per_top_level_action() {
        let (tree, undo) = setup();
        tree.root()
            .run("twice", vec![], |cx| {
                cx.target().call("inc", vec![])?;
                cx.target().call("inc", vec![])
            })
            .unwrap();
        let queue = undo.undo_queue();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].action_name, "twice");
        assert_eq!(queue[0].patches.len(), 2);
        undo.undo().unwrap();
        assert_eq!(tree.snapshot()["count"], json!(0));
        undo.redo().unwrap();
        assert_eq!(tree.snapshot()["count"], json!(2));
    }

    #[test]
    fn new_actions_clear_redo() {
        let (tree, undo) = setup();
        tree.root().call("inc", vec![]).unwrap();
        undo.undo().unwrap();
        assert!(undo.can_redo());
        tree.root().call("inc", vec![]).unwrap();
        assert!(!undo.can_redo());
        assert_eq!(undo.undo_queue().len(), 1);
    }

    #[test]
    fn history_is_capped() {
        let tree = crate::tree::StateTree::new(json!({"n": 0})).unwrap();
        let undo = UndoManager::new(&tree.root(), UndoOptions { max_history: Some(2) });
        for n in 1..=4 {
            tree.root().run("set", vec![], move |cx| cx.target().set("n", json!(n)).map(|_| Value::Null)).unwrap();
        }
        let queue = undo.undo_queue();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].patches[0].value(), Some(&json!(3)));
    }

    #[test]
    fn without_undo_skips_recording() {
        let (tree, undo) = setup();
        undo.without_undo(|| tree.root().call("inc", vec![])).unwrap();
        assert!(!undo.can_undo());
        assert_eq!(tree.snapshot()["count"], json!(1));
    }

    #[test]
    fn groups_merge_actions() {
        let (tree, undo) = setup();
        undo.with_group(|| {
            tree.root().call("inc", vec![]).unwrap();
            let items = tree.root().child("items").unwrap();
            items.run("add", vec![], |cx| cx.target().push(json!("a")).map(|_| Value::Null)).unwrap();
        });
        let queue = undo.undo_queue();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].action_name, GROUP_ACTION);
        assert_eq!(
            queue[0].patches.last().map(|p| p.path().clone()),
            Some(vec![PathSegment::from("items"), PathSegment::Index(0)])
        );
        undo.undo().unwrap();
        assert_eq!(tree.snapshot(), json!({"count": 0, "items": []}));
    }

    #[test]
    fn events_record_the_target_path() {
        let (tree, undo) = setup();
        let items = tree.root().child("items").unwrap();
        items.run("add", vec![], |cx| cx.target().push(json!(1)).map(|_| Value::Null)).unwrap();
        assert_eq!(undo.undo_queue()[0].target_path, vec![PathSegment::from("items")]);
    }

    #[test]
    fn dropping_the_manager_unregisters_it() {
        let (tree, undo) = setup();
        assert_eq!(tree.middleware_count(), 1);
        drop(undo);
        assert_eq!(tree.middleware_count(), 0);
        tree.root().call("inc", vec![]).unwrap();
    }
}
