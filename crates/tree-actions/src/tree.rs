//! The observable state tree.
//!
//! A [`StateTree`] owns one JSON document together with everything scoped to
//! it: the patch listener registry, the middleware registry, the declared
//! actions and the stack of running action steps. A [`Node`] is a handle on
//! one object or array inside the document, addressed by its path from the
//! root.
//!
//! Every primitive mutation (`set`, `remove`, `insert`, `push`, `splice`) is
//! one mutation batch: the container is edited, the resulting
//! [`MutationEvent`]s are turned into patches and listeners are notified
//! before the call returns. On a protected tree (the default) mutations are
//! only accepted while an action targeting the mutated location or one of
//! its ancestors is running.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tree_path::{format_json_pointer, is_path_equal, join, starts_with, Path, PathSegment};

use crate::context::{begin_action, ActionContext};
use crate::disposer::Disposer;
use crate::error::{ActionResult, Error, Result};
use crate::middleware::{dispatch, MiddlewareRegistry};
use crate::patch::apply::{self, delete_entry, is_container, write_entry, WriteMode};
use crate::patch::emitter::PatchEmitter;
use crate::patch::{Patch, PatchBatch};

/// Name of the built-in action [`Node::apply_patches`] runs as.
pub const APPLY_PATCHES: &str = "@APPLY_PATCHES";

/// Tree-wide options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Reject mutations made outside of a running action.
    pub protected: bool,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self { protected: true }
    }
}

/// A primitive change to one entry of a container.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationEvent {
    /// Location of the entry, from the tree root.
    pub path: Path,
    pub kind: MutationKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationKind {
    /// The entry was written. `old` is `None` when the entry did not exist
    /// (for arrays: when the element was inserted).
    Set { old: Option<Value>, new: Value },
    /// The entry was deleted (for arrays: later elements shifted left).
    Delete { old: Value },
}

/// Body of a declared synchronous action.
pub type ActionBody = Rc<dyn Fn(&ActionContext) -> ActionResult>;

type Change = (PathSegment, MutationKind);

pub(crate) struct TreeInner {
    doc: RefCell<Value>,
    config: TreeConfig,
    pub(crate) emitter: PatchEmitter,
    pub(crate) middleware: MiddlewareRegistry,
    actions: RefCell<HashMap<String, ActionBody>>,
    running: RefCell<Vec<Rc<ActionContext>>>,
}

/// Handle on a state tree. Clones share the same tree.
#[derive(Clone)]
pub struct StateTree {
    inner: Rc<TreeInner>,
}

impl StateTree {
    /// Create a protected tree. The root must be an object or an array.
    pub fn new(initial: Value) -> Result<Self> {
        Self::with_config(initial, TreeConfig::default())
    }

    pub fn with_config(initial: Value, config: TreeConfig) -> Result<Self> {
        if !is_container(&initial) {
            return Err(Error::NotATreeNode { path: String::new() });
        }
        Ok(Self {
            inner: Rc::new(TreeInner {
                doc: RefCell::new(initial),
                config,
                emitter: PatchEmitter::default(),
                middleware: MiddlewareRegistry::default(),
                actions: RefCell::new(HashMap::new()),
                running: RefCell::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> TreeConfig {
        self.inner.config
    }

    pub fn root(&self) -> Node {
        Node { tree: self.clone(), path: Vec::new() }
    }

    /// The node at `path`, which must resolve to an object or array.
    pub fn node(&self, path: &[PathSegment]) -> Result<Node> {
        let node = Node { tree: self.clone(), path: path.to_vec() };
        node.ensure_node()?;
        Ok(node)
    }

    /// A copy of the whole document.
    pub fn snapshot(&self) -> Value {
        self.inner.doc.borrow().clone()
    }

    /// Register a named synchronous action, callable on any node with
    /// [`Node::call`]. A later declaration under the same name replaces the
    /// earlier one.
    pub fn declare_action<F>(&self, name: &str, body: F)
    where
        F: Fn(&ActionContext) -> ActionResult + 'static,
    {
        self.inner
            .actions
            .borrow_mut()
            .insert(name.to_string(), Rc::new(body));
    }

    /// The innermost action step currently running, if any.
    pub fn current_context(&self) -> Option<Rc<ActionContext>> {
        self.inner.running.borrow().last().cloned()
    }

    pub fn is_running_action(&self) -> bool {
        !self.inner.running.borrow().is_empty()
    }

    /// Returns true if both handles refer to the same tree.
    pub fn ptr_eq(&self, other: &StateTree) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn inner(&self) -> &TreeInner {
        &self.inner
    }

    pub(crate) fn downgrade(&self) -> Weak<TreeInner> {
        Rc::downgrade(&self.inner)
    }

    /// Mark `ctx` as running until the guard is dropped.
    pub(crate) fn enter(&self, ctx: Rc<ActionContext>) -> RunningGuard<'_> {
        self.inner.running.borrow_mut().push(ctx);
        RunningGuard { running: &self.inner.running }
    }

    fn assert_writable(&self, path: &[PathSegment]) -> Result<()> {
        if !self.inner.config.protected {
            return Ok(());
        }
        let allowed = self
            .inner
            .running
            .borrow()
            .iter()
            .any(|ctx| starts_with(path, ctx.target().path()));
        if allowed {
            return Ok(());
        }
        let path = format_json_pointer(path);
        tracing::warn!(%path, "mutation outside of an action rejected");
        Err(Error::ProtectedTree { path })
    }
}

impl fmt::Debug for StateTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateTree")
            .field("config", &self.inner.config)
            .field("running", &self.inner.running.borrow().len())
            .finish()
    }
}

pub(crate) struct RunningGuard<'a> {
    running: &'a RefCell<Vec<Rc<ActionContext>>>,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running.borrow_mut().pop();
    }
}

/// Handle on an object or array inside a [`StateTree`].
///
/// Nodes are addressed by path, so a handle follows whatever currently
/// lives at that location.
#[derive(Clone)]
pub struct Node {
    tree: StateTree,
    path: Path,
}

impl Node {
    pub fn tree(&self) -> &StateTree {
        &self.tree
    }

    /// Path from the tree root to this node.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pointer(&self) -> String {
        format_json_pointer(&self.path)
    }

    pub fn root(&self) -> Node {
        self.tree.root()
    }

    pub fn parent(&self) -> Option<Node> {
        let (_, parent) = self.path.split_last()?;
        Some(Node { tree: self.tree.clone(), path: parent.to_vec() })
    }

    /// Handle on the entry `key` without checking what lives there.
    pub fn at(&self, key: impl Into<PathSegment>) -> Node {
        Node { tree: self.tree.clone(), path: join(&self.path, &[key.into()]) }
    }

    /// The child node `key`, which must be an object or array.
    pub fn child(&self, key: impl Into<PathSegment>) -> Result<Node> {
        let node = self.at(key);
        node.ensure_node()?;
        Ok(node)
    }

    /// Returns true if this node is `ancestor` or lies below it.
    pub fn is_within(&self, ancestor: &Node) -> bool {
        self.tree.ptr_eq(&ancestor.tree) && starts_with(&self.path, &ancestor.path)
    }

    /// Returns true if the path currently resolves to an object or array.
    pub fn is_alive(&self) -> bool {
        apply::resolve(&self.tree.inner.doc.borrow(), &self.path).is_some_and(is_container)
    }

    pub(crate) fn ensure_node(&self) -> Result<()> {
        match self.is_alive() {
            true => Ok(()),
            false => Err(Error::NotATreeNode { path: self.pointer() }),
        }
    }

    /// A copy of the node's current value (`null` once it is gone).
    pub fn snapshot(&self) -> Value {
        apply::resolve(&self.tree.inner.doc.borrow(), &self.path)
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// A copy of the entry `key`.
    pub fn get(&self, key: impl Into<PathSegment>) -> Option<Value> {
        let doc = self.tree.inner.doc.borrow();
        let container = apply::resolve(&doc, &self.path)?;
        apply::lookup(container, &key.into()).cloned()
    }

    /// A copy of the value at `path`, relative to this node.
    pub fn get_at(&self, path: &[PathSegment]) -> Option<Value> {
        apply::resolve(&self.tree.inner.doc.borrow(), &join(&self.path, path)).cloned()
    }

    // ── Mutations ─────────────────────────────────────────────────────────

    /// Write `value` under `key`. On arrays an index equal to the length
    /// appends. Writing the value already stored is a no-op.
    pub fn set(&self, key: impl Into<PathSegment>, value: Value) -> Result<()> {
        self.write(key.into(), value, WriteMode::Assign)
    }

    /// Delete the entry `key`, returning its value. Missing object keys are
    /// a no-op.
    pub fn remove(&self, key: impl Into<PathSegment>) -> Result<Option<Value>> {
        let segment = key.into();
        self.mutate(|container, changes| {
            let old = delete_entry(container, &segment).map_err(|_| self.invalid(&segment))?;
            if let Some(old) = &old {
                changes.push((segment.clone(), MutationKind::Delete { old: old.clone() }));
            }
            Ok(old)
        })
    }

    /// Insert `value` at `index` of an array, shifting later elements.
    pub fn insert(&self, index: usize, value: Value) -> Result<()> {
        self.write(PathSegment::Index(index), value, WriteMode::Insert)
    }

    /// Append `value` to an array.
    pub fn push(&self, value: Value) -> Result<()> {
        let segment = PathSegment::Index(0);
        self.mutate(|container, changes| {
            let arr = container.as_array_mut().ok_or_else(|| self.invalid(&segment))?;
            arr.push(value.clone());
            changes.push((PathSegment::Index(arr.len() - 1), MutationKind::Set { old: None, new: value }));
            Ok(())
        })
    }

    /// Remove `delete_count` elements of an array starting at `start` and
    /// insert `items` in their place, as one mutation batch. Returns the
    /// removed elements.
    pub fn splice(&self, start: usize, delete_count: usize, items: Vec<Value>) -> Result<Vec<Value>> {
        let segment = PathSegment::Index(start);
        self.mutate(|container, changes| {
            let arr = match container.as_array_mut() {
                Some(arr) if start <= arr.len() => arr,
                _ => return Err(self.invalid(&segment)),
            };
            let end = start + delete_count.min(arr.len() - start);
            let removed: Vec<Value> = arr.splice(start..end, items.iter().cloned()).collect();
            for old in &removed {
                changes.push((PathSegment::Index(start), MutationKind::Delete { old: old.clone() }));
            }
            for (offset, item) in items.into_iter().enumerate() {
                changes.push((PathSegment::Index(start + offset), MutationKind::Set { old: None, new: item }));
            }
            Ok(removed)
        })
    }

    fn write(&self, segment: PathSegment, value: Value, mode: WriteMode) -> Result<()> {
        self.mutate(|container, changes| {
            if mode == WriteMode::Insert && !container.is_array() {
                return Err(self.invalid(&segment));
            }
            if mode != WriteMode::Insert && apply::lookup(container, &segment) == Some(&value) {
                return Ok(());
            }
            let old = write_entry(container, &segment, value.clone(), mode).map_err(|_| self.invalid(&segment))?;
            changes.push((segment.clone(), MutationKind::Set { old, new: value }));
            Ok(())
        })
    }

    /// Run `edit` against this node's container, then publish the changes it
    /// reported as one batch. The document is not borrowed while listeners
    /// run.
    fn mutate<R>(&self, edit: impl FnOnce(&mut Value, &mut Vec<Change>) -> Result<R>) -> Result<R> {
        self.tree.assert_writable(&self.path)?;
        let mut changes = Vec::new();
        let out = {
            let mut doc = self.tree.inner.doc.borrow_mut();
            let container = apply::resolve_mut(&mut doc, &self.path)
                .filter(|v| is_container(v))
                .ok_or_else(|| Error::NotATreeNode { path: self.pointer() })?;
            edit(container, &mut changes)?
        };
        if !changes.is_empty() {
            let events: Vec<MutationEvent> = changes
                .into_iter()
                .map(|(segment, kind)| MutationEvent { path: join(&self.path, &[segment]), kind })
                .collect();
            self.tree.inner.emitter.emit(&events, self.tree.current_context());
        }
        Ok(out)
    }

    fn invalid(&self, segment: &PathSegment) -> Error {
        Error::InvalidPatchPath { path: format_json_pointer(&join(&self.path, &[segment.clone()])) }
    }

    // ── Patches ───────────────────────────────────────────────────────────

    /// Subscribe to every patch batch produced inside this node's subtree.
    /// Paths are relative to this node.
    pub fn on_patches<F>(&self, listener: F) -> Disposer
    where
        F: Fn(&PatchBatch) + 'static,
    {
        let id = self.tree.inner.emitter.subscribe(self.path.clone(), Box::new(listener));
        let tree = self.tree.downgrade();
        Disposer::new(move || {
            if let Some(inner) = tree.upgrade() {
                inner.emitter.unsubscribe(id);
            }
        })
    }

    /// Replay `patches` against this node, in order, as the built-in
    /// `@APPLY_PATCHES` action. Interceptors see it like any other action.
    ///
    /// Fails with [`Error::ActionSkipped`] when an interceptor answers in
    /// place of the body, since nothing was applied.
    pub fn apply_patches(&self, patches: &[Patch]) -> Result<()> {
        let args = vec![serde_json::to_value(patches).unwrap_or_default()];
        let applied = Cell::new(false);
        self.run(APPLY_PATCHES, args, |cx| {
            applied.set(true);
            for patch in patches {
                cx.target().replay_patch(patch)?;
            }
            Ok(Value::Null)
        })?;
        match applied.get() {
            true => Ok(()),
            false => Err(Error::ActionSkipped { name: APPLY_PATCHES.to_string() }),
        }
    }

    /// Apply one patch through the regular mutation path, without
    /// dispatching an action. The caller must already be inside one.
    pub(crate) fn replay_patch(&self, patch: &Patch) -> Result<()> {
        let invalid = || Error::InvalidPatchPath { path: format_json_pointer(&join(&self.path, patch.path())) };
        let (last, parent) = patch.path().split_last().ok_or_else(invalid)?;
        let container = Node { tree: self.tree.clone(), path: join(&self.path, parent) };
        let outcome = match patch {
            Patch::Add { value, .. } => {
                let mode = match container.snapshot().is_array() {
                    true => WriteMode::Insert,
                    false => WriteMode::Assign,
                };
                container.write(last.clone(), value.clone(), mode)
            }
            Patch::Replace { value, .. } => container.write(last.clone(), value.clone(), WriteMode::Replace),
            Patch::Remove { .. } => match container.remove(last.clone()) {
                Ok(Some(_)) => Ok(()),
                Ok(None) => Err(invalid()),
                Err(err) => Err(err),
            },
        };
        outcome.map_err(|err| match err {
            Error::NotATreeNode { .. } | Error::InvalidPatchPath { .. } => invalid(),
            other => other,
        })
    }

    // ── Actions ───────────────────────────────────────────────────────────

    /// Invoke the declared action `name` on this node.
    pub fn call(&self, name: &str, args: Vec<Value>) -> ActionResult {
        let body = self
            .tree
            .inner
            .actions
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownAction { name: name.to_string() })?;
        self.run(name, args, move |cx| body(cx))
    }

    /// Invoke `body` as an action named `name` on this node.
    ///
    /// When another action is running, it becomes the parent of this one.
    pub fn run<F>(&self, name: &str, args: Vec<Value>, body: F) -> ActionResult
    where
        F: FnOnce(&ActionContext) -> ActionResult,
    {
        let ctx = begin_action(self, name, args, self.tree.current_context())?;
        dispatch(&ctx, body)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.tree.ptr_eq(&other.tree) && is_path_equal(&self.path, &other.path)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Node").field(&self.pointer()).finish()
    }
}
