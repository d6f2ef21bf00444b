//! Action contexts: one record per invocation, or per step of a flow.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use crate::data::{ContextData, DataKey};
use crate::error::Result;
use crate::tree::Node;

static NEXT_ACTION_ID: AtomicU64 = AtomicU64::new(1);

/// What kind of step a context describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// A synchronous action.
    Action,
    /// First step of a flow, from its start to the first suspension.
    FlowSpawn,
    /// A flow resumed with a value.
    FlowResume,
    /// A flow resumed with an error.
    FlowResumeError,
    /// The flow finished with a value.
    FlowReturn,
    /// The flow finished with an error.
    FlowThrow,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Action => "action",
            ActionKind::FlowSpawn => "flow_spawn",
            ActionKind::FlowResume => "flow_resume",
            ActionKind::FlowResumeError => "flow_resume_error",
            ActionKind::FlowReturn => "flow_return",
            ActionKind::FlowThrow => "flow_throw",
        }
    }

    /// Returns true for steps that continue a flow spawned earlier.
    pub fn is_async_step(&self) -> bool {
        matches!(
            self,
            ActionKind::FlowResume | ActionKind::FlowResumeError | ActionKind::FlowReturn | ActionKind::FlowThrow
        )
    }

    /// Returns true for the steps that close a flow.
    pub fn is_finish(&self) -> bool {
        matches!(self, ActionKind::FlowReturn | ActionKind::FlowThrow)
    }
}

/// Metadata for one invocation of an action, or one step of a flow.
///
/// Contexts are immutable apart from their [`ContextData`] bag and are shared
/// as `Rc<ActionContext>` between the dispatcher, interceptors and patch
/// listeners.
pub struct ActionContext {
    id: u64,
    name: String,
    kind: ActionKind,
    args: Vec<Value>,
    target: Node,
    parent: Option<Rc<ActionContext>>,
    previous_step: Option<Rc<ActionContext>>,
    spawn: Option<Rc<ActionContext>>,
    data: ContextData,
}

impl ActionContext {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// The node the action was invoked on.
    pub fn target(&self) -> &Node {
        &self.target
    }

    /// The context of the enclosing invocation, if any.
    pub fn parent(&self) -> Option<&ActionContext> {
        self.parent.as_deref()
    }

    /// The top-most ancestor reached by following parent links.
    pub fn root(&self) -> &ActionContext {
        let mut current = self;
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// The step this one resumed from.
    pub fn previous_step(&self) -> Option<&ActionContext> {
        self.previous_step.as_deref()
    }

    /// The first step of the flow this step belongs to.
    pub fn spawn(&self) -> Option<&ActionContext> {
        self.spawn.as_deref()
    }

    /// The logical invocation: the spawn step for flow steps, `self`
    /// otherwise. Step boundaries are invisible through this view.
    pub fn logical(&self) -> &ActionContext {
        self.spawn().unwrap_or(self)
    }

    /// Returns true if the logical invocation has no enclosing action.
    pub fn is_top_level(&self) -> bool {
        self.logical().parent.is_none()
    }

    /// Returns true if this context is the invocation `action_id`, one of its
    /// flow steps, or anything nested inside them.
    pub fn belongs_to(&self, action_id: u64) -> bool {
        let mut current = Some(self);
        while let Some(ctx) = current {
            if ctx.id == action_id || ctx.logical().id == action_id {
                return true;
            }
            current = ctx.parent();
        }
        false
    }

    /// The bag owned by this invocation (shared by all steps of a flow).
    pub fn data(&self) -> &ContextData {
        &self.data
    }

    /// Look `key` up in this context's bag, then in the bags of enclosing
    /// invocations.
    pub fn find_data<T: Clone + 'static>(&self, key: DataKey<T>) -> Option<T> {
        let mut current = Some(self);
        while let Some(ctx) = current {
            if let Some(value) = ctx.data.get(key) {
                return Some(value);
            }
            current = ctx.parent();
        }
        None
    }
}

impl fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionContext")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("args", &self.args)
            .field("target", &self.target)
            .field("parent", &self.parent.as_ref().map(|p| p.id))
            .field("previous_step", &self.previous_step.as_ref().map(|p| p.id))
            .field("spawn", &self.spawn.as_ref().map(|p| p.id))
            .finish()
    }
}

fn next_id() -> u64 {
    NEXT_ACTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Create the context for a synchronous action on `target`.
///
/// Fails with `NotATreeNode` when `target` does not resolve to an object or
/// array of its tree. Without a parent the new context is its own root.
pub fn begin_action(
    target: &Node,
    name: &str,
    args: Vec<Value>,
    parent: Option<Rc<ActionContext>>,
) -> Result<Rc<ActionContext>> {
    begin(target, name, ActionKind::Action, args, parent)
}

/// Create the context for the first step of a flow.
pub fn begin_flow_spawn(
    target: &Node,
    name: &str,
    args: Vec<Value>,
    parent: Option<Rc<ActionContext>>,
) -> Result<Rc<ActionContext>> {
    begin(target, name, ActionKind::FlowSpawn, args, parent)
}

fn begin(
    target: &Node,
    name: &str,
    kind: ActionKind,
    args: Vec<Value>,
    parent: Option<Rc<ActionContext>>,
) -> Result<Rc<ActionContext>> {
    target.ensure_node()?;
    let ctx = Rc::new(ActionContext {
        id: next_id(),
        name: name.to_string(),
        kind,
        args,
        target: target.clone(),
        parent,
        previous_step: None,
        spawn: None,
        data: ContextData::new(),
    });
    tracing::trace!(
        id = ctx.id,
        action = %ctx.name,
        kind = kind.as_str(),
        parent = ctx.parent.as_ref().map(|p| p.id),
        "begin action"
    );
    Ok(ctx)
}

/// Create the next step of the flow `previous` belongs to.
///
/// The step keeps the flow's name, target, logical parent, spawn and data
/// bag, and links back to `previous`.
pub fn begin_flow_step(previous: &Rc<ActionContext>, kind: ActionKind, args: Vec<Value>) -> Rc<ActionContext> {
    let spawn = previous.spawn.clone().unwrap_or_else(|| previous.clone());
    let ctx = Rc::new(ActionContext {
        id: next_id(),
        name: previous.name.clone(),
        kind,
        args,
        target: previous.target.clone(),
        parent: previous.parent.clone(),
        previous_step: Some(previous.clone()),
        spawn: Some(spawn),
        data: previous.data.clone(),
    });
    tracing::trace!(id = ctx.id, action = %ctx.name, kind = kind.as_str(), previous = previous.id, "begin flow step");
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::tree::StateTree;
    use serde_json::json;

    fn tree() -> StateTree {
        StateTree::new(json!({"counter": {"count": 0}, "label": "x"})).unwrap()
    }

    #[test]
    fn contexts_without_parent_are_roots() {
        let tree = tree();
        let ctx = begin_action(&tree.root(), "reset", vec![json!(1)], None).unwrap();
        assert_eq!(ctx.root().id(), ctx.id());
        assert!(ctx.is_top_level());
        assert_eq!(ctx.args(), &[json!(1)]);
        assert_eq!(ctx.kind(), ActionKind::Action);
    }

    #[test]
    fn root_follows_parent_links() {
        let tree = tree();
        let outer = begin_action(&tree.root(), "outer", vec![], None).unwrap();
        let counter = tree.node(&["counter".into()]).unwrap();
        let inner = begin_action(&counter, "inner", vec![], Some(outer.clone())).unwrap();
        let innermost = begin_action(&counter, "innermost", vec![], Some(inner.clone())).unwrap();
        assert_eq!(innermost.root().id(), outer.id());
        assert!(innermost.belongs_to(outer.id()));
        assert!(!outer.belongs_to(inner.id()));
        assert!(!inner.is_top_level());
    }

    #[test]
    fn scalar_targets_are_rejected() {
        let tree = tree();
        let label = tree.root().at("label");
        let err = begin_action(&label, "bad", vec![], None).unwrap_err();
        assert_eq!(err, Error::NotATreeNode { path: "/label".into() });
    }

    #[test]
    fn flow_steps_share_identity_and_data() {
        let tree = tree();
        let key: DataKey<u32> = DataKey::new();
        let spawn = begin_flow_spawn(&tree.root(), "load", vec![json!("id")], None).unwrap();
        spawn.data().insert(key, 7);
        let resumed = begin_flow_step(&spawn, ActionKind::FlowResume, vec![json!("payload")]);
        let finished = begin_flow_step(&resumed, ActionKind::FlowReturn, vec![json!(null)]);

        assert_ne!(resumed.id(), spawn.id());
        assert_eq!(finished.previous_step().map(|c| c.id()), Some(resumed.id()));
        assert_eq!(finished.logical().id(), spawn.id());
        assert_eq!(finished.logical().args(), &[json!("id")]);
        assert_eq!(finished.data().get(key), Some(7));
        assert!(finished.belongs_to(spawn.id()));
        assert!(finished.kind().is_finish());
        assert!(resumed.kind().is_async_step());
    }

    #[test]
    fn find_data_walks_enclosing_invocations() {
        let tree = tree();
        let key: DataKey<&'static str> = DataKey::new();
        let outer = begin_action(&tree.root(), "outer", vec![], None).unwrap();
        outer.data().insert(key, "outer");
        let inner = begin_action(&tree.root(), "inner", vec![], Some(outer.clone())).unwrap();
        assert_eq!(inner.data().get(key), None);
        assert_eq!(inner.find_data(key), Some("outer"));
    }
}
