//! tree-actions: controlled mutation of an observable JSON state tree.
//!
//! Every change to a [`StateTree`] happens inside an action. Actions are
//! dispatched through a chain of [`Middleware`] registered on the tree, every
//! primitive mutation is published as forward and inverse [`Patch`]es, and
//! services built on those two seams add atomicity ([`transactional`]) and
//! history ([`UndoManager`]).
//!
//! - [`context`]: one [`ActionContext`] per invocation or flow step.
//! - [`middleware`]: registry and dispatcher.
//! - [`flow`]: multi-step actions driven by the host.
//! - [`patch`]: patch model, emitter and application.
//! - [`tracking`], [`transaction`], [`undo`]: services.
//!
//! ```
//! use serde_json::{json, Value};
//! use tree_actions::{StateTree, UndoManager, UndoOptions};
//!
//! let tree = StateTree::new(json!({"count": 10})).unwrap();
//! tree.declare_action("add", |cx| {
//!     let by = cx.args().first().and_then(Value::as_i64).unwrap_or(1);
//!     let count = cx.target().get("count").and_then(|v| v.as_i64()).unwrap_or(0);
//!     cx.target().set("count", json!(count + by))?;
//!     Ok(Value::Null)
//! });
//!
//! let history = UndoManager::new(&tree.root(), UndoOptions::default());
//! tree.root().call("add", vec![json!(5)]).unwrap();
//! assert_eq!(tree.snapshot(), json!({"count": 15}));
//!
//! history.undo().unwrap();
//! assert_eq!(tree.snapshot(), json!({"count": 10}));
//! ```

pub mod context;
pub mod data;
pub mod disposer;
pub mod error;
pub mod flow;
pub mod middleware;
pub mod patch;
pub mod tracking;
pub mod transaction;
pub mod tree;
pub mod undo;

pub use context::{begin_action, begin_flow_spawn, begin_flow_step, ActionContext, ActionKind};
pub use data::{ContextData, DataKey};
pub use disposer::Disposer;
pub use error::{ActionResult, Error, Result};
pub use flow::{flow_fn, Flow, FlowHandle, FlowInput, FlowStatus, FlowYield};
pub use middleware::{dispatch, Middleware, Next};
pub use patch::{apply_patch, apply_patches, Patch, PatchBatch};
pub use tracking::{track, tracking_middleware, ActionTracker};
pub use transaction::{rolls_back_on_failure, transactional};
pub use tree::{MutationEvent, MutationKind, Node, StateTree, TreeConfig, APPLY_PATCHES};
pub use undo::{UndoEvent, UndoManager, UndoOptions};

pub use tree_path::{Path, PathSegment};
