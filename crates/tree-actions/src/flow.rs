//! Multi-step actions.
//!
//! A flow is a state machine the host drives: every call to [`Flow::step`]
//! runs until the flow either awaits something ([`FlowYield::Await`]) or
//! completes. Each step is dispatched as its own action step, so middleware
//! see a `FlowSpawn` step, any number of `FlowResume`/`FlowResumeError` steps
//! and one closing `FlowReturn`/`FlowThrow` step whose result is the outcome
//! of the whole flow.
//!
//! ```
//! use serde_json::json;
//! use tree_actions::{flow_fn, FlowInput, FlowStatus, FlowYield, StateTree};
//!
//! let tree = StateTree::new(json!({"user": null})).unwrap();
//! let handle = tree
//!     .root()
//!     .spawn_flow("load_user", vec![json!(7)], flow_fn(|cx, input| match input {
//!         FlowInput::Start => Ok(FlowYield::Await(json!({"fetch": 7}))),
//!         FlowInput::Resolved(user) => {
//!             cx.target().set("user", user.clone())?;
//!             Ok(FlowYield::Return(user))
//!         }
//!         FlowInput::Rejected(err) => Err(err),
//!     }))
//!     .unwrap();
//!
//! assert_eq!(handle.status(), FlowStatus::Suspended(json!({"fetch": 7})));
//! handle.resume(json!({"name": "ada"})).unwrap();
//! assert_eq!(handle.result(), Some(Ok(json!({"name": "ada"}))));
//! assert_eq!(tree.snapshot(), json!({"user": {"name": "ada"}}));
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::context::{begin_flow_spawn, begin_flow_step, ActionContext, ActionKind};
use crate::error::{ActionResult, Error, Result};
use crate::middleware::dispatch;
use crate::tree::Node;

/// What a flow is resumed with.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowInput {
    /// First step.
    Start,
    /// The awaited operation succeeded.
    Resolved(Value),
    /// The awaited operation failed.
    Rejected(Error),
}

/// How a flow step ended.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowYield {
    /// Suspend until the host resumes the flow. The value describes what is
    /// awaited.
    Await(Value),
    /// Complete the flow with a value.
    Return(Value),
}

/// The body of a multi-step action. Returning `Err` completes the flow with
/// that error.
pub trait Flow {
    fn step(&mut self, cx: &ActionContext, input: FlowInput) -> Result<FlowYield>;
}

impl<F> Flow for F
where
    F: FnMut(&ActionContext, FlowInput) -> Result<FlowYield>,
{
    fn step(&mut self, cx: &ActionContext, input: FlowInput) -> Result<FlowYield> {
        self(cx, input)
    }
}

/// Build a flow from a closure.
pub fn flow_fn<F>(f: F) -> F
where
    F: FnMut(&ActionContext, FlowInput) -> Result<FlowYield>,
{
    f
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowStatus {
    /// A step is being dispatched.
    Running,
    /// Waiting for [`FlowHandle::resume`] or [`FlowHandle::throw`].
    Suspended(Value),
    /// The closing step ran; holds the outcome of the flow.
    Finished(ActionResult),
}

struct FlowState {
    step: Rc<ActionContext>,
    body: Option<Box<dyn Flow>>,
    status: FlowStatus,
}

/// Handle on a spawned flow. Clones drive the same flow.
#[derive(Clone)]
pub struct FlowHandle {
    state: Rc<RefCell<FlowState>>,
}

impl FlowHandle {
    pub fn status(&self) -> FlowStatus {
        self.state.borrow().status.clone()
    }

    /// The outcome of the flow, once finished.
    pub fn result(&self) -> Option<ActionResult> {
        match &self.state.borrow().status {
            FlowStatus::Finished(result) => Some(result.clone()),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state.borrow().status, FlowStatus::Finished(_))
    }

    /// The most recent step context.
    pub fn context(&self) -> Rc<ActionContext> {
        self.state.borrow().step.clone()
    }

    /// Resume a suspended flow with the awaited value.
    pub fn resume(&self, value: Value) -> Result<FlowStatus> {
        let previous = self.suspended_step()?;
        let step = begin_flow_step(&previous, ActionKind::FlowResume, vec![value.clone()]);
        self.advance(step, FlowInput::Resolved(value));
        Ok(self.status())
    }

    /// Resume a suspended flow with an error.
    pub fn throw(&self, err: Error) -> Result<FlowStatus> {
        let previous = self.suspended_step()?;
        let step = begin_flow_step(&previous, ActionKind::FlowResumeError, vec![err.to_value()]);
        self.advance(step, FlowInput::Rejected(err));
        Ok(self.status())
    }

    /// Resume the flow with `resolver` until it finishes, returning its
    /// outcome.
    pub fn drive<R>(&self, mut resolver: R) -> ActionResult
    where
        R: FnMut(&Value) -> Result<Value>,
    {
        loop {
            match self.status() {
                FlowStatus::Suspended(awaited) => match resolver(&awaited) {
                    Ok(value) => self.resume(value)?,
                    Err(err) => self.throw(err)?,
                },
                FlowStatus::Finished(result) => return result,
                FlowStatus::Running => return Err(self.not_suspended()),
            };
        }
    }

    fn suspended_step(&self) -> Result<Rc<ActionContext>> {
        let mut state = self.state.borrow_mut();
        if !matches!(state.status, FlowStatus::Suspended(_)) {
            let name = state.step.name().to_string();
            return Err(Error::FlowNotSuspended { name });
        }
        state.status = FlowStatus::Running;
        Ok(state.step.clone())
    }

    fn not_suspended(&self) -> Error {
        Error::FlowNotSuspended { name: self.state.borrow().step.name().to_string() }
    }

    /// Dispatch one running step, then suspend or close the flow.
    fn advance(&self, step: Rc<ActionContext>, input: FlowInput) {
        let mut body = self.state.borrow_mut().body.take();
        let mut outcome = None;
        let dispatched = dispatch(&step, |cx| {
            let Some(flow) = body.as_mut() else {
                return Err(Error::raise("flow body already completed"));
            };
            let out = flow.step(cx, input);
            let result = match &out {
                Ok(FlowYield::Await(value)) | Ok(FlowYield::Return(value)) => Ok(value.clone()),
                Err(err) => Err(err.clone()),
            };
            outcome = Some(out);
            result
        });

        match (outcome, dispatched) {
            (Some(Ok(FlowYield::Await(awaited))), Ok(_)) => {
                tracing::trace!(id = step.id(), action = %step.name(), %awaited, "flow suspended");
                let mut state = self.state.borrow_mut();
                state.step = step;
                state.body = body;
                state.status = FlowStatus::Suspended(awaited);
            }
            (None, result) => {
                tracing::debug!(id = step.id(), action = %step.name(), "flow cancelled by middleware");
                self.finish(&step, result);
            }
            (Some(_), result) => self.finish(&step, result),
        }
    }

    /// Dispatch the closing step; its result is the flow's outcome.
    fn finish(&self, previous: &Rc<ActionContext>, result: ActionResult) {
        let (kind, arg) = match &result {
            Ok(value) => (ActionKind::FlowReturn, value.clone()),
            Err(err) => (ActionKind::FlowThrow, err.to_value()),
        };
        let step = begin_flow_step(previous, kind, vec![arg]);
        let outcome = dispatch(&step, move |_| result);
        tracing::trace!(id = step.id(), action = %step.name(), ok = outcome.is_ok(), "flow finished");
        let mut state = self.state.borrow_mut();
        state.step = step;
        state.body = None;
        state.status = FlowStatus::Finished(outcome);
    }
}

impl fmt::Debug for FlowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("FlowHandle")
            .field("step", &state.step.id())
            .field("status", &state.status)
            .finish()
    }
}

impl Node {
    /// Start `flow` as an action named `name` on this node and run it up to
    /// its first suspension.
    pub fn spawn_flow<F>(&self, name: &str, args: Vec<Value>, flow: F) -> Result<FlowHandle>
    where
        F: Flow + 'static,
    {
        let spawn = begin_flow_spawn(self, name, args, self.tree().current_context())?;
        let handle = FlowHandle {
            state: Rc::new(RefCell::new(FlowState {
                step: spawn.clone(),
                body: Some(Box::new(flow)),
                status: FlowStatus::Running,
            })),
        };
        handle.advance(spawn, FlowInput::Start);
        Ok(handle)
    }
}
