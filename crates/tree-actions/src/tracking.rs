//! A simplified view of action dispatch.
//!
//! Middleware see every step of a flow separately. Services that only care
//! about logical invocations (one synchronous action, or a whole flow from
//! spawn to finish) implement [`ActionTracker`] instead and get one
//! `on_start` and one `on_finish` per invocation, with `on_suspend` and
//! `on_resume` in between for flows. The context passed to every hook is the
//! logical one ([`ActionContext::logical`]).

use std::rc::Rc;

use crate::context::{ActionContext, ActionKind};
use crate::data::DataKey;
use crate::disposer::Disposer;
use crate::error::ActionResult;
use crate::middleware::Middleware;
use crate::tree::Node;

pub trait ActionTracker {
    /// Whether to track this invocation. Only consulted when it starts.
    fn filter(&self, _call: &ActionContext) -> bool {
        true
    }

    /// Called before the invocation runs. Returning an outcome skips the
    /// body and finishes the invocation with it.
    fn on_start(&self, _call: &ActionContext) -> Option<ActionResult> {
        None
    }

    /// A tracked flow is about to run a resume step.
    fn on_resume(&self, _call: &ActionContext) {}

    /// A tracked flow step has ended and the flow awaits the host.
    fn on_suspend(&self, _call: &ActionContext) {}

    fn on_finish(&self, _call: &ActionContext, _outcome: &ActionResult) {}
}

/// Adapt `tracker` into a middleware.
pub fn tracking_middleware<T>(tracker: T) -> Middleware
where
    T: ActionTracker + 'static,
{
    let tracker = Rc::new(tracker);
    // Set in the invocation's own bag while it is tracked.
    let tracked: DataKey<()> = DataKey::new();

    Middleware::new(move |cx, next| {
        let call = cx.logical();
        match cx.kind() {
            ActionKind::Action | ActionKind::FlowSpawn => {
                if !tracker.filter(call) {
                    return next.run();
                }
                let sync = cx.kind() == ActionKind::Action;
                call.data().insert(tracked, ());
                let result = match tracker.on_start(call) {
                    Some(outcome) => outcome,
                    None => next.run(),
                };
                if sync {
                    call.data().remove(tracked);
                    tracker.on_finish(call, &result);
                } else {
                    tracker.on_suspend(call);
                }
                result
            }
            ActionKind::FlowResume | ActionKind::FlowResumeError => {
                if !call.data().contains(tracked) {
                    return next.run();
                }
                tracker.on_resume(call);
                let result = next.run();
                tracker.on_suspend(call);
                result
            }
            ActionKind::FlowReturn | ActionKind::FlowThrow => {
                let result = next.run();
                if call.data().remove(tracked).is_some() {
                    tracker.on_finish(call, &result);
                }
                result
            }
        }
    })
}

/// Register `tracker` for actions on `node` and its descendants.
pub fn track<T>(node: &Node, tracker: T) -> Disposer
where
    T: ActionTracker + 'static,
{
    node.add_middleware(tracking_middleware(tracker))
}
