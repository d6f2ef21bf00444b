//! Interceptor registry and the dispatcher that runs action steps through it.
//!
//! Middleware run in reverse registration order: the most recently added
//! registration is the outermost link. Each handler receives the step's
//! context and a [`Next`] continuation; calling [`Next::run`] proceeds to the
//! next link (ultimately the action body), returning without calling it
//! short-circuits the step with the handler's own result.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use tree_path::{format_json_pointer, starts_with, Path};

use crate::context::ActionContext;
use crate::disposer::Disposer;
use crate::error::ActionResult;
use crate::tree::{Node, StateTree};

type Handler = dyn for<'a> Fn(&'a ActionContext, Next<'a>) -> ActionResult;
type Filter = dyn Fn(&ActionContext) -> bool;
type Body<'a> = Box<dyn FnOnce(&ActionContext) -> ActionResult + 'a>;

/// An interceptor, optionally restricted by a predicate on the step context.
#[derive(Clone)]
pub struct Middleware {
    handler: Rc<Handler>,
    filter: Option<Rc<Filter>>,
}

impl Middleware {
    pub fn new<F>(handler: F) -> Self
    where
        F: for<'a> Fn(&'a ActionContext, Next<'a>) -> ActionResult + 'static,
    {
        Self { handler: Rc::new(handler), filter: None }
    }

    /// Only intercept steps for which `predicate` returns true.
    pub fn filter<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&ActionContext) -> bool + 'static,
    {
        self.filter = Some(Rc::new(predicate));
        self
    }

    fn applies_to(&self, ctx: &ActionContext) -> bool {
        self.filter.as_ref().map_or(true, |f| f(ctx))
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Middleware")
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

pub(crate) struct Registered {
    subtree: Path,
    middleware: Middleware,
}

/// Per-tree registry, in registration order.
#[derive(Default)]
pub(crate) struct MiddlewareRegistry {
    entries: RefCell<IndexMap<u64, Rc<Registered>>>,
    next_id: Cell<u64>,
}

impl MiddlewareRegistry {
    fn add(&self, subtree: Path, middleware: Middleware) -> u64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        self.entries
            .borrow_mut()
            .insert(id, Rc::new(Registered { subtree, middleware }));
        id
    }

    fn remove(&self, id: u64) {
        self.entries.borrow_mut().shift_remove(&id);
    }

    /// Snapshot of the registrations applying to `ctx`, outermost first.
    fn resolve(&self, ctx: &ActionContext) -> Vec<Rc<Registered>> {
        let all: Vec<Rc<Registered>> = self.entries.borrow().values().rev().cloned().collect();
        all.into_iter()
            .filter(|r| starts_with(ctx.target().path(), &r.subtree) && r.middleware.applies_to(ctx))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().len()
    }
}

/// The rest of the chain, as seen from one handler.
pub struct Next<'a> {
    ctx: &'a ActionContext,
    chain: &'a [Rc<Registered>],
    body: Body<'a>,
}

impl<'a> Next<'a> {
    /// The step being dispatched.
    pub fn context(&self) -> &'a ActionContext {
        self.ctx
    }

    /// Run the remaining links and the body, returning their outcome.
    pub fn run(self) -> ActionResult {
        match self.chain.split_first() {
            Some((link, rest)) => {
                let next = Next { ctx: self.ctx, chain: rest, body: self.body };
                (link.middleware.handler)(self.ctx, next)
            }
            None => (self.body)(self.ctx),
        }
    }
}

/// Run `body` for the step `ctx` through the middleware registered on its
/// tree.
///
/// The applicable registrations are fixed when the dispatch starts, so adding
/// or disposing middleware from inside a handler only affects later
/// dispatches. While the chain runs, `ctx` is the tree's current context and
/// its target subtree accepts mutations.
pub fn dispatch<F>(ctx: &Rc<ActionContext>, body: F) -> ActionResult
where
    F: FnOnce(&ActionContext) -> ActionResult,
{
    let tree = ctx.target().tree();
    let chain = tree.inner().middleware.resolve(ctx);
    let span = tracing::debug_span!(
        "dispatch",
        id = ctx.id(),
        action = %ctx.name(),
        kind = ctx.kind().as_str(),
        node = %ctx.target().pointer(),
    );
    let _entered = span.enter();
    tracing::trace!(middleware = chain.len(), "dispatching");

    let _running = tree.enter(ctx.clone());
    let result = Next { ctx: &**ctx, chain: &chain, body: Box::new(body) }.run();
    if let Err(err) = &result {
        tracing::debug!(%err, "action failed");
    }
    result
}

impl Node {
    /// Register `middleware` for actions targeting this node or anything
    /// below it.
    pub fn add_middleware(&self, middleware: Middleware) -> Disposer {
        let inner = self.tree().inner();
        let id = inner.middleware.add(self.path().clone(), middleware);
        tracing::trace!(id, subtree = %format_json_pointer(self.path()), "middleware added");
        let tree = self.tree().downgrade();
        Disposer::new(move || {
            if let Some(inner) = tree.upgrade() {
                inner.middleware.remove(id);
            }
        })
    }
}

impl StateTree {
    /// Register `middleware` for every action of the tree.
    pub fn add_middleware(&self, middleware: Middleware) -> Disposer {
        self.root().add_middleware(middleware)
    }

    /// Number of live middleware registrations.
    pub fn middleware_count(&self) -> usize {
        self.inner().middleware.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::{json, Value};

    type Log = Rc<RefCell<Vec<String>>>;

    fn logging(log: &Log, name: &'static str) -> Middleware {
        let log = log.clone();
        Middleware::new(move |cx, next| {
            log.borrow_mut().push(format!("{name}:{}", cx.name()));
            next.run()
        })
    }

    fn tree() -> StateTree {
        StateTree::new(json!({"a": {"n": 0}, "b": {"n": 0}})).unwrap()
    }

    #[test]
    fn reverse_registration_order() {
        let tree = tree();
        let log: Log = Rc::default();
        let _a = tree.add_middleware(logging(&log, "A"));
        let _b = tree.add_middleware(logging(&log, "B"));
        let body_log = log.clone();
        let out = tree
            .root()
            .run("op", vec![], move |_| {
                body_log.borrow_mut().push("body".into());
                Ok(json!(1))
            })
            .unwrap();
        assert_eq!(out, json!(1));
        assert_eq!(*log.borrow(), vec!["B:op", "A:op", "body"]);
    }

    #[test]
    fn subtree_and_filter_restrict_registrations() {
        let tree = tree();
        let log: Log = Rc::default();
        let a = tree.node(&["a".into()]).unwrap();
        let b = tree.node(&["b".into()]).unwrap();
        let _sub = a.add_middleware(logging(&log, "sub"));
        let _filtered = tree.add_middleware(logging(&log, "only-x").filter(|cx| cx.name() == "x"));
        a.run("x", vec![], |_| Ok(Value::Null)).unwrap();
        b.run("x", vec![], |_| Ok(Value::Null)).unwrap();
        tree.root().run("y", vec![], |_| Ok(Value::Null)).unwrap();
        assert_eq!(*log.borrow(), vec!["only-x:x", "sub:x", "only-x:x"]);
    }

    #[test]
    fn short_circuit_skips_inner_links_and_body() {
        let tree = tree();
        let log: Log = Rc::default();
        let _inner = tree.add_middleware(logging(&log, "inner"));
        let _outer = tree.add_middleware(Middleware::new(|_, _next| Ok(json!("cached"))));
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        let out = tree.root().run("op", vec![], move |_| {
            flag.set(true);
            Ok(Value::Null)
        });
        assert_eq!(out, Ok(json!("cached")));
        assert!(!ran.get());
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn outer_handlers_observe_errors_through_next() {
        let tree = tree();
        let seen: Rc<RefCell<Option<Error>>> = Rc::default();
        let sink = seen.clone();
        let _observer = tree.add_middleware(Middleware::new(move |_, next| {
            let result = next.run();
            if let Err(err) = &result {
                *sink.borrow_mut() = Some(err.clone());
            }
            result
        }));
        let err = tree.root().run("op", vec![], |_| Err(Error::raise("boom"))).unwrap_err();
        assert_eq!(err, Error::raise("boom"));
        assert_eq!(*seen.borrow(), Some(Error::raise("boom")));
    }

    #[test]
    fn disposing_mid_flight_does_not_affect_started_dispatch() {
        let tree = tree();
        let log: Log = Rc::default();
        let victim = Rc::new(RefCell::new(Some(tree.add_middleware(logging(&log, "victim")))));
        let slot = victim.clone();
        let _killer = tree.add_middleware(Middleware::new(move |_, next| {
            if let Some(disposer) = slot.borrow_mut().take() {
                disposer.dispose();
            }
            next.run()
        }));
        tree.root().run("first", vec![], |_| Ok(Value::Null)).unwrap();
        tree.root().run("second", vec![], |_| Ok(Value::Null)).unwrap();
        assert_eq!(*log.borrow(), vec!["victim:first"]);
        assert_eq!(tree.middleware_count(), 1);
    }

    #[test]
    fn current_context_is_set_while_running() {
        let tree = tree();
        assert!(!tree.is_running_action());
        let shared = tree.clone();
        tree.root()
            .run("outer", vec![], move |cx| {
                assert_eq!(shared.current_context().map(|c| c.id()), Some(cx.id()));
                let parent_id = cx.id();
                shared.root().run("inner", vec![], move |inner| {
                    assert_eq!(inner.parent().map(|p| p.id()), Some(parent_id));
                    Ok(Value::Null)
                })
            })
            .unwrap();
        assert!(!tree.is_running_action());
    }
}
