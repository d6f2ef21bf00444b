//! All-or-nothing actions: when a tracked invocation fails, every patch it
//! produced is reverted before the error reaches the caller.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::OnceLock;

use crate::context::ActionContext;
use crate::data::DataKey;
use crate::disposer::Disposer;
use crate::error::ActionResult;
use crate::patch::Patch;
use crate::tracking::{track, ActionTracker};
use crate::tree::Node;

type Filter = Box<dyn Fn(&ActionContext) -> bool>;

/// Set in the logical bag of every invocation a transaction has taken on.
fn rollback_marker() -> DataKey<()> {
    static MARKER: OnceLock<DataKey<()>> = OnceLock::new();
    *MARKER.get_or_init(DataKey::new)
}

/// Whether a failure of `call` is reverted by a transaction.
///
/// Set when a transaction starts tracking the invocation, so the answer is
/// already known to interceptors that finish before the rollback runs.
pub fn rolls_back_on_failure(call: &ActionContext) -> bool {
    call.data().contains(rollback_marker())
}

struct Recording {
    inverses: Rc<RefCell<Vec<Vec<Patch>>>>,
    subscription: Disposer,
}

struct TransactionTracker {
    filter: Filter,
    open: RefCell<HashMap<u64, Recording>>,
}

impl ActionTracker for TransactionTracker {
    fn filter(&self, call: &ActionContext) -> bool {
        (self.filter)(call)
    }

    fn on_start(&self, call: &ActionContext) -> Option<ActionResult> {
        let id = call.id();
        call.data().insert(rollback_marker(), ());
        let inverses: Rc<RefCell<Vec<Vec<Patch>>>> = Rc::default();
        let sink = inverses.clone();
        let subscription = call.target().on_patches(move |batch| {
            if batch.produced_by(id) {
                sink.borrow_mut().push(batch.inverse_patches.clone());
            }
        });
        self.open
            .borrow_mut()
            .insert(id, Recording { inverses, subscription });
        None
    }

    fn on_finish(&self, call: &ActionContext, outcome: &ActionResult) {
        let Some(recording) = self.open.borrow_mut().remove(&call.id()) else {
            return;
        };
        recording.subscription.dispose();
        let Err(err) = outcome else { return };

        let batches = recording.inverses.take();
        tracing::debug!(
            id = call.id(),
            action = %call.name(),
            %err,
            batches = batches.len(),
            "rolling back failed action"
        );
        let target = call.target();
        for patch in batches.iter().rev().flatten() {
            if let Err(rollback_err) = target.replay_patch(patch) {
                tracing::error!(
                    id = call.id(),
                    action = %call.name(),
                    patch = %patch.pointer(),
                    %rollback_err,
                    "rollback stopped"
                );
                return;
            }
        }
    }
}

/// Make every action on `node` (or below) accepted by `filter` atomic.
///
/// On failure the action's patches are undone newest first, then the
/// original error propagates unchanged. Flows are rolled back as a whole when
/// they finish with an error.
pub fn transactional<F>(node: &Node, filter: F) -> Disposer
where
    F: Fn(&ActionContext) -> bool + 'static,
{
    track(
        node,
        TransactionTracker { filter: Box::new(filter), open: RefCell::new(HashMap::new()) },
    )
}
