#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Once;

use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;
use tree_actions::{Disposer, Node, PatchBatch, StateTree};

static TRACING: Once = Once::new();

/// Route engine logs to the test output, filtered by `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A protected tree with a `counter` node and the `add` action declared.
pub fn counter_tree(start: i64) -> StateTree {
    init_tracing();
    let tree = StateTree::new(json!({"counter": {"count": start}, "log": []})).unwrap();
    tree.declare_action("add", |cx| {
        let by = cx.args().first().and_then(Value::as_i64).unwrap_or(1);
        let count = cx.target().get("count").and_then(|v| v.as_i64()).unwrap_or(0);
        cx.target().set("count", json!(count + by))?;
        Ok(json!(count + by))
    });
    tree
}

pub fn counter(tree: &StateTree) -> Node {
    tree.node(&["counter".into()]).unwrap()
}

pub type BatchLog = Rc<RefCell<Vec<PatchBatch>>>;

/// Collect every batch delivered to `node`.
pub fn record_batches(node: &Node) -> (BatchLog, Disposer) {
    let log: BatchLog = Rc::default();
    let sink = log.clone();
    let disposer = node.on_patches(move |batch| sink.borrow_mut().push(batch.clone()));
    (log, disposer)
}
