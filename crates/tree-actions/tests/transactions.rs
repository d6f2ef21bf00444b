mod common;

use serde_json::{json, Value};
use tree_actions::{transactional, Error, Patch, PathSegment, StateTree};

use common::{counter, counter_tree, record_batches};

#[test]
fn failed_action_is_reverted_and_listener_sees_both_directions() {
    common::init_tracing();
    let tree = StateTree::new(json!({"x": 0})).unwrap();
    let (log, _listener) = record_batches(&tree.root());
    let _tx = transactional(&tree.root(), |_| true);

    let err = tree
        .root()
        .run("write_then_fail", vec![], |cx| {
            cx.target().set("x", json!(1))?;
            Err(Error::raise("boom"))
        })
        .unwrap_err();

    assert_eq!(err, Error::raise("boom"));
    assert_eq!(tree.snapshot(), json!({"x": 0}));
    let log = log.borrow();
    let x = || vec![PathSegment::from("x")];
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].patches, vec![Patch::Replace { path: x(), value: json!(1) }]);
    assert_eq!(log[1].patches, vec![Patch::Replace { path: x(), value: json!(0) }]);
    assert_eq!(log[1].patches, log[0].inverse_patches);
}

#[test]
fn only_actions_within_the_node_are_transactional() {
    let tree = counter_tree(1);
    let _tx = transactional(&counter(&tree), |_| true);

    let log = tree.node(&["log".into()]).unwrap();
    let _ = log.run("append", vec![], |cx| {
        cx.target().push(json!("entry"))?;
        Err(Error::raise("outside"))
    });
    let _ = counter(&tree).run("bump", vec![], |cx| {
        cx.target().set("count", json!(2))?;
        Err(Error::raise("inside"))
    });

    assert_eq!(tree.snapshot(), json!({"counter": {"count": 1}, "log": ["entry"]}));
}

#[test]
fn disposing_the_transaction_stops_rollbacks() {
    let tree = counter_tree(1);
    let tx = transactional(&tree.root(), |_| true);
    tx.dispose();
    let _ = counter(&tree).run("bump", vec![], |cx| {
        cx.target().set("count", json!(2))?;
        Err(Error::raise("kept"))
    });
    assert_eq!(counter(&tree).get("count"), Some(json!(2)));
}

#[test]
fn structural_mutations_inside_a_failed_action_are_reverted() {
    let tree = StateTree::new(json!({"list": ["a", "b", "c"], "meta": {"n": 1}})).unwrap();
    let _tx = transactional(&tree.root(), |_| true);
    let before = tree.snapshot();

    let result = tree.root().run("reshape", vec![], |cx| {
        let list = cx.target().child("list")?;
        list.splice(0, 2, vec![json!("z")])?;
        list.insert(1, json!("y"))?;
        cx.target().remove("meta")?;
        cx.target().set("extra", json!({"deep": [1, 2]}))?;
        Err::<Value, _>(Error::raise("abort"))
    });

    assert!(result.is_err());
    assert_eq!(tree.snapshot(), before);
}
