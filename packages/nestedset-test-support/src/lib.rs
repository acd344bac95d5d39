//! Backend conformance scenarios shared by the adapter test suites.
//!
//! Each scenario receives a forest over an empty table and panics on the first mismatch.

use std::sync::Once;

use nestedset_core::{
    DeleteMode, Error, Forest, Node, NodeId, Persistence, Placement, RootPosition,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static TRACING: Once = Once::new();

/// Installs a test-captured subscriber honoring `RUST_LOG` (default `warn`). Safe to call repeatedly.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_test_writer()
                .with_target(true)
                .with_filter(filter),
        );
        if let Err(e) = subscriber.try_init() {
            eprintln!("tracing already initialised: {e}");
        }
    });
}

pub type Scenario<P> = fn(&mut Forest<P>);

/// Every scenario, by name.
pub fn scenarios<P: Persistence>() -> Vec<(&'static str, Scenario<P>)> {
    vec![
        ("insert_and_move_first_child", insert_and_move_first_child::<P>),
        ("sibling_moves", sibling_moves::<P>),
        ("cross_tree_move", cross_tree_move::<P>),
        ("promote_and_demote", promote_and_demote::<P>),
        ("reorder_roots", reorder_roots::<P>),
        ("cascade_delete", cascade_delete::<P>),
        ("rejected_cycle_leaves_rows", rejected_cycle_leaves_rows::<P>),
        ("queries", queries::<P>),
    ]
}

/// Runs every scenario against a fresh forest from `fresh`.
pub fn run_suite<P: Persistence>(mut fresh: impl FnMut() -> Forest<P>) {
    init_tracing();
    for (name, scenario) in scenarios::<P>() {
        info!(scenario = name, "running");
        let mut forest = fresh();
        scenario(&mut forest);
        forest
            .validate()
            .unwrap_or_else(|e| panic!("{name}: forest invalid afterwards: {e}"));
    }
}

fn shape<P: Persistence>(forest: &Forest<P>, id: NodeId) -> (i64, i64, i64) {
    let n = forest.get(id).unwrap();
    (n.left, n.right, n.level)
}

fn root_order<P: Persistence>(forest: &Forest<P>) -> Vec<NodeId> {
    forest
        .query()
        .roots()
        .unwrap()
        .into_iter()
        .map(|n| n.id)
        .collect()
}

fn ids(nodes: &[Node]) -> Vec<NodeId> {
    nodes.iter().map(|n| n.id).collect()
}

pub fn insert_and_move_first_child<P: Persistence>(forest: &mut Forest<P>) {
    let a = forest.insert(None).unwrap();
    assert_eq!((a.left, a.right, a.level, a.sequence), (1, 2, 1, 1));
    assert_eq!(a.root, a.id);
    let b = forest.insert(Some(a.id)).unwrap();
    let c = forest.insert(Some(a.id)).unwrap();
    assert_eq!(shape(forest, a.id), (1, 6, 1));
    assert_eq!(shape(forest, c.id), (4, 5, 2));

    forest.relocate(c.id, Placement::FirstChildOf(b.id)).unwrap();
    assert_eq!(shape(forest, b.id), (2, 5, 2));
    assert_eq!(shape(forest, c.id), (3, 4, 3));
    assert_eq!(forest.get(c.id).unwrap().parent, Some(b.id));
    assert_eq!(shape(forest, a.id), (1, 6, 1));
}

pub fn sibling_moves<P: Persistence>(forest: &mut Forest<P>) {
    let a = forest.insert_root().unwrap();
    let b = forest.insert_child(a.id).unwrap();
    let c = forest.insert_child(a.id).unwrap();
    let d = forest.insert_child(a.id).unwrap();

    forest.relocate(d.id, Placement::Before(b.id)).unwrap();
    assert_eq!(
        ids(&forest.query().children(&forest.get(a.id).unwrap()).unwrap()),
        vec![d.id, b.id, c.id]
    );
    forest.relocate(d.id, Placement::After(c.id)).unwrap();
    forest.relocate(b.id, Placement::LastChildOf(c.id)).unwrap();
    assert_eq!(shape(forest, c.id), (2, 5, 2));
    assert_eq!(shape(forest, b.id), (3, 4, 3));
    assert_eq!(shape(forest, d.id), (6, 7, 2));
}

pub fn cross_tree_move<P: Persistence>(forest: &mut Forest<P>) {
    let a = forest.insert_root().unwrap();
    let b = forest.insert_child(a.id).unwrap();
    let leaf = forest.insert_child(b.id).unwrap();
    let x = forest.insert_root().unwrap();
    let y = forest.insert_child(x.id).unwrap();

    let moved = forest.relocate(b.id, Placement::Before(y.id)).unwrap();
    assert_eq!((moved.root, moved.left, moved.right, moved.level), (x.id, 2, 5, 2));
    let leaf = forest.get(leaf.id).unwrap();
    assert_eq!((leaf.root, leaf.left, leaf.right, leaf.level), (x.id, 3, 4, 3));
    assert_eq!(shape(forest, y.id), (6, 7, 2));
    assert_eq!(shape(forest, x.id), (1, 8, 1));
    assert_eq!(shape(forest, a.id), (1, 2, 1));
}

pub fn promote_and_demote<P: Persistence>(forest: &mut Forest<P>) {
    let a = forest.insert_root().unwrap();
    let b = forest.insert_child(a.id).unwrap();
    let c = forest.insert_child(b.id).unwrap();
    let z = forest.insert_root().unwrap();

    let promoted = forest
        .relocate(b.id, Placement::Root(RootPosition::Before(z.id)))
        .unwrap();
    assert_eq!((promoted.root, promoted.left, promoted.right, promoted.level), (b.id, 1, 4, 1));
    assert_eq!(promoted.parent, None);
    assert_eq!(root_order(forest), vec![a.id, b.id, z.id]);
    assert_eq!(forest.get(c.id).unwrap().root, b.id);
    assert_eq!(shape(forest, a.id), (1, 2, 1));

    let demoted = forest.relocate(b.id, Placement::FirstChildOf(z.id)).unwrap();
    assert_eq!((demoted.root, demoted.left, demoted.right), (z.id, 2, 5));
    assert_eq!(demoted.sequence, 0);
    assert_eq!(root_order(forest), vec![a.id, z.id]);
    assert_eq!(forest.get(z.id).unwrap().sequence, 2);
}

pub fn reorder_roots<P: Persistence>(forest: &mut Forest<P>) {
    let r: Vec<NodeId> = (0..4).map(|_| forest.insert_root().unwrap().id).collect();

    forest.relocate(r[0], Placement::After(r[2])).unwrap();
    assert_eq!(root_order(forest), vec![r[1], r[2], r[0], r[3]]);
    forest.relocate(r[3], Placement::Before(r[1])).unwrap();
    assert_eq!(root_order(forest), vec![r[3], r[1], r[2], r[0]]);
    forest.relocate(r[1], Placement::Root(RootPosition::Last)).unwrap();
    assert_eq!(root_order(forest), vec![r[3], r[2], r[0], r[1]]);
}

pub fn cascade_delete<P: Persistence>(forest: &mut Forest<P>) {
    let a = forest.insert_root().unwrap();
    let b = forest.insert_child(a.id).unwrap();
    for _ in 0..3 {
        forest.insert_child(b.id).unwrap();
    }
    let tail = forest.insert_child(a.id).unwrap();
    let other = forest.insert_root().unwrap();

    forest.delete(b.id, DeleteMode::Cascade).unwrap();
    assert_eq!(forest.query().tree(a.id).unwrap().len(), 2);
    assert_eq!(shape(forest, tail.id), (2, 3, 2));
    assert_eq!(shape(forest, a.id), (1, 4, 1));

    forest.delete(a.id, DeleteMode::Cascade).unwrap();
    assert!(matches!(forest.get(tail.id), Err(Error::NotFound(_))));
    assert_eq!(forest.get(other.id).unwrap().sequence, 1);
}

pub fn rejected_cycle_leaves_rows<P: Persistence>(forest: &mut Forest<P>) {
    let a = forest.insert_root().unwrap();
    let b = forest.insert_child(a.id).unwrap();
    let c = forest.insert_child(b.id).unwrap();
    let before = forest.query().tree(a.id).unwrap();

    let err = forest.relocate(a.id, Placement::LastChildOf(c.id)).unwrap_err();
    assert!(err.is_precondition(), "{err}");
    let err = forest.relocate(b.id, Placement::After(NodeId(i64::MAX))).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(forest.query().tree(a.id).unwrap(), before);
}

pub fn queries<P: Persistence>(forest: &mut Forest<P>) {
    let a = forest.insert_root().unwrap();
    let b = forest.insert_child(a.id).unwrap();
    let c = forest.insert_child(b.id).unwrap();
    let d = forest.insert_child(b.id).unwrap();
    let x = forest.insert_root().unwrap();

    let q = forest.query();
    let a = q.get(a.id).unwrap();
    let b = q.get(b.id).unwrap();
    let c = q.get(c.id).unwrap();
    let d = q.get(d.id).unwrap();
    assert_eq!(ids(&q.descendants(&a, None).unwrap()), vec![b.id, c.id, d.id]);
    assert_eq!(ids(&q.descendants(&a, Some(1)).unwrap()), vec![b.id]);
    assert_eq!(ids(&q.ancestors(&d, None).unwrap()), vec![a.id, b.id]);
    assert_eq!(q.parent(&c).unwrap().map(|n| n.id), Some(b.id));
    assert_eq!(q.next_sibling(&c).unwrap().map(|n| n.id), Some(d.id));
    assert_eq!(q.prev_sibling(&d).unwrap().map(|n| n.id), Some(c.id));
    assert_eq!(q.next_sibling(&a).unwrap().map(|n| n.id), Some(x.id));
    assert!(q.prev_sibling(&a).unwrap().is_none());
}
