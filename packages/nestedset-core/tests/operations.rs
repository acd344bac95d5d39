use nestedset_core::{
    DeleteMode, Error, Forest, ForestConfig, MemoryStore, Node, NodeId, Placement, RootPosition,
};

fn forest() -> Forest<MemoryStore> {
    let config = ForestConfig {
        verify_mutations: true,
        ..ForestConfig::default()
    };
    Forest::with_config(MemoryStore::new(), config).unwrap()
}

fn shape(forest: &Forest<MemoryStore>, id: NodeId) -> (i64, i64, i64) {
    let n = forest.get(id).unwrap();
    (n.left, n.right, n.level)
}

/// A(B, C, D) as three leaves under one root.
fn fan(forest: &mut Forest<MemoryStore>) -> (Node, Node, Node, Node) {
    let a = forest.insert_root().unwrap();
    let b = forest.insert_child(a.id).unwrap();
    let c = forest.insert_child(a.id).unwrap();
    let d = forest.insert_child(a.id).unwrap();
    (a, b, c, d)
}

#[test]
fn insert_then_move_to_first_child() {
    let mut forest = forest();
    let a = forest.insert_root().unwrap();
    assert_eq!((a.left, a.right, a.level, a.sequence), (1, 2, 1, 1));
    assert_eq!(a.root, a.id);

    let b = forest.insert_child(a.id).unwrap();
    assert_eq!((b.left, b.right, b.level), (2, 3, 2));
    assert_eq!(shape(&forest, a.id), (1, 4, 1));

    let c = forest.insert_child(a.id).unwrap();
    assert_eq!((c.left, c.right, c.level), (4, 5, 2));
    assert_eq!(shape(&forest, a.id), (1, 6, 1));

    let moved = forest.relocate(c.id, Placement::FirstChildOf(b.id)).unwrap();
    assert_eq!((moved.left, moved.right, moved.level), (3, 4, 3));
    assert_eq!(moved.parent, Some(b.id));
    assert_eq!(shape(&forest, b.id), (2, 5, 2));
    assert_eq!(shape(&forest, a.id), (1, 6, 1));
    forest.validate().unwrap();
}

#[test]
fn roots_get_increasing_sequence() {
    let mut forest = forest();
    let seqs: Vec<i64> = (0..3)
        .map(|_| forest.insert(None).unwrap().sequence)
        .collect();
    assert_eq!(seqs, vec![1, 2, 3]);
}

#[test]
fn move_before_earlier_sibling() {
    let mut forest = forest();
    let (a, b, c, d) = fan(&mut forest);

    forest.relocate(d.id, Placement::Before(b.id)).unwrap();
    assert_eq!(shape(&forest, d.id), (2, 3, 2));
    assert_eq!(shape(&forest, b.id), (4, 5, 2));
    assert_eq!(shape(&forest, c.id), (6, 7, 2));
    assert_eq!(shape(&forest, a.id), (1, 8, 1));
    forest.validate().unwrap();
}

#[test]
fn move_after_later_sibling() {
    let mut forest = forest();
    let (a, b, c, d) = fan(&mut forest);

    forest.relocate(b.id, Placement::After(d.id)).unwrap();
    assert_eq!(shape(&forest, c.id), (2, 3, 2));
    assert_eq!(shape(&forest, d.id), (4, 5, 2));
    assert_eq!(shape(&forest, b.id), (6, 7, 2));
    assert_eq!(shape(&forest, a.id), (1, 8, 1));
    forest.validate().unwrap();
}

#[test]
fn move_to_current_place_is_a_no_op() {
    let mut forest = forest();
    let (a, b, c, _d) = fan(&mut forest);

    forest.relocate(c.id, Placement::After(b.id)).unwrap();
    assert_eq!(shape(&forest, c.id), (4, 5, 2));
    forest.relocate(b.id, Placement::FirstChildOf(a.id)).unwrap();
    assert_eq!(shape(&forest, b.id), (2, 3, 2));
    forest.validate().unwrap();
}

#[test]
fn move_subtree_deeper_and_back_up() {
    let mut forest = forest();
    let (a, b, c, d) = fan(&mut forest);
    let leaf = forest.insert_child(c.id).unwrap();

    forest.relocate(c.id, Placement::LastChildOf(d.id)).unwrap();
    assert_eq!(forest.get(c.id).unwrap().parent, Some(d.id));
    assert_eq!(shape(&forest, c.id), (5, 8, 3));
    assert_eq!(shape(&forest, leaf.id), (6, 7, 4));
    assert_eq!(shape(&forest, d.id), (4, 9, 2));
    forest.validate().unwrap();

    forest.relocate(c.id, Placement::After(b.id)).unwrap();
    assert_eq!(forest.get(c.id).unwrap().parent, Some(a.id));
    assert_eq!(shape(&forest, c.id), (4, 7, 2));
    assert_eq!(shape(&forest, leaf.id), (5, 6, 3));
    assert_eq!(shape(&forest, d.id), (8, 9, 2));
    forest.validate().unwrap();
}

#[test]
fn move_across_trees() {
    let mut forest = forest();
    let a = forest.insert_root().unwrap();
    let b = forest.insert_child(a.id).unwrap();
    let x = forest.insert_root().unwrap();
    let y = forest.insert_child(x.id).unwrap();

    let moved = forest.relocate(b.id, Placement::LastChildOf(y.id)).unwrap();
    assert_eq!(moved.root, x.id);
    assert_eq!((moved.left, moved.right, moved.level), (3, 4, 3));
    assert_eq!(shape(&forest, y.id), (2, 5, 2));
    assert_eq!(shape(&forest, x.id), (1, 6, 1));
    assert_eq!(shape(&forest, a.id), (1, 2, 1));
    forest.validate().unwrap();
}

#[test]
fn promote_to_last_root() {
    let mut forest = forest();
    let a = forest.insert_root().unwrap();
    let b = forest.insert_child(a.id).unwrap();
    let c = forest.insert_child(b.id).unwrap();

    let promoted = forest.relocate(b.id, Placement::Root(RootPosition::Last)).unwrap();
    assert!(promoted.is_root());
    assert_eq!(promoted.root, b.id);
    assert_eq!(promoted.parent, None);
    assert_eq!(promoted.sequence, 2);
    assert_eq!((promoted.left, promoted.right, promoted.level), (1, 4, 1));

    let c = forest.get(c.id).unwrap();
    assert_eq!((c.root, c.left, c.right, c.level), (b.id, 2, 3, 2));
    assert_eq!(shape(&forest, a.id), (1, 2, 1));
    forest.validate().unwrap();
}

#[test]
fn promote_before_existing_root() {
    let mut forest = forest();
    let r1 = forest.insert_root().unwrap();
    let r2 = forest.insert_root().unwrap();
    let k = forest.insert_child(r2.id).unwrap();

    forest.relocate(k.id, Placement::Before(r1.id)).unwrap();
    let order: Vec<NodeId> = forest.query().roots().unwrap().iter().map(|n| n.id).collect();
    assert_eq!(order, vec![k.id, r1.id, r2.id]);
    assert_eq!(forest.get(r2.id).unwrap().right, 2);
    forest.validate().unwrap();
}

#[test]
fn promote_after_existing_root() {
    let mut forest = forest();
    let r1 = forest.insert_root().unwrap();
    let r2 = forest.insert_root().unwrap();
    let k = forest.insert_child(r2.id).unwrap();

    forest
        .relocate(k.id, Placement::Root(RootPosition::After(r1.id)))
        .unwrap();
    let order: Vec<NodeId> = forest.query().roots().unwrap().iter().map(|n| n.id).collect();
    assert_eq!(order, vec![r1.id, k.id, r2.id]);
    forest.validate().unwrap();
}

#[test]
fn demote_root_into_other_tree() {
    let mut forest = forest();
    let r1 = forest.insert_root().unwrap();
    let k1 = forest.insert_child(r1.id).unwrap();
    let r2 = forest.insert_root().unwrap();
    let r3 = forest.insert_root().unwrap();

    let moved = forest.relocate(r1.id, Placement::LastChildOf(r2.id)).unwrap();
    assert_eq!(moved.parent, Some(r2.id));
    assert_eq!((moved.root, moved.left, moved.right, moved.level), (r2.id, 2, 5, 2));
    assert_eq!(moved.sequence, 0);
    let k1 = forest.get(k1.id).unwrap();
    assert_eq!((k1.root, k1.left, k1.right, k1.level), (r2.id, 3, 4, 3));

    let roots = forest.query().roots().unwrap();
    assert_eq!(
        roots.iter().map(|n| (n.id, n.sequence)).collect::<Vec<_>>(),
        vec![(r2.id, 1), (r3.id, 2)]
    );
    forest.validate().unwrap();
}

#[test]
fn reorder_roots_in_both_directions() {
    let mut forest = forest();
    let r1 = forest.insert_root().unwrap();
    let r2 = forest.insert_root().unwrap();
    let r3 = forest.insert_root().unwrap();
    let ids = |f: &Forest<MemoryStore>| -> Vec<NodeId> {
        f.query().roots().unwrap().iter().map(|n| n.id).collect()
    };

    forest.relocate(r1.id, Placement::After(r3.id)).unwrap();
    assert_eq!(ids(&forest), vec![r2.id, r3.id, r1.id]);

    forest.relocate(r1.id, Placement::Before(r2.id)).unwrap();
    assert_eq!(ids(&forest), vec![r1.id, r2.id, r3.id]);

    forest.relocate(r1.id, Placement::Before(r3.id)).unwrap();
    assert_eq!(ids(&forest), vec![r2.id, r1.id, r3.id]);

    forest.relocate(r3.id, Placement::After(r2.id)).unwrap();
    assert_eq!(ids(&forest), vec![r2.id, r3.id, r1.id]);

    forest.relocate(r2.id, Placement::Root(RootPosition::Last)).unwrap();
    assert_eq!(ids(&forest), vec![r3.id, r1.id, r2.id]);
    forest.validate().unwrap();
}

#[test]
fn cascading_delete_closes_gap() {
    let mut forest = forest();
    let a = forest.insert_root().unwrap();
    let b = forest.insert_child(a.id).unwrap();
    let c = forest.insert_child(b.id).unwrap();
    let d = forest.insert_child(a.id).unwrap();

    forest.delete(b.id, DeleteMode::Cascade).unwrap();
    assert!(matches!(forest.get(b.id), Err(Error::NotFound(_))));
    assert!(matches!(forest.get(c.id), Err(Error::NotFound(_))));
    assert_eq!(shape(&forest, d.id), (2, 3, 2));
    assert_eq!(shape(&forest, a.id), (1, 4, 1));
    forest.validate().unwrap();
}

#[test]
fn deleting_root_closes_sequence_gap() {
    let mut forest = forest();
    let r1 = forest.insert_root().unwrap();
    let r2 = forest.insert_root().unwrap();
    forest.insert_child(r2.id).unwrap();
    let r3 = forest.insert_root().unwrap();

    forest.delete(r2.id, DeleteMode::default()).unwrap();
    let roots = forest.query().roots().unwrap();
    assert_eq!(
        roots.iter().map(|n| (n.id, n.sequence)).collect::<Vec<_>>(),
        vec![(r1.id, 1), (r3.id, 2)]
    );
    assert_eq!(forest.store().len(), 2);
    forest.validate().unwrap();
}

#[test]
fn delete_in_small_batches() {
    let config = ForestConfig {
        delete_batch: 2,
        verify_mutations: true,
        ..ForestConfig::default()
    };
    let mut forest = Forest::with_config(MemoryStore::new(), config).unwrap();
    let a = forest.insert_root().unwrap();
    let b = forest.insert_child(a.id).unwrap();
    for _ in 0..5 {
        forest.insert_child(b.id).unwrap();
    }
    forest.delete(b.id, DeleteMode::Cascade).unwrap();
    assert_eq!(forest.store().len(), 1);
    assert_eq!(shape(&forest, a.id), (1, 2, 1));
}

#[test]
fn skip_subtree_on_leaf_closes_the_gap() {
    let mut forest = forest();
    let (a, b, c, d) = fan(&mut forest);

    forest.delete(c.id, DeleteMode::SkipSubtree).unwrap();
    assert!(matches!(forest.get(c.id), Err(Error::NotFound(_))));
    assert_eq!(shape(&forest, a.id), (1, 6, 1));
    assert_eq!(shape(&forest, b.id), (2, 3, 2));
    assert_eq!(shape(&forest, d.id), (4, 5, 2));
    forest.validate().unwrap();
}

#[test]
fn skip_subtree_on_leaf_root_keeps_sequence_dense() {
    let mut forest = forest();
    let r1 = forest.insert_root().unwrap();
    let r2 = forest.insert_root().unwrap();

    forest.delete(r1.id, DeleteMode::SkipSubtree).unwrap();
    assert_eq!(forest.get(r2.id).unwrap().sequence, 1);
    forest.validate().unwrap();

    let r3 = forest.insert_root().unwrap();
    assert_eq!(r3.sequence, 2);
}

#[test]
fn skip_subtree_leaves_descendants_in_place() {
    let mut forest = forest();
    let a = forest.insert_root().unwrap();
    let b = forest.insert_child(a.id).unwrap();
    let leaf = forest.insert_child(b.id).unwrap();
    let tail = forest.insert_child(a.id).unwrap();

    forest.delete(b.id, DeleteMode::SkipSubtree).unwrap();
    assert!(forest.get(b.id).is_err());
    assert_eq!(shape(&forest, leaf.id), (3, 4, 3));
    assert_eq!(shape(&forest, tail.id), (2, 3, 2));
    assert_eq!(shape(&forest, a.id), (1, 4, 1));
}

#[test]
fn relocation_preconditions() {
    let mut forest = forest();
    let a = forest.insert_root().unwrap();
    let b = forest.insert_child(a.id).unwrap();
    let c = forest.insert_child(b.id).unwrap();

    let err = forest.relocate(b.id, Placement::LastChildOf(c.id)).unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));
    assert!(err.is_precondition());

    let err = forest.relocate(a.id, Placement::FirstChildOf(c.id)).unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));

    let err = forest.relocate(b.id, Placement::After(b.id)).unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));

    let err = forest
        .relocate(c.id, Placement::Root(RootPosition::Before(b.id)))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));

    let err = forest.relocate(c.id, Placement::Before(NodeId(404))).unwrap_err();
    assert!(matches!(err, Error::NotFound(NodeId(404))));

    let err = forest.insert_child(NodeId(404)).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    assert!(!forest.store().in_transaction());
    assert_eq!(shape(&forest, b.id), (2, 5, 2));
    assert_eq!(shape(&forest, c.id), (3, 4, 3));
    forest.validate().unwrap();
}
