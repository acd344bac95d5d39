//! Invariant checks over committed rows. Intended for tests, debugging and the optional
//! post-mutation verification of `Forest`.

use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::ids::NodeId;
use crate::node::Node;

fn broken(msg: String) -> Error {
    Error::InconsistentState(msg)
}

/// Checks that `nodes` form exactly one well-formed nested-set tree rooted at `root`.
pub fn validate_tree(root: NodeId, nodes: &[Node]) -> Result<()> {
    if nodes.is_empty() {
        return Err(broken(format!("tree {root} has no rows")));
    }

    let mut sorted: Vec<&Node> = nodes.iter().collect();
    sorted.sort_by_key(|n| n.left);

    let mut bounds = BTreeSet::new();
    for node in &sorted {
        if node.root != root {
            return Err(broken(format!(
                "node {} belongs to tree {}, expected {root}",
                node.id, node.root
            )));
        }
        if node.left >= node.right || (node.right - node.left) % 2 == 0 {
            return Err(broken(format!(
                "node {} has malformed interval ({}, {})",
                node.id, node.left, node.right
            )));
        }
        if node.parent.is_none() != node.is_root() {
            return Err(broken(format!(
                "node {} parent link disagrees with left = {}",
                node.id, node.left
            )));
        }
        if !bounds.insert(node.left) || !bounds.insert(node.right) {
            return Err(broken(format!("node {} reuses an interval bound", node.id)));
        }
    }

    let expected = 2 * nodes.len() as i64;
    if bounds.iter().copied().ne(1..=expected) {
        return Err(broken(format!(
            "tree {root} numbering is not dense over 1..={expected}"
        )));
    }

    let top = sorted[0];
    if top.id != root || top.left != 1 || top.level != 1 || top.right != expected {
        return Err(broken(format!(
            "tree {root} top row is {} at ({}, {}) level {}",
            top.id, top.left, top.right, top.level
        )));
    }

    // Pre-order walk keeping the chain of open ancestors.
    let mut open: Vec<&Node> = vec![top];
    for node in sorted.iter().skip(1) {
        while open.last().is_some_and(|a| a.right < node.left) {
            open.pop();
        }
        let Some(parent) = open.last() else {
            return Err(broken(format!("node {} lies outside its root", node.id)));
        };
        if node.right > parent.right {
            return Err(broken(format!(
                "node {} overlaps node {} without nesting",
                node.id, parent.id
            )));
        }
        if node.parent != Some(parent.id) {
            return Err(broken(format!(
                "node {} links to {:?} but is nested directly in {}",
                node.id, node.parent, parent.id
            )));
        }
        if node.level != parent.level + 1 {
            return Err(broken(format!(
                "node {} has level {} under level {}",
                node.id, node.level, parent.level
            )));
        }
        open.push(node);
    }
    Ok(())
}

/// Checks that root `sequence` values are unique and dense, starting at 1.
pub fn validate_roots(roots: &[Node]) -> Result<()> {
    let mut sequences: Vec<i64> = Vec::with_capacity(roots.len());
    for root in roots {
        if !root.is_root() || root.parent.is_some() || root.root != root.id {
            return Err(broken(format!("node {} is listed as a root", root.id)));
        }
        sequences.push(root.sequence);
    }
    sequences.sort_unstable();
    if sequences.iter().copied().ne(1..=roots.len() as i64) {
        return Err(broken(format!(
            "root sequence is not dense: {sequences:?}"
        )));
    }
    Ok(())
}
