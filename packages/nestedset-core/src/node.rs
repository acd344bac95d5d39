#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::ids::NodeId;

/// Value of the `root` column.
///
/// `Detached` is the transient state a subtree passes through while it is being moved inside
/// its own tree, and the state of a freshly inserted root before it learns its own id. It must
/// never be observable outside of an open transaction.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Membership {
    Tree(NodeId),
    Detached,
}

impl Membership {
    pub fn tree(self) -> Option<NodeId> {
        match self {
            Membership::Tree(root) => Some(root),
            Membership::Detached => None,
        }
    }
}

/// One committed row of the forest table.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Node {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub root: NodeId,
    pub left: i64,
    pub right: i64,
    pub level: i64,
    /// Position among root nodes. Zero for every node that is not a root.
    pub sequence: i64,
}

impl Node {
    pub fn is_root(&self) -> bool {
        self.left == 1
    }

    pub fn is_leaf(&self) -> bool {
        self.right - self.left == 1
    }

    /// Width of the interval, `right - left + 1`. Twice the number of nodes in the subtree.
    pub fn size(&self) -> i64 {
        self.right - self.left + 1
    }

    pub fn is_descendant_of(&self, other: &Node) -> bool {
        self.root == other.root && self.left > other.left && self.right < other.right
    }

    pub fn is_ancestor_of(&self, other: &Node) -> bool {
        self.root == other.root && self.left < other.left && self.right > other.right
    }
}

/// Row handed to `Persistence::insert`; the adapter assigns the id.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewNode {
    pub parent: Option<NodeId>,
    pub root: Membership,
    pub left: i64,
    pub right: i64,
    pub level: i64,
    pub sequence: i64,
}

impl NewNode {
    /// A single-node tree waiting for its own id to become its `root`.
    pub fn root(sequence: i64) -> Self {
        Self {
            parent: None,
            root: Membership::Detached,
            left: 1,
            right: 2,
            level: 1,
            sequence,
        }
    }

    /// Leaf placed at `left` under `parent`; the caller opens the gap first.
    pub fn child_of(parent: &Node, left: i64) -> Self {
        Self {
            parent: Some(parent.id),
            root: Membership::Tree(parent.root),
            left,
            right: left + 1,
            level: parent.level + 1,
            sequence: 0,
        }
    }

    pub fn into_node(self, id: NodeId) -> Node {
        Node {
            id,
            parent: self.parent,
            root: self.root.tree().unwrap_or(id),
            left: self.left,
            right: self.right,
            level: self.level,
            sequence: self.sequence,
        }
    }
}
