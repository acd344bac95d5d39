use crate::error::{Error, Result};
use crate::ids::NodeId;
use crate::node::Node;
use crate::statement::{Column, Filter, Order, Span};
use crate::traits::Persistence;

/// Read-only traversal built on interval comparisons. Takes no locks; each call sees
/// read-committed state.
pub struct Query<'a, P: Persistence + ?Sized> {
    store: &'a P,
}

impl<'a, P: Persistence + ?Sized> Query<'a, P> {
    pub fn new(store: &'a P) -> Self {
        Self { store }
    }

    pub fn get(&self, id: NodeId) -> Result<Node> {
        self.store.fetch_one(id)?.ok_or(Error::NotFound(id))
    }

    /// All root nodes in forest order.
    pub fn roots(&self) -> Result<Vec<Node>> {
        self.store.fetch_all(&Filter::roots(), Order::Sequence)
    }

    /// Every node of the tree rooted at `root`, pre-order.
    pub fn tree(&self, root: NodeId) -> Result<Vec<Node>> {
        self.store.fetch_all(&Filter::tree(root), Order::Left)
    }

    /// Nodes strictly inside `node`'s interval, at most `depth` levels below it.
    pub fn descendants(&self, node: &Node, depth: Option<u32>) -> Result<Vec<Node>> {
        let mut filter = Filter::tree(node.root)
            .with(Column::Left, Span::above(node.left))
            .with(Column::Right, Span::below(node.right));
        if let Some(depth) = depth {
            filter = filter.with(Column::Level, Span::at_most(node.level + i64::from(depth)));
        }
        self.store.fetch_all(&filter, Order::Left)
    }

    pub fn children(&self, node: &Node) -> Result<Vec<Node>> {
        self.descendants(node, Some(1))
    }

    /// Nodes whose interval strictly contains `node`'s, at most `depth` levels above it.
    pub fn ancestors(&self, node: &Node, depth: Option<u32>) -> Result<Vec<Node>> {
        let mut filter = Filter::tree(node.root)
            .with(Column::Left, Span::below(node.left))
            .with(Column::Right, Span::above(node.right));
        if let Some(depth) = depth {
            filter = filter.with(Column::Level, Span::at_least(node.level - i64::from(depth)));
        }
        self.store.fetch_all(&filter, Order::Left)
    }

    pub fn parent(&self, node: &Node) -> Result<Option<Node>> {
        match node.parent {
            Some(parent) if !node.is_root() => self.store.fetch_one(parent),
            _ => Ok(None),
        }
    }

    /// Previous sibling, or the previous root for a root node.
    pub fn prev_sibling(&self, node: &Node) -> Result<Option<Node>> {
        let filter = if node.is_root() {
            Filter::roots().with(Column::Sequence, Span::exactly(node.sequence - 1))
        } else {
            Filter::tree(node.root).with(Column::Right, Span::exactly(node.left - 1))
        };
        self.first(&filter)
    }

    /// Next sibling, or the next root for a root node.
    pub fn next_sibling(&self, node: &Node) -> Result<Option<Node>> {
        let filter = if node.is_root() {
            Filter::roots().with(Column::Sequence, Span::exactly(node.sequence + 1))
        } else {
            Filter::tree(node.root).with(Column::Left, Span::exactly(node.right + 1))
        };
        self.first(&filter)
    }

    fn first(&self, filter: &Filter) -> Result<Option<Node>> {
        Ok(self.store.fetch_all(filter, Order::Left)?.into_iter().next())
    }
}
