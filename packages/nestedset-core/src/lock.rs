//! Canonical lock acquisition for structural mutations.
//!
//! Every path locks the root set first (root rows ordered by id) and then each tree in
//! ascending root id, rows ordered by `left` so a tree's root row is always the first row taken.
//! Root rows are therefore always acquired in ascending id order and a non-root row is only ever
//! requested while its tree's root row is held, which rules out wait cycles between two
//! mutations.

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::Result;
use crate::ids::NodeId;
use crate::statement::Filter;
use crate::traits::Persistence;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LockPlan {
    trees: BTreeSet<NodeId>,
    roots: bool,
}

impl LockPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tree(mut self, root: NodeId) -> Self {
        self.trees.insert(root);
        self
    }

    pub fn roots(mut self) -> Self {
        self.roots = true;
        self
    }

    pub fn locks_roots(&self) -> bool {
        self.roots
    }

    pub fn covers(&self, root: NodeId) -> bool {
        self.trees.contains(&root)
    }

    pub fn trees(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.trees.iter().copied()
    }

    /// Filters in acquisition order.
    pub fn steps(&self) -> Vec<Filter> {
        let mut steps = Vec::with_capacity(self.trees.len() + 1);
        if self.roots {
            steps.push(Filter::roots());
        }
        steps.extend(self.trees.iter().map(|root| Filter::tree(*root)));
        steps
    }

    pub fn acquire<P: Persistence + ?Sized>(&self, store: &mut P) -> Result<()> {
        for filter in self.steps() {
            let rows = store.lock_rows(&filter)?;
            debug!(
                tree = ?filter.membership,
                roots = filter.roots_only,
                rows = rows.len(),
                "locked rows"
            );
        }
        Ok(())
    }
}
