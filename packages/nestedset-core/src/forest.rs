use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, debug_span, info, warn};

use crate::config::ForestConfig;
use crate::error::{Error, Result};
use crate::ids::NodeId;
use crate::lock::LockPlan;
use crate::node::{Membership, NewNode, Node};
use crate::query::Query;
use crate::statement::{Bound, Column, Filter, Order, Span, Statement};
use crate::traits::Persistence;
use crate::validate::{validate_roots, validate_tree};

/// Where a root tree lands in the forest order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RootPosition {
    Last,
    Before(NodeId),
    After(NodeId),
}

/// Destination of a relocated node, relative to a target node.
///
/// `Before`/`After` a root target place the moving node at root level next to that root.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Placement {
    Before(NodeId),
    After(NodeId),
    FirstChildOf(NodeId),
    LastChildOf(NodeId),
    Root(RootPosition),
}

impl Placement {
    pub fn target(&self) -> Option<NodeId> {
        match *self {
            Placement::Before(t)
            | Placement::After(t)
            | Placement::FirstChildOf(t)
            | Placement::LastChildOf(t)
            | Placement::Root(RootPosition::Before(t))
            | Placement::Root(RootPosition::After(t)) => Some(t),
            Placement::Root(RootPosition::Last) => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DeleteMode {
    /// Remove the node with its whole subtree and close the gap.
    #[default]
    Cascade,
    /// Remove only the node's own row, then close the gap as `Cascade` would. Descendants keep
    /// their stale numbering and the caller owns them.
    SkipSubtree,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Slot {
    Before,
    After,
    FirstChild,
    LastChild,
}

#[derive(Clone, Debug)]
enum Destination {
    /// Root level, optionally next to an anchor root; `None` means last.
    Roots(Option<(Slot, Node)>),
    /// Inside the tree of the target node.
    Tree(Slot, Node),
}

fn resolve(placement: Placement, target: Option<Node>) -> Result<Destination> {
    let need = |t: Option<Node>| {
        t.ok_or_else(|| Error::InvalidOperation("placement requires a target".into()))
    };
    let root_anchor = |slot: Slot, t: Node| {
        if !t.is_root() {
            return Err(Error::InvalidOperation(format!("{} is not a root", t.id)));
        }
        Ok(Destination::Roots(Some((slot, t))))
    };
    match placement {
        Placement::Root(RootPosition::Last) => Ok(Destination::Roots(None)),
        Placement::Root(RootPosition::Before(_)) => root_anchor(Slot::Before, need(target)?),
        Placement::Root(RootPosition::After(_)) => root_anchor(Slot::After, need(target)?),
        Placement::Before(_) | Placement::After(_) => {
            let slot = if matches!(placement, Placement::Before(_)) {
                Slot::Before
            } else {
                Slot::After
            };
            let t = need(target)?;
            if t.is_root() {
                Ok(Destination::Roots(Some((slot, t))))
            } else {
                Ok(Destination::Tree(slot, t))
            }
        }
        Placement::FirstChildOf(_) => Ok(Destination::Tree(Slot::FirstChild, need(target)?)),
        Placement::LastChildOf(_) => Ok(Destination::Tree(Slot::LastChild, need(target)?)),
    }
}

fn relocation_plan(node: &Node, destination: &Destination) -> LockPlan {
    let mut plan = LockPlan::new().tree(node.root);
    if node.is_root() {
        plan = plan.roots();
    }
    match destination {
        Destination::Roots(_) => plan.roots(),
        Destination::Tree(_, target) => plan.tree(target.root),
    }
}

/// Interval position and depth a subtree takes when placed at `slot` relative to `target`.
fn insertion_point(slot: Slot, target: &Node) -> (i64, i64, Option<NodeId>) {
    match slot {
        Slot::Before => (target.left, target.level, target.parent),
        Slot::After => (target.right + 1, target.level, target.parent),
        Slot::FirstChild => (target.left + 1, target.level + 1, Some(target.id)),
        Slot::LastChild => (target.right, target.level + 1, Some(target.id)),
    }
}

/// Forest manager: every structural change runs as one transaction against `P`.
pub struct Forest<P: Persistence> {
    store: P,
    config: ForestConfig,
}

impl<P: Persistence> Forest<P> {
    pub fn new(store: P) -> Self {
        Self {
            store,
            config: ForestConfig::default(),
        }
    }

    pub fn with_config(store: P, config: ForestConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    pub fn store(&self) -> &P {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut P {
        &mut self.store
    }

    pub fn into_store(self) -> P {
        self.store
    }

    /// Read-only traversal over committed rows.
    pub fn query(&self) -> Query<'_, P> {
        Query::new(&self.store)
    }

    pub fn get(&self, id: NodeId) -> Result<Node> {
        self.query().get(id)
    }

    /// Inserts a new root (`parent = None`) or a last child of `parent`.
    pub fn insert(&mut self, parent: Option<NodeId>) -> Result<Node> {
        match parent {
            Some(parent) => self.insert_child(parent),
            None => self.insert_root(),
        }
    }

    /// Creates a single-node tree at the end of the forest order.
    pub fn insert_root(&mut self) -> Result<Node> {
        self.transact("insert_root", |m| {
            m.lock(LockPlan::new().roots())?;
            let sequence = m.max_root_sequence()? + 1;
            let row = NewNode::root(sequence);
            let id = m.store.insert(&row)?;
            // The row only learns its tree once it has an id.
            let attached = m.execute(Statement::Rebase {
                filter: Filter::id(id),
                tree: Membership::Tree(id),
                offset: 0,
                depth: 0,
            })?;
            if attached != 1 {
                return Err(Error::InconsistentState(format!(
                    "new root {id} attached {attached} rows"
                )));
            }
            m.touched.insert(id);
            debug!(node = %id, sequence, "inserted root");
            Ok(row.into_node(id))
        })
    }

    /// Appends a leaf as the last child of `parent`.
    pub fn insert_child(&mut self, parent: NodeId) -> Result<Node> {
        self.transact("insert_child", |m| {
            let seen = m.load(parent)?;
            m.lock(LockPlan::new().tree(seen.root))?;
            let parent = m.load(parent)?;
            m.confirm(&LockPlan::new().tree(parent.root))?;

            m.shift(parent.root, Span::at_least(parent.right), 2)?;
            let row = NewNode::child_of(&parent, parent.right);
            let id = m.store.insert(&row)?;
            debug!(node = %id, parent = %parent.id, tree = %parent.root, "inserted child");
            Ok(row.into_node(id))
        })
    }

    /// Moves `id` (with its subtree) to `placement`. Returns the node as stored afterwards.
    pub fn relocate(&mut self, id: NodeId, placement: Placement) -> Result<Node> {
        if placement.target() == Some(id) {
            return Err(Error::InvalidOperation(format!(
                "cannot place {id} relative to itself"
            )));
        }
        self.transact("relocate", |m| {
            let node = m.load(id)?;
            let target = placement.target().map(|t| m.load(t)).transpose()?;
            m.lock(relocation_plan(&node, &resolve(placement, target)?))?;

            let node = m.load(id)?;
            let target = placement.target().map(|t| m.load(t)).transpose()?;
            let destination = resolve(placement, target)?;
            m.confirm(&relocation_plan(&node, &destination))?;

            match destination {
                Destination::Roots(anchor) => {
                    if node.is_root() {
                        m.reorder_root(&node, anchor)?;
                    } else {
                        m.promote(&node, anchor)?;
                    }
                }
                Destination::Tree(slot, target) => {
                    if target.is_descendant_of(&node) {
                        return Err(Error::InvalidOperation(format!(
                            "cannot move {} into its own subtree",
                            node.id
                        )));
                    }
                    if node.is_root() {
                        m.close_root_gap(node.sequence)?;
                        m.move_across(&node, slot, &target)?;
                    } else if node.root == target.root {
                        m.move_within(&node, slot, &target)?;
                    } else {
                        m.move_across(&node, slot, &target)?;
                    }
                }
            }
            m.load(id)
        })
    }

    /// Deletes `id` and closes the gap it leaves. In `Cascade` mode the subtree goes too.
    pub fn delete(&mut self, id: NodeId, mode: DeleteMode) -> Result<()> {
        self.transact("delete", |m| {
            let plan_for = |n: &Node| {
                let plan = LockPlan::new().tree(n.root);
                if n.is_root() {
                    plan.roots()
                } else {
                    plan
                }
            };
            let seen = m.load(id)?;
            m.lock(plan_for(&seen))?;
            let node = m.load(id)?;
            m.confirm(&plan_for(&node))?;

            let skip = mode == DeleteMode::SkipSubtree;
            if skip && !node.is_leaf() {
                // Descendants stay behind for the caller to reattach or remove.
                m.verify = false;
            }

            if !skip && !node.is_leaf() {
                let worklist: Vec<NodeId> = m
                    .store
                    .fetch_all(
                        &Filter::tree(node.root)
                            .with(Column::Left, Span::above(node.left))
                            .with(Column::Right, Span::below(node.right)),
                        Order::Left,
                    )?
                    .into_iter()
                    .map(|n| n.id)
                    .collect();
                let expected = (node.size() / 2 - 1) as usize;
                if worklist.len() != expected {
                    return Err(Error::InconsistentState(format!(
                        "{id} spans {expected} descendants but {} were found",
                        worklist.len()
                    )));
                }
                for batch in worklist.chunks(m.config.delete_batch) {
                    m.delete_rows(batch)?;
                }
            }
            m.delete_rows(&[node.id])?;

            if node.is_root() {
                m.close_root_gap(node.sequence)?;
            } else {
                m.shift(node.root, Span::at_least(node.right), -node.size())?;
            }
            debug!(node = %id, size = node.size(), skip, "deleted");
            Ok(())
        })
    }

    /// Checks every invariant over the whole committed forest.
    pub fn validate(&self) -> Result<()> {
        let roots = self.store.fetch_all(&Filter::roots(), Order::Sequence)?;
        validate_roots(&roots)?;

        let mut trees: BTreeMap<NodeId, Vec<Node>> = BTreeMap::new();
        for node in self.store.fetch_all(&Filter::all(), Order::Left)? {
            trees.entry(node.root).or_default().push(node);
        }
        if trees.len() != roots.len() {
            return Err(Error::InconsistentState(format!(
                "{} trees but {} roots",
                trees.len(),
                roots.len()
            )));
        }
        for (root, nodes) in &trees {
            validate_tree(*root, nodes)?;
        }
        Ok(())
    }

    fn transact<T>(
        &mut self,
        op: &'static str,
        body: impl FnOnce(&mut Mutation<'_, P>) -> Result<T>,
    ) -> Result<T> {
        let span = debug_span!("forest", op);
        let _entered = span.enter();

        self.store.begin()?;
        let outcome = {
            let mut m = Mutation::new(&mut self.store, &self.config);
            body(&mut m).and_then(|value| m.finish().map(|()| value))
        };
        let outcome = outcome.and_then(|value| self.store.commit().map(|()| value));
        match outcome {
            Ok(value) => {
                info!(op, "committed");
                Ok(value)
            }
            Err(err) => {
                warn!(op, error = %err, "rolling back");
                if let Err(rollback) = self.store.rollback() {
                    warn!(op, error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

/// State of one open structural transaction.
struct Mutation<'a, P: Persistence> {
    store: &'a mut P,
    config: &'a ForestConfig,
    locked: LockPlan,
    touched: BTreeSet<NodeId>,
    /// Interval of the subtree currently parked outside every tree.
    detached: Option<(i64, i64)>,
    verify: bool,
}

impl<'a, P: Persistence> Mutation<'a, P> {
    fn new(store: &'a mut P, config: &'a ForestConfig) -> Self {
        Self {
            store,
            config,
            locked: LockPlan::new(),
            touched: BTreeSet::new(),
            detached: None,
            verify: config.verify_mutations,
        }
    }

    fn load(&self, id: NodeId) -> Result<Node> {
        self.store.fetch_one(id)?.ok_or(Error::NotFound(id))
    }

    fn lock(&mut self, plan: LockPlan) -> Result<()> {
        plan.acquire(&mut *self.store)?;
        self.touched.extend(plan.trees());
        self.locked = plan;
        Ok(())
    }

    /// Fails when rows read after locking need locks that were not taken.
    fn confirm(&self, needed: &LockPlan) -> Result<()> {
        let missing: Vec<NodeId> = needed.trees().filter(|t| !self.locked.covers(*t)).collect();
        if !missing.is_empty() || (needed.locks_roots() && !self.locked.locks_roots()) {
            return Err(Error::Conflict(format!(
                "trees changed while waiting for locks (unlocked: {missing:?})"
            )));
        }
        Ok(())
    }

    fn execute(&mut self, stmt: Statement) -> Result<u64> {
        self.store.execute(&stmt)
    }

    /// Adds `delta` to every `left` and then every `right` of `tree` that falls in `span`.
    fn shift(&mut self, tree: NodeId, span: Span, delta: i64) -> Result<()> {
        if delta == 0 {
            return Ok(());
        }
        for column in [Column::Left, Column::Right] {
            let rows = self.execute(Statement::Shift {
                column,
                delta,
                filter: Filter::tree(tree).with(column, span),
            })?;
            debug!(tree = %tree, ?column, ?span, delta, rows, "shifted");
        }
        Ok(())
    }

    fn shift_roots(&mut self, span: Span, delta: i64) -> Result<()> {
        let rows = self.execute(Statement::Shift {
            column: Column::Sequence,
            delta,
            filter: Filter::roots().with(Column::Sequence, span),
        })?;
        debug!(?span, delta, rows, "shifted root sequence");
        Ok(())
    }

    fn close_root_gap(&mut self, sequence: i64) -> Result<()> {
        self.shift_roots(Span::above(sequence), -1)
    }

    fn max_root_sequence(&self) -> Result<i64> {
        Ok(self
            .store
            .fetch_max(Column::Sequence, &Filter::roots())?
            .unwrap_or(0))
    }

    /// Reassigns the rows of `node`'s subtree found by `filter` and checks none went missing.
    fn rebase(
        &mut self,
        node: &Node,
        filter: Filter,
        tree: Membership,
        offset: i64,
        depth: i64,
    ) -> Result<()> {
        let rows = self.execute(Statement::Rebase {
            filter,
            tree,
            offset,
            depth,
        })?;
        let expected = (node.size() / 2) as u64;
        if rows != expected {
            return Err(Error::InconsistentState(format!(
                "subtree of {} moved {rows} rows, expected {expected}",
                node.id
            )));
        }
        debug!(node = %node.id, ?tree, offset, depth, rows, "rebased subtree");
        Ok(())
    }

    fn link(&mut self, id: NodeId, parent: Option<NodeId>, sequence: i64) -> Result<()> {
        if self.execute(Statement::Link {
            id,
            parent,
            sequence,
        })? != 1
        {
            return Err(Error::InconsistentState(format!("{id} vanished while relinking")));
        }
        Ok(())
    }

    fn delete_rows(&mut self, ids: &[NodeId]) -> Result<()> {
        let rows = self.execute(Statement::Delete { ids: ids.to_vec() })?;
        if rows != ids.len() as u64 {
            return Err(Error::InconsistentState(format!(
                "deleted {rows} of {} rows",
                ids.len()
            )));
        }
        Ok(())
    }

    /// Parks the subtree outside every tree so shifting its tree leaves it alone.
    fn detach(&mut self, node: &Node) -> Result<()> {
        self.rebase(
            node,
            Filter::tree(node.root).within(node.left, node.right),
            Membership::Detached,
            0,
            0,
        )?;
        self.detached = Some((node.left, node.right));
        Ok(())
    }

    fn reattach(&mut self, node: &Node, tree: NodeId, offset: i64, depth: i64) -> Result<()> {
        let Some((left, right)) = self.detached.take() else {
            return Err(Error::InconsistentState("no detached subtree".into()));
        };
        self.rebase(
            node,
            Filter::detached().within(left, right),
            Membership::Tree(tree),
            offset,
            depth,
        )
    }

    fn promote(&mut self, node: &Node, anchor: Option<(Slot, Node)>) -> Result<()> {
        let size = node.size();
        self.rebase(
            node,
            Filter::tree(node.root).within(node.left, node.right),
            Membership::Tree(node.id),
            1 - node.left,
            1 - node.level,
        )?;
        self.shift(node.root, Span::at_least(node.right), -size)?;

        let sequence = match anchor {
            None => self.max_root_sequence()? + 1,
            Some((slot, anchor)) => {
                let position = if slot == Slot::Before {
                    anchor.sequence
                } else {
                    anchor.sequence + 1
                };
                self.shift_roots(Span::at_least(position), 1)?;
                position
            }
        };
        self.link(node.id, None, sequence)?;
        self.touched.insert(node.id);
        debug!(node = %node.id, from = %node.root, sequence, "promoted to root");
        Ok(())
    }

    fn reorder_root(&mut self, node: &Node, anchor: Option<(Slot, Node)>) -> Result<()> {
        let current = node.sequence;
        let wanted = match anchor {
            None => self.max_root_sequence()?,
            Some((Slot::Before, anchor)) if current > anchor.sequence => anchor.sequence,
            Some((Slot::Before, anchor)) => anchor.sequence - 1,
            Some((_, anchor)) if current > anchor.sequence => anchor.sequence + 1,
            Some((_, anchor)) => anchor.sequence,
        };
        if wanted > current {
            self.shift_roots(Span::above(current).with_upper(Bound::Inclusive(wanted)), -1)?;
        } else if wanted < current {
            self.shift_roots(Span::between(wanted, current), 1)?;
        }
        self.link(node.id, None, wanted)?;
        debug!(node = %node.id, from = current, to = wanted, "reordered root");
        Ok(())
    }

    fn move_within(&mut self, node: &Node, slot: Slot, target: &Node) -> Result<()> {
        let (position, level, parent) = insertion_point(slot, target);
        let size = node.size();

        self.detach(node)?;
        let offset = if node.right < position {
            // Rows between the old and new place slide left over the vacated interval.
            self.shift(
                node.root,
                Span::above(node.right).with_upper(Bound::Exclusive(position)),
                -size,
            )?;
            position - node.right - 1
        } else if node.left > position {
            self.shift(node.root, Span::between(position, node.left), size)?;
            position - node.left
        } else {
            0
        };
        self.reattach(node, node.root, offset, level - node.level)?;
        self.link(node.id, parent, 0)?;
        debug!(node = %node.id, tree = %node.root, offset, "moved within tree");
        Ok(())
    }

    fn move_across(&mut self, node: &Node, slot: Slot, target: &Node) -> Result<()> {
        let (position, level, parent) = insertion_point(slot, target);
        let size = node.size();

        self.shift(target.root, Span::at_least(position), size)?;
        self.rebase(
            node,
            Filter::tree(node.root).within(node.left, node.right),
            Membership::Tree(target.root),
            position - node.left,
            level - node.level,
        )?;
        if !node.is_root() {
            self.shift(node.root, Span::at_least(node.right), -size)?;
        }
        self.link(node.id, parent, 0)?;
        debug!(node = %node.id, from = %node.root, to = %target.root, "moved across trees");
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.detached.is_some() {
            return Err(Error::InconsistentState(
                "subtree left detached at commit".into(),
            ));
        }
        if !self.verify {
            return Ok(());
        }
        for tree in &self.touched {
            let nodes = self
                .store
                .fetch_all(&Filter::tree(*tree), Order::Left)?;
            if !nodes.is_empty() {
                validate_tree(*tree, &nodes)?;
            }
        }
        if self.locked.locks_roots() {
            validate_roots(&self.store.fetch_all(&Filter::roots(), Order::Sequence)?)?;
        }
        Ok(())
    }
}
