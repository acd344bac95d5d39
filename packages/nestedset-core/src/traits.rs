use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::ids::NodeId;
use crate::node::{Membership, NewNode, Node};
use crate::statement::{Column, Filter, Order, Statement};

/// Relational persistence boundary of the forest.
///
/// Implementations run every call inside the transaction opened by `begin` on the same
/// connection. `lock_rows` must hold an exclusive lock on every returned row until `commit` or
/// `rollback`, and must lock rows in the requested `Order::Lock` order.
pub trait Persistence {
    fn begin(&mut self) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;

    /// Locking read (`SELECT ... FOR UPDATE`), rows returned in `Order::Lock`.
    fn lock_rows(&mut self, filter: &Filter) -> Result<Vec<Node>>;

    /// Applies one statement, returning the number of affected rows.
    fn execute(&mut self, stmt: &Statement) -> Result<u64>;

    /// Persists a new row and returns its assigned id.
    fn insert(&mut self, row: &NewNode) -> Result<NodeId>;

    fn fetch_all(&self, filter: &Filter, order: Order) -> Result<Vec<Node>>;

    fn fetch_max(&self, column: Column, filter: &Filter) -> Result<Option<i64>>;

    fn fetch_one(&self, id: NodeId) -> Result<Option<Node>> {
        Ok(self.fetch_all(&Filter::id(id), Order::Left)?.into_iter().next())
    }
}

/// One `lock_rows` call, as recorded by `MemoryStore`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LockEvent {
    pub filter: Filter,
    pub rows: Vec<NodeId>,
}

#[derive(Clone, Debug)]
struct MemoryRow {
    parent: Option<NodeId>,
    root: Membership,
    /// `left, right, level, sequence`, in `Column::ALL` order.
    values: [i64; 4],
}

impl MemoryRow {
    fn to_node(&self, id: NodeId) -> Result<Node> {
        let Some(root) = self.root.tree() else {
            return Err(Error::InconsistentState(format!(
                "row {id} is detached from every tree"
            )));
        };
        Ok(Node {
            id,
            parent: self.parent,
            root,
            left: self.values[0],
            right: self.values[1],
            level: self.values[2],
            sequence: self.values[3],
        })
    }
}

fn column_index(column: Column) -> usize {
    match column {
        Column::Left => 0,
        Column::Right => 1,
        Column::Level => 2,
        Column::Sequence => 3,
    }
}

/// In-memory table for tests, benches and embedding. Transactions are snapshot based and
/// cannot be nested; locks are recorded rather than enforced.
#[derive(Default)]
pub struct MemoryStore {
    rows: BTreeMap<NodeId, MemoryRow>,
    next_id: i64,
    snapshot: Option<(BTreeMap<NodeId, MemoryRow>, i64)>,
    journal: Vec<LockEvent>,
    fail_at: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `n`-th `execute` from now fails with a storage error (1 = the next one).
    pub fn fail_after(&mut self, n: usize) {
        self.fail_at = Some(n.max(1));
    }

    pub fn lock_journal(&self) -> &[LockEvent] {
        &self.journal
    }

    pub fn clear_lock_journal(&mut self) {
        self.journal.clear();
    }

    pub fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn require_transaction(&self, what: &str) -> Result<()> {
        if self.snapshot.is_none() {
            return Err(Error::Storage(format!("{what} outside of a transaction")));
        }
        Ok(())
    }

    fn select<'a>(
        &'a self,
        filter: &'a Filter,
    ) -> impl Iterator<Item = (&'a NodeId, &'a MemoryRow)> + 'a {
        self.rows
            .iter()
            .filter(move |(id, row)| filter.matches(**id, row.root, row.values))
    }

    fn collect_sorted(&self, filter: &Filter, order: Order) -> Result<Vec<Node>> {
        let mut nodes = self
            .select(filter)
            .map(|(id, row)| row.to_node(*id))
            .collect::<Result<Vec<_>>>()?;
        match order {
            Order::Left => nodes.sort_by_key(|n| (n.left, n.id)),
            Order::Sequence => nodes.sort_by_key(|n| (n.sequence, n.id)),
            Order::Lock => nodes.sort_by_key(|n| (n.root, n.left, n.id)),
        }
        Ok(nodes)
    }

    fn take_injected_failure(&mut self) -> Result<()> {
        match self.fail_at {
            Some(n) if n <= 1 => {
                self.fail_at = None;
                Err(Error::Storage("injected failure".into()))
            }
            Some(n) => {
                self.fail_at = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Persistence for MemoryStore {
    fn begin(&mut self) -> Result<()> {
        if self.snapshot.is_some() {
            return Err(Error::Storage("transaction already open".into()));
        }
        self.snapshot = Some((self.rows.clone(), self.next_id));
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.require_transaction("commit")?;
        self.snapshot = None;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        let Some((rows, next_id)) = self.snapshot.take() else {
            return Err(Error::Storage("rollback outside of a transaction".into()));
        };
        self.rows = rows;
        self.next_id = next_id;
        Ok(())
    }

    fn lock_rows(&mut self, filter: &Filter) -> Result<Vec<Node>> {
        self.require_transaction("lock")?;
        let nodes = self.collect_sorted(filter, Order::Lock)?;
        self.journal.push(LockEvent {
            filter: filter.clone(),
            rows: nodes.iter().map(|n| n.id).collect(),
        });
        Ok(nodes)
    }

    fn execute(&mut self, stmt: &Statement) -> Result<u64> {
        self.require_transaction("write")?;
        self.take_injected_failure()?;
        let mut affected = 0u64;
        match stmt {
            Statement::Shift {
                column,
                delta,
                filter,
            } => {
                let idx = column_index(*column);
                for (id, row) in self.rows.iter_mut() {
                    if filter.matches(*id, row.root, row.values) {
                        row.values[idx] += delta;
                        affected += 1;
                    }
                }
            }
            Statement::Rebase {
                filter,
                tree,
                offset,
                depth,
            } => {
                for (id, row) in self.rows.iter_mut() {
                    if filter.matches(*id, row.root, row.values) {
                        row.root = *tree;
                        row.values[0] += offset;
                        row.values[1] += offset;
                        row.values[2] += depth;
                        affected += 1;
                    }
                }
            }
            Statement::Link {
                id,
                parent,
                sequence,
            } => {
                if let Some(row) = self.rows.get_mut(id) {
                    row.parent = *parent;
                    row.values[3] = *sequence;
                    affected = 1;
                }
            }
            Statement::Delete { ids } => {
                for id in ids {
                    if self.rows.remove(id).is_some() {
                        affected += 1;
                    }
                }
            }
        }
        Ok(affected)
    }

    fn insert(&mut self, row: &NewNode) -> Result<NodeId> {
        self.require_transaction("insert")?;
        self.next_id += 1;
        let id = NodeId(self.next_id);
        self.rows.insert(
            id,
            MemoryRow {
                parent: row.parent,
                root: row.root,
                values: [row.left, row.right, row.level, row.sequence],
            },
        );
        Ok(id)
    }

    fn fetch_all(&self, filter: &Filter, order: Order) -> Result<Vec<Node>> {
        self.collect_sorted(filter, order)
    }

    fn fetch_max(&self, column: Column, filter: &Filter) -> Result<Option<i64>> {
        let idx = column_index(column);
        Ok(self.select(filter).map(|(_, row)| row.values[idx]).max())
    }
}
