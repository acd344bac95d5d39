use std::cell::RefCell;
use std::rc::Rc;

use postgres::error::SqlState;
use postgres::types::ToSql;
use postgres::{Client, Row};
use tracing::{debug, trace};

use nestedset_core::sql::{Placeholder, SqlRenderer, SqlText};
use nestedset_core::{
    Column, Error, Filter, ForestConfig, NewNode, Node, NodeId, Order, Persistence, Result,
    Statement,
};

pub(crate) fn storage_debug(e: postgres::Error) -> Error {
    let msg = format!("{e:?}");
    match e.code() {
        Some(code) if *code == SqlState::LOCK_NOT_AVAILABLE => Error::LockTimeout(msg),
        Some(code)
            if *code == SqlState::T_R_DEADLOCK_DETECTED
                || *code == SqlState::T_R_SERIALIZATION_FAILURE =>
        {
            Error::Conflict(msg)
        }
        _ => Error::Storage(msg),
    }
}

fn bind(params: &[i64]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

fn row_to_node(row: &Row) -> Result<Node> {
    let id: i64 = row.try_get(0).map_err(storage_debug)?;
    let root: Option<i64> = row.try_get(2).map_err(storage_debug)?;
    let Some(root) = root else {
        return Err(Error::InconsistentState(format!(
            "row #{id} is detached from every tree"
        )));
    };
    Ok(Node {
        id: NodeId(id),
        parent: row
            .try_get::<_, Option<i64>>(1)
            .map_err(storage_debug)?
            .map(NodeId),
        root: NodeId(root),
        left: row.try_get(3).map_err(storage_debug)?,
        right: row.try_get(4).map_err(storage_debug)?,
        level: row.try_get(5).map_err(storage_debug)?,
        sequence: row.try_get(6).map_err(storage_debug)?,
    })
}

/// PostgreSQL-backed `Persistence` sharing one client with the caller.
pub struct PgStore {
    client: Rc<RefCell<Client>>,
    sql: SqlRenderer,
    lock_timeout_ms: Option<u64>,
    in_transaction: bool,
}

impl PgStore {
    /// Expects the table to exist already (see `ensure_schema`).
    pub fn new(client: Rc<RefCell<Client>>, config: &ForestConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            client,
            sql: SqlRenderer::new(config.table.clone(), Placeholder::Dollar),
            lock_timeout_ms: config.lock_timeout_ms,
            in_transaction: false,
        })
    }

    pub fn client(&self) -> &Rc<RefCell<Client>> {
        &self.client
    }

    fn query(&self, sql: &str, params: &[i64]) -> Result<Vec<Node>> {
        trace!(sql, ?params, "query");
        let mut c = self.client.borrow_mut();
        let rows = c.query(sql, &bind(params)).map_err(storage_debug)?;
        rows.iter().map(row_to_node).collect()
    }

    fn run(&mut self, text: &SqlText) -> Result<u64> {
        trace!(sql = %text.sql, params = ?text.params, "execute");
        let mut c = self.client.borrow_mut();
        c.execute(text.sql.as_str(), &bind(&text.params))
            .map_err(storage_debug)
    }

    fn require_transaction(&self, what: &str) -> Result<()> {
        if !self.in_transaction {
            return Err(Error::Storage(format!("{what} outside of a transaction")));
        }
        Ok(())
    }
}

impl Persistence for PgStore {
    fn begin(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(Error::Storage("transaction already open".into()));
        }
        let mut c = self.client.borrow_mut();
        c.batch_execute("BEGIN").map_err(storage_debug)?;
        if let Some(ms) = self.lock_timeout_ms {
            if let Err(e) = c.batch_execute(&format!("SET LOCAL lock_timeout = {ms}")) {
                let _ = c.batch_execute("ROLLBACK");
                return Err(storage_debug(e));
            }
        }
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.require_transaction("commit")?;
        // A failed COMMIT still ends the transaction on the server.
        self.in_transaction = false;
        self.client
            .borrow_mut()
            .batch_execute("COMMIT")
            .map_err(storage_debug)
    }

    fn rollback(&mut self) -> Result<()> {
        self.require_transaction("rollback")?;
        self.in_transaction = false;
        self.client
            .borrow_mut()
            .batch_execute("ROLLBACK")
            .map_err(storage_debug)
    }

    fn lock_rows(&mut self, filter: &Filter) -> Result<Vec<Node>> {
        self.require_transaction("lock")?;
        if filter.roots_only {
            let table = self.sql.table();
            self.client
                .borrow_mut()
                .query_one("SELECT pg_advisory_xact_lock(hashtext($1))", &[&table])
                .map_err(storage_debug)?;
            debug!(table, "holding root set advisory lock");
        }
        let text = self.sql.select(filter, Order::Lock);
        self.query(&format!("{} FOR UPDATE", text.sql), &text.params)
    }

    fn execute(&mut self, stmt: &Statement) -> Result<u64> {
        self.require_transaction("write")?;
        let text = self.sql.statement(stmt);
        self.run(&text)
    }

    fn insert(&mut self, row: &NewNode) -> Result<NodeId> {
        self.require_transaction("insert")?;
        let text = self.sql.insert(row);
        let sql = format!("{} RETURNING id", text.sql);
        trace!(sql, params = ?text.params, "insert");
        let row = self
            .client
            .borrow_mut()
            .query_one(sql.as_str(), &bind(&text.params))
            .map_err(storage_debug)?;
        Ok(NodeId(row.try_get(0).map_err(storage_debug)?))
    }

    fn fetch_all(&self, filter: &Filter, order: Order) -> Result<Vec<Node>> {
        let text = self.sql.select(filter, order);
        self.query(&text.sql, &text.params)
    }

    fn fetch_max(&self, column: Column, filter: &Filter) -> Result<Option<i64>> {
        let text = self.sql.max(column, filter);
        trace!(sql = %text.sql, params = ?text.params, "max");
        let row = self
            .client
            .borrow_mut()
            .query_one(text.sql.as_str(), &bind(&text.params))
            .map_err(storage_debug)?;
        row.try_get(0).map_err(storage_debug)
    }
}
