use std::path::Path;
use std::time::Duration;

use rusqlite::{params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use tracing::{debug, trace};

use nestedset_core::sql::{Placeholder, SqlRenderer, SqlText};
use nestedset_core::{
    Column, Error, Filter, ForestConfig, NewNode, Node, NodeId, Order, Persistence, Result,
    Statement,
};

fn storage_error(e: rusqlite::Error) -> Error {
    match e.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            Error::LockTimeout(e.to_string())
        }
        _ => Error::Storage(e.to_string()),
    }
}

struct RawRow {
    id: i64,
    parent: Option<i64>,
    root: Option<i64>,
    left: i64,
    right: i64,
    level: i64,
    sequence: i64,
}

impl RawRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            parent: row.get(1)?,
            root: row.get(2)?,
            left: row.get(3)?,
            right: row.get(4)?,
            level: row.get(5)?,
            sequence: row.get(6)?,
        })
    }

    fn into_node(self) -> Result<Node> {
        let Some(root) = self.root else {
            return Err(Error::InconsistentState(format!(
                "row #{} is detached from every tree",
                self.id
            )));
        };
        Ok(Node {
            id: NodeId(self.id),
            parent: self.parent.map(NodeId),
            root: NodeId(root),
            left: self.left,
            right: self.right,
            level: self.level,
            sequence: self.sequence,
        })
    }
}

/// SQLite-backed `Persistence` over a single forest table.
pub struct SqliteStore {
    conn: Connection,
    sql: SqlRenderer,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>, config: &ForestConfig) -> Result<Self> {
        let conn = Connection::open(path).map_err(storage_error)?;
        Self::from_connection(conn, config)
    }

    pub fn open_in_memory(config: &ForestConfig) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_error)?;
        Self::from_connection(conn, config)
    }

    /// Wraps an open connection and creates the forest table if needed.
    pub fn from_connection(conn: Connection, config: &ForestConfig) -> Result<Self> {
        config.validate()?;
        if let Some(ms) = config.lock_timeout_ms {
            conn.busy_timeout(Duration::from_millis(ms))
                .map_err(storage_error)?;
        }
        let mut store = Self {
            conn,
            sql: SqlRenderer::new(config.table.clone(), Placeholder::Question),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn ensure_schema(&mut self) -> Result<()> {
        let table = self.sql.table();
        self.conn
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    parent_id INTEGER,
                    root INTEGER,
                    lft INTEGER NOT NULL,
                    rgt INTEGER NOT NULL,
                    lvl INTEGER NOT NULL,
                    sequence INTEGER NOT NULL DEFAULT 0
                );
                CREATE INDEX IF NOT EXISTS idx_{table}_root_lft ON {table}(root, lft);
                CREATE INDEX IF NOT EXISTS idx_{table}_root_rgt ON {table}(root, rgt);
                CREATE INDEX IF NOT EXISTS idx_{table}_lft_sequence ON {table}(lft, sequence);"
            ))
            .map_err(storage_error)?;
        debug!(table, "schema ready");
        Ok(())
    }

    fn query(&self, text: &SqlText) -> Result<Vec<Node>> {
        trace!(sql = %text.sql, params = ?text.params, "query");
        let mut stmt = self.conn.prepare_cached(&text.sql).map_err(storage_error)?;
        let rows = stmt
            .query_map(params_from_iter(text.params.iter()), RawRow::read)
            .map_err(storage_error)?;

        let mut nodes = Vec::new();
        for row in rows {
            nodes.push(row.map_err(storage_error)?.into_node()?);
        }
        Ok(nodes)
    }

    fn run(&mut self, text: &SqlText) -> Result<u64> {
        trace!(sql = %text.sql, params = ?text.params, "execute");
        let affected = self
            .conn
            .execute(&text.sql, params_from_iter(text.params.iter()))
            .map_err(storage_error)?;
        Ok(affected as u64)
    }

    fn require_transaction(&self, what: &str) -> Result<()> {
        if self.conn.is_autocommit() {
            return Err(Error::Storage(format!("{what} outside of a transaction")));
        }
        Ok(())
    }
}

impl Persistence for SqliteStore {
    fn begin(&mut self) -> Result<()> {
        if !self.conn.is_autocommit() {
            return Err(Error::Storage("transaction already open".into()));
        }
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(storage_error)
    }

    fn commit(&mut self) -> Result<()> {
        self.require_transaction("commit")?;
        self.conn.execute_batch("COMMIT").map_err(storage_error)
    }

    fn rollback(&mut self) -> Result<()> {
        self.require_transaction("rollback")?;
        self.conn.execute_batch("ROLLBACK").map_err(storage_error)
    }

    fn lock_rows(&mut self, filter: &Filter) -> Result<Vec<Node>> {
        self.require_transaction("lock")?;
        self.query(&self.sql.select(filter, Order::Lock))
    }

    fn execute(&mut self, stmt: &Statement) -> Result<u64> {
        self.require_transaction("write")?;
        let text = self.sql.statement(stmt);
        self.run(&text)
    }

    fn insert(&mut self, row: &NewNode) -> Result<NodeId> {
        self.require_transaction("insert")?;
        let text = self.sql.insert(row);
        self.run(&text)?;
        Ok(NodeId(self.conn.last_insert_rowid()))
    }

    fn fetch_all(&self, filter: &Filter, order: Order) -> Result<Vec<Node>> {
        self.query(&self.sql.select(filter, order))
    }

    fn fetch_max(&self, column: Column, filter: &Filter) -> Result<Option<i64>> {
        let text = self.sql.max(column, filter);
        trace!(sql = %text.sql, params = ?text.params, "max");
        let max = self
            .conn
            .query_row(&text.sql, params_from_iter(text.params.iter()), |row| {
                row.get::<_, Option<i64>>(0)
            })
            .optional()
            .map_err(storage_error)?;
        Ok(max.flatten())
    }
}
