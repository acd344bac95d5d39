use postgres::Client;

use nestedset_core::sql::is_valid_identifier;
use nestedset_core::{Error, Result};

use crate::store::storage_debug;

const SCHEMA_LOCK_KEY: i64 = 0x6e65737465647374; // "nestedst"

fn checked(table: &str) -> Result<&str> {
    if !is_valid_identifier(table) {
        return Err(Error::InvalidOperation(format!("invalid table name {table:?}")));
    }
    Ok(table)
}

/// Creates the forest table and its indexes if missing.
pub fn ensure_schema(client: &mut Client, table: &str) -> Result<()> {
    let table = checked(table)?;
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {table} (
           id BIGSERIAL PRIMARY KEY,
           parent_id BIGINT,
           root BIGINT,
           lft BIGINT NOT NULL,
           rgt BIGINT NOT NULL,
           lvl BIGINT NOT NULL,
           sequence BIGINT NOT NULL DEFAULT 0
         );
         CREATE INDEX IF NOT EXISTS idx_{table}_root_lft ON {table} (root, lft);
         CREATE INDEX IF NOT EXISTS idx_{table}_root_rgt ON {table} (root, rgt);
         CREATE INDEX IF NOT EXISTS idx_{table}_lft_sequence ON {table} (lft, sequence);"
    );

    // Concurrent `CREATE ... IF NOT EXISTS` can still collide in the catalog.
    client
        .query_one("SELECT pg_advisory_lock($1)", &[&SCHEMA_LOCK_KEY])
        .map_err(storage_debug)?;

    let res = client.batch_execute(&sql).map_err(storage_debug);

    // Session locks are also released when the connection closes.
    let _ = client.query_one("SELECT pg_advisory_unlock($1)", &[&SCHEMA_LOCK_KEY]);

    res
}

pub fn drop_table_for_tests(client: &mut Client, table: &str) -> Result<()> {
    let table = checked(table)?;
    client
        .batch_execute(&format!("DROP TABLE IF EXISTS {table}"))
        .map_err(storage_debug)
}
