#![forbid(unsafe_code)]
//! PostgreSQL persistence for `nestedset-core`.
//!
//! Row locks are taken with `SELECT ... FOR UPDATE`, bounded by `SET LOCAL lock_timeout`. Locking
//! the root set also takes a transaction-scoped advisory lock on the table so that sessions
//! creating the first roots serialize even while no root row exists yet.

mod schema;
mod store;

pub use schema::{drop_table_for_tests, ensure_schema};
pub use store::PgStore;
