#![forbid(unsafe_code)]
//! SQLite persistence for `nestedset-core`.
//!
//! Mutations run in `BEGIN IMMEDIATE` transactions: the database write lock is taken up front
//! and covers every row lock the forest manager asks for, so `lock_rows` is a plain read here.

mod storage;

pub use storage::SqliteStore;
