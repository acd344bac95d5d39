#![forbid(unsafe_code)]
//! Core primitives for a nested-set forest stored in one relational table.
//! This crate stays independent of concrete database drivers so it can run against SQLite,
//! PostgreSQL, or any host that can satisfy the `Persistence` trait defined here.

pub mod config;
pub mod error;
pub mod forest;
pub mod ids;
pub mod lock;
pub mod node;
pub mod query;
pub mod sql;
pub mod statement;
pub mod traits;
pub mod validate;

pub use config::ForestConfig;
pub use error::{Error, Result};
pub use forest::{DeleteMode, Forest, Placement, RootPosition};
pub use ids::NodeId;
pub use lock::LockPlan;
pub use node::{Membership, NewNode, Node};
pub use query::Query;
pub use statement::{Bound, Column, Filter, Order, Span, Statement};
pub use traits::{LockEvent, MemoryStore, Persistence};
pub use validate::{validate_roots, validate_tree};
