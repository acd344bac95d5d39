use thiserror::Error;

use crate::ids::NodeId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("node not found: {0}")]
    NotFound(NodeId),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("inconsistent state: {0}")]
    InconsistentState(String),
    #[error("lock conflict: {0}")]
    Conflict(String),
    #[error("lock timeout: {0}")]
    LockTimeout(String),
}

impl Error {
    /// Precondition failures are detected before any row is written.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::InvalidOperation(_))
    }
}
