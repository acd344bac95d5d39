#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sql::is_valid_identifier;

/// Tunables shared by the forest manager and the relational adapters.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct ForestConfig {
    /// Table holding the forest rows.
    pub table: String,
    /// Upper bound on a single lock wait, enforced by the adapter. `None` keeps the driver default.
    pub lock_timeout_ms: Option<u64>,
    /// Re-check the invariants of every touched tree before committing a mutation.
    pub verify_mutations: bool,
    /// Maximum number of ids per `Delete` statement during cascading deletes.
    pub delete_batch: usize,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            table: "nested_set".to_string(),
            lock_timeout_ms: None,
            verify_mutations: false,
            delete_batch: 256,
        }
    }
}

impl ForestConfig {
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !is_valid_identifier(&self.table) {
            return Err(Error::InvalidOperation(format!(
                "invalid table name {:?}",
                self.table
            )));
        }
        if self.delete_batch == 0 {
            return Err(Error::InvalidOperation("delete_batch must be positive".into()));
        }
        Ok(())
    }

    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ForestConfig =
            serde_json::from_str(json).map_err(|e| Error::InvalidOperation(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
