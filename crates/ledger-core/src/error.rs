//! Error types for ledger operations.
//!
//! Validation failures are not errors: `validate` reports them as booleans
//! (or `BlockFault` diagnostics) and the chain is left as-is.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("no ledger for user {0}")]
    NotFound(String),

    #[error("task {task_id} not found in ledger for user {user_id}")]
    TaskNotFound { user_id: String, task_id: String },

    #[error("ledger for user {0} already exists")]
    AlreadyExists(String),

    #[error("task {task_id} already exists in ledger for user {user_id}")]
    TaskExists { user_id: String, task_id: String },

    /// The stored tip moved between read and write.
    #[error("concurrent append for user {user_id}: expected tip {expected}, found {found}")]
    ConcurrencyConflict {
        user_id: String,
        expected: String,
        found: String,
    },

    #[error("mining block {index} timed out after {elapsed_ms} ms")]
    MiningTimeout { index: u64, elapsed_ms: u64 },

    #[error("mining block {index} was cancelled")]
    MiningCancelled { index: u64 },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
