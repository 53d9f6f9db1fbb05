//! Diff error types

use thiserror::Error;

use crate::storage::StorageError;

/// Errors from diff requests. Degraded diffs and coercion failures are
/// warnings, not errors.
#[derive(Debug, Error)]
pub enum DiffError {
    /// the table exists at neither end of the diff
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// the caller required `to` to descend from `from`, and it doesn't
    #[error("invalid commit ancestry: {to} is not a descendant of {from}")]
    InvalidAncestry { from: String, to: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl DiffError {
    pub fn is_not_found(&self) -> bool {
        match self {
            DiffError::TableNotFound(_) => true,
            DiffError::Storage(e) => e.is_not_found(),
            DiffError::InvalidAncestry { .. } => false,
        }
    }
}

pub type DiffResult<T> = Result<T, DiffError>;
