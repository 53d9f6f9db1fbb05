//! Merge error types

use thiserror::Error;

use crate::storage::StorageError;

/// Errors that stop a merge from starting or finishing. Conflicts are not
/// errors: a merge with conflicts is a valid intermediate state.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("merge would override local changes, commit or discard them first")]
    LocalChanges,

    #[error("a merge is already in progress")]
    MergeInProgress,

    #[error("no merge in progress")]
    NotMerging,

    #[error("{count} unresolved conflicts remain")]
    UnresolvedConflicts { count: usize },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl MergeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, MergeError::Storage(e) if e.is_not_found())
    }

    pub fn is_conflict(&self) -> bool {
        match self {
            MergeError::UnresolvedConflicts { .. } => true,
            MergeError::Storage(e) => e.is_conflict(),
            _ => false,
        }
    }
}

pub type MergeResult<T> = Result<T, MergeError>;
