//! Session error types

use thiserror::Error;

use crate::catalog::SchemaError;
use crate::diff::DiffError;
use crate::merge::MergeError;
use crate::privileges::PrivilegeError;
use crate::storage::{BranchName, StorageError};

/// Result type for repository and session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors surfaced to callers of [`Repository`](super::Repository) and
/// [`Session`](super::Session).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Diff(#[from] DiffError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("privilege store error: {0}")]
    Privileges(#[from] PrivilegeError),

    /// a ref expression that resolves to nothing (or to too much)
    #[error("invalid ref '{expr}': {reason}")]
    InvalidRef { expr: String, reason: String },

    /// switching branches would discard uncommitted changes
    #[error("uncommitted changes on branch {0} would be lost")]
    UncommittedChanges(BranchName),

    #[error("nothing to commit")]
    NothingToCommit,

    /// the current branch of a session cannot be deleted
    #[error("cannot delete the checked out branch {0}")]
    CheckedOutBranch(BranchName),

    #[error("no privilege store configured")]
    NoPrivilegeStore,
}

/// Error categories callers can act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// a table, commit, branch or row does not exist
    NotFound,
    /// the operation needs an ancestry relation that doesn't hold
    InvalidAncestry,
    /// a commit is blocked by outstanding merge conflicts
    UnresolvedConflicts,
    /// a branch or working set moved during the operation; retry
    ConcurrentUpdate,
    /// a structural invariant of the store is violated; not retriable
    Corruption,
    /// the caller asked for something the current state doesn't allow
    InvalidOperation,
}

impl SessionError {
    pub(crate) fn invalid_ref(expr: &str, reason: impl Into<String>) -> Self {
        SessionError::InvalidRef {
            expr: expr.to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Storage(e) => storage_kind(e),
            SessionError::Diff(DiffError::TableNotFound(_)) => ErrorKind::NotFound,
            SessionError::Diff(DiffError::InvalidAncestry { .. }) => ErrorKind::InvalidAncestry,
            SessionError::Diff(DiffError::Storage(e)) => storage_kind(e),
            SessionError::Merge(MergeError::UnresolvedConflicts { .. }) => ErrorKind::UnresolvedConflicts,
            SessionError::Merge(MergeError::Storage(e)) => storage_kind(e),
            SessionError::Merge(_) => ErrorKind::InvalidOperation,
            SessionError::InvalidRef { .. } => ErrorKind::NotFound,
            SessionError::Schema(_)
            | SessionError::Privileges(_)
            | SessionError::UncommittedChanges(_)
            | SessionError::NothingToCommit
            | SessionError::CheckedOutBranch(_)
            | SessionError::NoPrivilegeStore => ErrorKind::InvalidOperation,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        match self {
            SessionError::Storage(e) => e.is_conflict(),
            SessionError::Merge(e) => e.is_conflict(),
            _ => false,
        }
    }

    /// check if retrying the operation may succeed
    pub fn is_retriable(&self) -> bool {
        self.kind() == ErrorKind::ConcurrentUpdate
    }
}

fn storage_kind(e: &StorageError) -> ErrorKind {
    if e.is_not_found() {
        ErrorKind::NotFound
    } else if e.is_retriable() {
        ErrorKind::ConcurrentUpdate
    } else if e.is_corruption() {
        ErrorKind::Corruption
    } else {
        ErrorKind::InvalidOperation
    }
}
