//! Storage layer error types
//!
//! All errors that can occur while reading or writing content-addressed objects
//! and refs are defined here.

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::types::{InvalidNameError, ObjectId, TableName};

/// the main error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// error from the underlying Git library
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// an object referenced by hash is missing from the store
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// text that should have been an object id is not one
    #[error("invalid object id: {0}")]
    InvalidObjectId(String),

    /// the requested row was not found
    #[error("row not found: key={key}")]
    RowNotFound { key: String },

    /// the row already exists (duplicate primary key)
    #[error("row already exists: key={key}")]
    RowAlreadyExists { key: String },

    /// the requested table was not found
    #[error("table not found: {0}")]
    TableNotFound(TableName),

    /// the table already exists
    #[error("table already exists: {0}")]
    TableAlreadyExists(TableName),

    /// invalid table or branch name
    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// the specified branch/ref was not found
    #[error("ref not found: {0}")]
    RefNotFound(String),

    /// the commit was not found
    #[error("commit not found: {0}")]
    CommitNotFound(String),

    /// branch already exists
    #[error("branch already exists: {0}")]
    BranchAlreadyExists(String),

    /// a ref moved between the read and the compare-and-swap update
    #[error("concurrent modification: {ref_name} was updated by another writer")]
    ConcurrentModification { ref_name: String },

    /// two commits share no ancestor; the commit graph is broken
    #[error("no common ancestor between {a} and {b}")]
    NoCommonAncestor { a: String, b: String },

    /// data integrity check failed
    #[error("corrupted data in {object}: {reason}")]
    CorruptedData { object: String, reason: String },

    /// the row data doesn't match the expected schema
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// I/O error (filesystem level)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// repo is not initialized
    #[error("repository not initialized: {0}")]
    NotInitialized(PathBuf),

    /// internal error that shouldn't happen
    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    pub(crate) fn corrupted(object: impl ToString, reason: impl Into<String>) -> Self {
        StorageError::CorruptedData {
            object: object.to_string(),
            reason: reason.into(),
        }
    }

    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::RowNotFound { .. }
                | StorageError::TableNotFound(_)
                | StorageError::RefNotFound(_)
                | StorageError::CommitNotFound(_)
        )
    }

    /// check if this error is a conflict
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StorageError::RowAlreadyExists { .. }
                | StorageError::TableAlreadyExists(_)
                | StorageError::BranchAlreadyExists(_)
                | StorageError::ConcurrentModification { .. }
        )
    }

    /// check if this error is recoverable by retry
    pub fn is_retriable(&self) -> bool {
        matches!(self, StorageError::ConcurrentModification { .. })
    }

    /// check if this error means a structural invariant of the store is broken
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StorageError::ObjectNotFound(_)
                | StorageError::NoCommonAncestor { .. }
                | StorageError::CorruptedData { .. }
        )
    }
}

/// result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let not_found = StorageError::TableNotFound(TableName::new("users").unwrap());
        assert!(not_found.is_not_found());
        assert!(!not_found.is_conflict());

        let conflict = StorageError::RowAlreadyExists { key: "(1)".into() };
        assert!(!conflict.is_not_found());
        assert!(conflict.is_conflict());

        let moved = StorageError::ConcurrentModification {
            ref_name: "refs/heads/main".into(),
        };
        assert!(moved.is_retriable());
        assert!(!moved.is_corruption());

        let broken = StorageError::NoCommonAncestor {
            a: "a".into(),
            b: "b".into(),
        };
        assert!(broken.is_corruption());
        assert!(!broken.is_retriable());
    }
}
