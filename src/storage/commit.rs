//! Commit objects and creation
//!
//! commits are immutable, content-addressed nodes of the history graph:
//! - each commit points at one root snapshot
//! - normal commits have one parent, merge commits two or more
//! - the generation number (`height`) is stored so graph walks can order
//!   commits without loading their ancestors
//!
//! this module handles commit encoding, loading and creation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::object_store::Store;
use crate::storage::types::{Author, CommitId, ObjectId};

/// commit metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMeta {
    pub author: Author,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// a stored commit object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub parents: Vec<CommitId>,
    pub root: ObjectId,
    pub meta: CommitMeta,
    /// generation number: 1 for a root commit, 1 + max(parent heights) otherwise
    pub height: u64,
}

impl Commit {
    /// load a commit by id
    pub fn load(store: &Store, id: CommitId) -> StorageResult<Commit> {
        let bytes = store
            .try_get(&id.object_id())?
            .ok_or_else(|| StorageError::CommitNotFound(id.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| StorageError::corrupted(id, format!("not a commit: {}", e)))
    }

    /// check if this is a merge commit (has multiple parents)
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    /// get the first (or only) parent
    pub fn first_parent(&self) -> Option<CommitId> {
        self.parents.first().copied()
    }

    /// get a short summary of the commit (first line of message)
    pub fn summary(&self) -> &str {
        self.meta.message.lines().next().unwrap_or(&self.meta.message)
    }
}

/// a commit together with its id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub id: CommitId,
    pub commit: Commit,
}

impl CommitInfo {
    pub fn load(store: &Store, id: CommitId) -> StorageResult<CommitInfo> {
        Ok(CommitInfo {
            id,
            commit: Commit::load(store, id)?,
        })
    }
}

/// builder for creating commits with a fluent interface
pub struct CommitBuilder<'a> {
    store: &'a Store,
    root: Option<ObjectId>,
    parents: Vec<CommitId>,
    message: String,
    author: Author,
    timestamp: Option<DateTime<Utc>>,
}

impl<'a> CommitBuilder<'a> {
    /// create a new CommitBuilder
    pub fn new(store: &'a Store) -> Self {
        Self {
            store,
            root: None,
            parents: Vec::new(),
            message: String::new(),
            author: Author::system(),
            timestamp: None,
        }
    }

    /// set the root snapshot for this commit
    pub fn root(mut self, root: ObjectId) -> Self {
        self.root = Some(root);
        self
    }

    /// add a parent commit
    pub fn parent(mut self, parent: CommitId) -> Self {
        self.parents.push(parent);
        self
    }

    /// set multiple parents (for merge commits)
    pub fn parents(mut self, parents: Vec<CommitId>) -> Self {
        self.parents = parents;
        self
    }

    /// set the commit message
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// set the author
    pub fn author(mut self, author: Author) -> Self {
        self.author = author;
        self
    }

    /// pin the timestamp instead of using the current time
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// write the commit object and return its ID
    ///
    /// the commit is only stored; moving a branch to it is the caller's job
    pub fn commit(self) -> StorageResult<CommitId> {
        let root = self
            .root
            .ok_or_else(|| StorageError::Internal("commit requires a root".to_string()))?;

        let mut height = 0;
        for parent in &self.parents {
            height = height.max(Commit::load(self.store, *parent)?.height);
        }

        let commit = Commit {
            parents: self.parents,
            root,
            meta: CommitMeta {
                author: self.author,
                message: self.message,
                timestamp: self.timestamp.unwrap_or_else(Utc::now),
            },
            height: height + 1,
        };
        let id = CommitId::new(self.store.write_json(&commit)?);
        debug!(
            commit = %id.short(),
            parents = commit.parents.len(),
            height = commit.height,
            "wrote commit"
        );
        Ok(id)
    }
}

/// message formatting for engine-generated commits
pub struct CommitMessage;

impl CommitMessage {
    /// message of the first commit of a repository
    pub fn init() -> String {
        "Initialize data repository".to_string()
    }

    /// message of a merge commit
    pub fn merge(theirs: &str, ours: &str) -> String {
        format!("Merge {} into {}", theirs, ours)
    }

    /// message of a squash merge
    pub fn squash(theirs: &str) -> String {
        format!("Squash merge {}", theirs)
    }
}
