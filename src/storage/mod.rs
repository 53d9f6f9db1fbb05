//! storage layer for tablevc
//!
//! this module is the content-addressed foundation everything else is built
//! on. Upper layers (index, snapshot, merge, session) use this API and never
//! touch git2 directly.
//!
//!  # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Store                              │
//! │        (get/put of immutable objects, ref handle)           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!              ┌───────────────┴───────────────┐
//!              ▼                               ▼
//!       ┌─────────────┐                 ┌─────────────┐
//!       │ ObjectStore │                 │  RefStore   │
//!       │ hash->bytes │                 │ name->hash  │
//!       └─────────────┘                 └─────────────┘
//!              │                               │
//!       ┌──────┴───────┐                ┌──────┴──────┐
//!       ▼              ▼                ▼             ▼
//!  MemoryStore     GitStore       commit objects   RefManager
//!                 (git blobs)     (CommitBuilder)  (branches, CAS)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use tablevc::storage::{Store, GitStore, CommitBuilder, RefManager, BranchName};
//!
//! let store = GitStore::open_or_init("./data")?.into_store();
//! let root = store.put(b"...")?;
//! let commit = CommitBuilder::new(&store).root(root).message("init").commit()?;
//! RefManager::create_branch(store.refs(), &BranchName::main(), commit)?;
//! ```

mod commit;
mod error;
mod git_store;
mod object_store;
mod refs;
mod types;

// Re-export public API
pub use commit::{Commit, CommitBuilder, CommitInfo, CommitMessage, CommitMeta};
pub use error::{StorageError, StorageResult};
pub use git_store::GitStore;
pub use object_store::{MemoryStore, ObjectStore, RefStore, Store};
pub use refs::RefManager;
pub use types::{Author, BranchName, CommitId, InvalidNameError, ObjectId, TableId, TableName};
