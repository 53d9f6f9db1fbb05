//! tablevc - version control for tabular data
//!
//! Tables live in content-addressed, structurally shared snapshots. Every
//! commit points at a root snapshot of all tables, so history, diffs and
//! merges work on immutable values:
//!
//! - [`diff`] compares two versions of a table column-by-tag and row-by-key,
//!   lazily.
//! - [`merge`] performs a three-way merge of two roots against their merge
//!   base, producing a candidate root plus the conflicts it couldn't settle.
//! - [`session`] layers branches, working sets, staging and the merge
//!   workflow on top.
//!
//! # Example
//!
//! ```no_run
//! use tablevc::catalog::{DataType, SchemaBuilder};
//! use tablevc::session::{CommitOptions, Repository, RepositoryConfig};
//! use tablevc::storage::TableName;
//!
//! let repo = Repository::open(RepositoryConfig::new("./data.git")).unwrap();
//! let session = repo.default_session().unwrap();
//! let schema = SchemaBuilder::new()
//!     .add_required_column("id", DataType::Int)
//!     .add_column("name", DataType::Text)
//!     .primary_key("id")
//!     .build()
//!     .unwrap();
//! let users = TableName::new("users").unwrap();
//! session.create_table(&users, schema.clone()).unwrap();
//! session
//!     .insert(&users, &[schema.row([("id", 1)]).unwrap()])
//!     .unwrap();
//! session.commit_all("add users", CommitOptions::new()).unwrap();
//! ```

pub mod catalog;
pub mod diff;
pub mod graph;
pub mod index;
pub mod merge;
pub mod privileges;
pub mod session;
pub mod snapshot;
pub mod storage;
pub mod systables;
pub mod warnings;

pub use catalog::{Column, DataType, Row, Schema, SchemaBuilder, Value};
pub use diff::{DiffType, RowDiff, TableChange, TableDelta};
pub use merge::{Conflict, ConflictSet, Resolution};
pub use session::{
    CommitOptions, ErrorKind, MergeOptions, MergeStatus, Repository, RepositoryConfig, Session,
    SessionError, SessionResult,
};
pub use storage::{BranchName, CommitId, TableName};
pub use systables::SystemTable;
pub use warnings::{Warning, Warnings};
