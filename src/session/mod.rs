//! Session Layer
//!
//! Branches, working sets, staging, commits and the merge workflow on top
//! of the immutable engine:
//!
//! ```text
//!   Repository ──► Session(branch) ──► WorkingSet { working, staged, merge }
//!        │                │
//!        │                ├─► diff / diff_all        (crate::diff)
//!        │                └─► begin_merge / commit   (crate::merge)
//!        └─► CommitGraph, RefManager, PrivilegeStore
//! ```
//!
//! Every change to a working set or branch pointer is a compare-and-swap;
//! a writer that lost the race gets [`ErrorKind::ConcurrentUpdate`] and
//! retries from the new state.

mod config;
mod error;
mod merge;
mod refspec;
mod repository;
#[allow(clippy::module_inception)]
mod session;
mod status;
mod working_set;

pub use config::RepositoryConfig;
pub use error::{ErrorKind, SessionError, SessionResult};
pub use merge::{MergeOptions, MergeReport, MergeStatus};
pub use refspec::{RefTarget, MIN_HASH_PREFIX};
pub use repository::Repository;
pub use session::{CommitOptions, Session};
pub use status::{Status, StatusChange, StatusEntry};
pub use working_set::{MergeState, WorkingSet};
