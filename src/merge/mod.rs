//! Merge Engine
//!
//! Three-way merge of database roots:
//!
//! ```text
//!   base ──► ours ─┐
//!     │            ├─► merge_roots ─► candidate root + ConflictSet
//!     └──► theirs ─┘
//! ```
//!
//! Per table the schema merges first (by column tag), then the rows (by key,
//! over the structural diffs of both sides against the base).

mod conflict;
mod engine;
mod error;
mod row_merge;
mod schema_merge;

pub use conflict::{resolve_row, Conflict, ConflictSet, NamedEntry, Resolution, TableConflict};
pub use engine::{merge_roots, merge_roots_with, MergeOutcome, TableMergeStats};
pub use error::{MergeError, MergeResult};
