//! Commit Graph Walker
//!
//! Merge-base computation, ancestry checks and history walks over the commit
//! DAG, ordered by generation number.

mod walker;

pub use walker::{CommitGraph, HistoryIter};
