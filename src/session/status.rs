//! Working set status.

use std::collections::BTreeSet;
use std::fmt;

use crate::diff::{diff_roots, TableChange};
use crate::snapshot::Root;
use crate::storage::{BranchName, CommitId, StorageResult, Store, TableName};

/// Kind of change a table has in one status section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChange {
    NewTable,
    Modified,
    Deleted,
    Renamed { from: TableName },
}

impl fmt::Display for StatusChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusChange::NewTable => write!(f, "new table"),
            StatusChange::Modified => write!(f, "modified"),
            StatusChange::Deleted => write!(f, "deleted"),
            StatusChange::Renamed { from } => write!(f, "renamed from {}", from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub table: TableName,
    pub change: StatusChange,
}

/// Staged and unstaged changes of a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub branch: BranchName,
    pub head: CommitId,
    /// theirs, while a merge is in progress
    pub merging: Option<CommitId>,
    /// head root -> staged root
    pub staged: Vec<StatusEntry>,
    /// staged root -> working root
    pub unstaged: Vec<StatusEntry>,
    /// tables with unresolved conflicts
    pub conflicts: BTreeSet<TableName>,
}

impl Status {
    /// nothing staged, nothing unstaged, no merge
    pub fn is_clean(&self) -> bool {
        self.staged.is_empty() && self.unstaged.is_empty() && self.merging.is_none() && self.conflicts.is_empty()
    }
}

/// Status entries for the table changes between two roots.
pub(crate) fn changes(store: &Store, from: &Root, to: &Root) -> StorageResult<Vec<StatusEntry>> {
    let mut entries = Vec::new();
    for delta in diff_roots(store, from, to).into_result()? {
        let (table, change) = match (delta.change(), delta.from_name(), delta.to_name()) {
            (TableChange::Added, _, Some(to)) => (to.clone(), StatusChange::NewTable),
            (TableChange::Dropped, Some(from), _) => (from.clone(), StatusChange::Deleted),
            (TableChange::Renamed, Some(from), Some(to)) => (to.clone(), StatusChange::Renamed { from: from.clone() }),
            (_, _, Some(to)) => (to.clone(), StatusChange::Modified),
            _ => continue,
        };
        entries.push(StatusEntry { table, change });
    }
    Ok(entries)
}
