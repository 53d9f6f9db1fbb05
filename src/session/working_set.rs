//! Per-branch working sets.
//!
//! A working set is a small JSON object referenced by the branch's working
//! set ref. It is replaced wholesale on every change, and the ref moves by
//! compare-and-swap so two writers on one branch can't lose each other's
//! updates.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::storage::{BranchName, CommitId, ObjectId, RefManager, StorageResult, Store, TableName};

/// State of a merge between `begin_merge` and commit or abort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeState {
    /// working root before the merge, restored by abort
    pub pre_merge_working: ObjectId,
    pub pre_merge_staged: ObjectId,
    pub ours: CommitId,
    pub theirs: CommitId,
    pub base: CommitId,
    /// how the caller named theirs, for the commit message
    pub theirs_label: String,
    #[serde(default)]
    pub unmerged_tables: BTreeSet<TableName>,
    #[serde(default)]
    pub squash: bool,
}

/// Working and staged roots of a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingSet {
    pub working: ObjectId,
    pub staged: ObjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge: Option<MergeState>,
}

impl WorkingSet {
    /// working set with no changes over `root`
    pub fn clean(root: ObjectId) -> Self {
        Self {
            working: root,
            staged: root,
            merge: None,
        }
    }

    pub fn is_merging(&self) -> bool {
        self.merge.is_some()
    }

    /// Current working set of `branch` and the object id it is stored under.
    pub fn load(store: &Store, branch: &BranchName) -> StorageResult<Option<(ObjectId, WorkingSet)>> {
        match RefManager::working_set(store.refs(), branch)? {
            Some(id) => Ok(Some((id, store.read_json(&id)?))),
            None => Ok(None),
        }
    }

    /// Store this working set for `branch`, provided the ref still points at
    /// `expected`.
    pub fn save(&self, store: &Store, branch: &BranchName, expected: Option<ObjectId>) -> StorageResult<ObjectId> {
        let id = store.write_json(self)?;
        if Some(id) != expected {
            RefManager::update_working_set(store.refs(), branch, expected, id)?;
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageError;

    #[test]
    fn test_save_is_compare_and_swap() {
        let store = Store::in_memory();
        let main = BranchName::main();
        assert!(WorkingSet::load(&store, &main).unwrap().is_none());

        let a = store.put(b"a").unwrap();
        let b = store.put(b"b").unwrap();
        let first = WorkingSet::clean(a).save(&store, &main, None).unwrap();

        let mut moved = WorkingSet::clean(a);
        moved.working = b;
        let second = moved.save(&store, &main, Some(first)).unwrap();

        let (id, loaded) = WorkingSet::load(&store, &main).unwrap().unwrap();
        assert_eq!(id, second);
        assert_eq!(loaded, moved);

        // a writer that still holds the first version is rejected
        let stale = WorkingSet::clean(b).save(&store, &main, Some(first)).unwrap_err();
        assert!(matches!(stale, StorageError::ConcurrentModification { .. }));
    }
}
