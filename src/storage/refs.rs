//! Branch and reference management.
//!
//! Branches are refs under `refs/heads/` pointing at commit objects. Every
//! branch also owns a working set ref under `refs/workingSets/heads/`.
//! All pointer moves are compare-and-swap.

use tracing::{debug, warn};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::object_store::RefStore;
use crate::storage::types::{BranchName, CommitId, ObjectId};

/// Manages branch pointers and working set refs.
pub struct RefManager;

impl RefManager {
    /// Resolve a branch name to its current commit ID.
    pub fn resolve_branch(refs: &dyn RefStore, branch: &BranchName) -> StorageResult<CommitId> {
        refs.read_ref(&branch.as_ref_path())?
            .map(CommitId::new)
            .ok_or_else(|| StorageError::RefNotFound(branch.to_string()))
    }

    /// Check if a branch exists.
    pub fn branch_exists(refs: &dyn RefStore, branch: &BranchName) -> StorageResult<bool> {
        Ok(refs.read_ref(&branch.as_ref_path())?.is_some())
    }

    /// Create a new branch pointing to the given commit.
    pub fn create_branch(refs: &dyn RefStore, branch: &BranchName, target: CommitId) -> StorageResult<()> {
        match refs.update_ref(&branch.as_ref_path(), None, Some(target.object_id())) {
            Ok(()) => {
                debug!(branch = %branch, target = %target.short(), "created branch");
                Ok(())
            }
            Err(StorageError::ConcurrentModification { .. }) => {
                Err(StorageError::BranchAlreadyExists(branch.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Update a branch only if it still points to the expected commit.
    ///
    /// Returns `ConcurrentModification` if the branch was moved by another
    /// writer since `expected` was read.
    pub fn update_branch_if_unchanged(
        refs: &dyn RefStore,
        branch: &BranchName,
        expected: CommitId,
        new_target: CommitId,
    ) -> StorageResult<()> {
        let result = refs.update_ref(
            &branch.as_ref_path(),
            Some(expected.object_id()),
            Some(new_target.object_id()),
        );
        match &result {
            Ok(()) => debug!(
                branch = %branch,
                from = %expected.short(),
                to = %new_target.short(),
                "moved branch"
            ),
            Err(StorageError::ConcurrentModification { .. }) => warn!(
                branch = %branch,
                expected = %expected.short(),
                "branch moved concurrently, update rejected"
            ),
            Err(_) => {}
        }
        result
    }

    /// Delete a branch and its working set.
    pub fn delete_branch(refs: &dyn RefStore, branch: &BranchName) -> StorageResult<()> {
        let head = Self::resolve_branch(refs, branch)?;
        refs.update_ref(&branch.as_ref_path(), Some(head.object_id()), None)?;

        let ws_ref = branch.working_set_ref_path();
        if let Some(ws) = refs.read_ref(&ws_ref)? {
            refs.update_ref(&ws_ref, Some(ws), None)?;
        }
        debug!(branch = %branch, "deleted branch");
        Ok(())
    }

    /// List all branches, sorted by name.
    pub fn list_branches(refs: &dyn RefStore) -> StorageResult<Vec<(BranchName, CommitId)>> {
        let mut result = Vec::new();
        for (name, target) in refs.list_refs(BranchName::HEADS_PREFIX)? {
            let short = &name[BranchName::HEADS_PREFIX.len()..];
            if let Ok(branch) = BranchName::new(short) {
                result.push((branch, CommitId::new(target)));
            }
        }
        Ok(result)
    }

    /// Current working set object of a branch, if one was ever written.
    pub fn working_set(refs: &dyn RefStore, branch: &BranchName) -> StorageResult<Option<ObjectId>> {
        refs.read_ref(&branch.working_set_ref_path())
    }

    /// Publish a new working set object for a branch (compare-and-swap).
    pub fn update_working_set(
        refs: &dyn RefStore,
        branch: &BranchName,
        expected: Option<ObjectId>,
        new: ObjectId,
    ) -> StorageResult<()> {
        refs.update_ref(&branch.working_set_ref_path(), expected, Some(new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::object_store::{MemoryStore, ObjectStore};

    fn commit_like(store: &MemoryStore, tag: &[u8]) -> CommitId {
        CommitId::new(store.put(tag).unwrap())
    }

    #[test]
    fn test_create_and_resolve_branch() {
        let store = MemoryStore::new();
        let c1 = commit_like(&store, b"c1");
        let main = BranchName::main();

        RefManager::create_branch(&store, &main, c1).unwrap();
        assert!(RefManager::branch_exists(&store, &main).unwrap());
        assert_eq!(RefManager::resolve_branch(&store, &main).unwrap(), c1);

        let err = RefManager::create_branch(&store, &main, c1).unwrap_err();
        assert!(matches!(err, StorageError::BranchAlreadyExists(_)));
    }

    #[test]
    fn test_update_branch_if_unchanged() {
        let store = MemoryStore::new();
        let c1 = commit_like(&store, b"c1");
        let c2 = commit_like(&store, b"c2");
        let c3 = commit_like(&store, b"c3");
        let main = BranchName::main();
        RefManager::create_branch(&store, &main, c1).unwrap();

        RefManager::update_branch_if_unchanged(&store, &main, c1, c2).unwrap();
        let err = RefManager::update_branch_if_unchanged(&store, &main, c1, c3).unwrap_err();
        assert!(err.is_retriable());
        assert_eq!(RefManager::resolve_branch(&store, &main).unwrap(), c2);
    }

    #[test]
    fn test_list_and_delete_branches() {
        let store = MemoryStore::new();
        let c1 = commit_like(&store, b"c1");
        let main = BranchName::main();
        let dev = BranchName::new("dev").unwrap();
        RefManager::create_branch(&store, &main, c1).unwrap();
        RefManager::create_branch(&store, &dev, c1).unwrap();
        RefManager::update_working_set(&store, &dev, None, c1.object_id()).unwrap();

        let names: Vec<String> = RefManager::list_branches(&store)
            .unwrap()
            .into_iter()
            .map(|(b, _)| b.to_string())
            .collect();
        assert_eq!(names, vec!["dev", "main"]);

        RefManager::delete_branch(&store, &dev).unwrap();
        assert!(!RefManager::branch_exists(&store, &dev).unwrap());
        assert!(RefManager::working_set(&store, &dev).unwrap().is_none());
        assert!(RefManager::resolve_branch(&store, &dev).unwrap_err().is_not_found());
    }
}
