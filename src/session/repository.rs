//! Repository handle: store, commit graph and configuration.

use std::sync::Arc;

use tracing::{debug, info};

use super::config::RepositoryConfig;
use super::error::{SessionError, SessionResult};
use super::refspec::{self, RefTarget};
use super::session::Session;
use super::working_set::WorkingSet;
use crate::graph::CommitGraph;
use crate::privileges::{PrivilegeData, PrivilegeStore};
use crate::snapshot::Root;
use crate::storage::{
    BranchName, CommitBuilder, CommitId, CommitInfo, CommitMessage, GitStore, ObjectId, RefManager,
    StorageError, Store,
};

/// A versioned database.
///
/// Cheap to clone; clones share the store and the commit cache. Work on a
/// branch happens through a [`Session`].
#[derive(Clone)]
pub struct Repository {
    store: Store,
    graph: Arc<CommitGraph>,
    config: Arc<RepositoryConfig>,
}

impl Repository {
    /// Open (or create, if configured) a repository.
    ///
    /// A repository without branches is initialized with one commit holding
    /// an empty root on the default branch.
    pub fn open(config: RepositoryConfig) -> SessionResult<Self> {
        let store = match &config.path {
            None => Store::in_memory(),
            Some(path) if config.create_if_missing => GitStore::open_or_init(path)?.into_store(),
            Some(path) => GitStore::open(path)?.into_store(),
        };
        let repo = Self {
            graph: Arc::new(CommitGraph::new(&store)),
            store,
            config: Arc::new(config),
        };
        repo.init_if_empty()?;
        Ok(repo)
    }

    /// A fresh repository in memory with default settings.
    pub fn in_memory() -> SessionResult<Self> {
        Self::open(RepositoryConfig::in_memory())
    }

    fn init_if_empty(&self) -> SessionResult<()> {
        if !RefManager::list_branches(self.store.refs())?.is_empty() {
            return Ok(());
        }
        let root = Root::empty().write(&self.store)?;
        let commit = CommitBuilder::new(&self.store)
            .root(root)
            .message(CommitMessage::init())
            .author(self.config.author.clone())
            .commit()?;
        let branch = &self.config.default_branch;
        RefManager::create_branch(self.store.refs(), branch, commit)?;
        info!(branch = %branch, commit = %commit.short(), "initialized repository");
        Ok(())
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn graph(&self) -> &CommitGraph {
        &self.graph
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Resolve a ref expression to a commit. `HEAD` is the default branch.
    pub fn resolve_commit(&self, expr: &str) -> SessionResult<CommitId> {
        self.resolve_commit_at(&self.config.default_branch, expr)
    }

    pub(crate) fn resolve_commit_at(&self, head: &BranchName, expr: &str) -> SessionResult<CommitId> {
        match refspec::resolve(&self.store, &self.graph, head, expr)? {
            RefTarget::Commit(id) => Ok(id),
            RefTarget::Working | RefTarget::Staged => {
                Err(SessionError::invalid_ref(expr, "names a working set, not a commit"))
            }
        }
    }

    /// Root snapshot of a commit.
    pub fn root_of(&self, commit: CommitId) -> SessionResult<Root> {
        Ok(Root::load(&self.store, &self.graph.commit(commit)?.root)?)
    }

    // ==================== Branches ====================

    /// All branches with their tips, sorted by name.
    pub fn branches(&self) -> SessionResult<Vec<(BranchName, CommitId)>> {
        Ok(RefManager::list_branches(self.store.refs())?)
    }

    /// Create a branch at the commit `from` resolves to.
    pub fn create_branch(&self, name: &BranchName, from: &str) -> SessionResult<CommitId> {
        let target = self.resolve_commit(from)?;
        RefManager::create_branch(self.store.refs(), name, target)?;
        Ok(target)
    }

    /// Delete a branch and its working set.
    pub fn delete_branch(&self, name: &BranchName) -> SessionResult<()> {
        Ok(RefManager::delete_branch(self.store.refs(), name)?)
    }

    /// Open a session on an existing branch.
    pub fn session(&self, branch: &BranchName) -> SessionResult<Session> {
        if !RefManager::branch_exists(self.store.refs(), branch)? {
            return Err(StorageError::RefNotFound(branch.to_string()).into());
        }
        self.ensure_working_set(branch)?;
        debug!(branch = %branch, "session opened");
        Ok(Session::new(self.clone(), branch.clone()))
    }

    /// Session on the default branch.
    pub fn default_session(&self) -> SessionResult<Session> {
        self.session(&self.config.default_branch)
    }

    /// Load the working set of `branch`, creating a clean one at the branch
    /// tip when it doesn't exist yet.
    pub(crate) fn ensure_working_set(&self, branch: &BranchName) -> SessionResult<(ObjectId, WorkingSet)> {
        if let Some(found) = WorkingSet::load(&self.store, branch)? {
            return Ok(found);
        }
        let head = RefManager::resolve_branch(self.store.refs(), branch)?;
        let ws = WorkingSet::clean(self.graph.commit(head)?.root);
        match ws.save(&self.store, branch, None) {
            Ok(id) => Ok((id, ws)),
            // another writer created it first
            Err(StorageError::ConcurrentModification { .. }) => WorkingSet::load(&self.store, branch)?
                .ok_or_else(|| SessionError::from(StorageError::RefNotFound(branch.working_set_ref_path()))),
            Err(e) => Err(e.into()),
        }
    }

    // ==================== History ====================

    /// Commits reachable from `expr`, newest first.
    pub fn log(&self, expr: &str) -> SessionResult<Vec<CommitInfo>> {
        let start = self.resolve_commit(expr)?;
        Ok(self.graph.history(start).collect::<Result<_, _>>()?)
    }

    // ==================== Privileges ====================

    fn privilege_store(&self) -> SessionResult<&Arc<dyn PrivilegeStore>> {
        self.config.privileges.as_ref().ok_or(SessionError::NoPrivilegeStore)
    }

    pub fn load_privileges(&self) -> SessionResult<PrivilegeData> {
        Ok(self.privilege_store()?.load()?)
    }

    pub fn save_privileges(&self, data: &PrivilegeData) -> SessionResult<()> {
        Ok(self.privilege_store()?.save(data)?)
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository").field("config", &self.config).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::privileges::MemoryPrivileges;
    use tempfile::TempDir;

    #[test]
    fn test_init_creates_default_branch() {
        let repo = Repository::in_memory().unwrap();
        let branches = repo.branches().unwrap();
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].0, BranchName::main());

        let log = repo.log("HEAD").unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].commit.meta.message, CommitMessage::init());
        assert!(repo.root_of(log[0].id).unwrap().is_empty());
    }

    #[test]
    fn test_git_backed_reopen() {
        let dir = TempDir::new().unwrap();
        let first = Repository::open(RepositoryConfig::new(dir.path().join("repo"))).unwrap();
        let head = first.resolve_commit("main").unwrap();
        drop(first);

        let reopened = Repository::open(RepositoryConfig::new(dir.path().join("repo")).create_if_missing(false)).unwrap();
        assert_eq!(reopened.resolve_commit("HEAD").unwrap(), head);
        assert!(Repository::open(RepositoryConfig::new(dir.path().join("missing")).create_if_missing(false)).is_err());
    }

    #[test]
    fn test_branches() {
        let repo = Repository::in_memory().unwrap();
        let dev = BranchName::new("dev").unwrap();
        let at = repo.create_branch(&dev, "main").unwrap();
        assert_eq!(repo.resolve_commit("dev").unwrap(), at);
        assert!(repo.create_branch(&dev, "main").unwrap_err().is_conflict());

        repo.session(&dev).unwrap();
        repo.delete_branch(&dev).unwrap();
        assert!(repo.session(&dev).unwrap_err().is_not_found());
        assert!(repo.resolve_commit("WORKING").is_err());
    }

    #[test]
    fn test_privileges_port() {
        let repo = Repository::in_memory().unwrap();
        assert!(matches!(repo.load_privileges(), Err(SessionError::NoPrivilegeStore)));

        let config = RepositoryConfig::in_memory().privileges(Arc::new(MemoryPrivileges::default()));
        let repo = Repository::open(config).unwrap();
        let mut data = repo.load_privileges().unwrap();
        data.roles.insert("admin".to_string(), Default::default());
        repo.save_privileges(&data).unwrap();
        assert_eq!(repo.load_privileges().unwrap(), data);
    }
}
