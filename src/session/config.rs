//! Repository configuration.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::privileges::PrivilegeStore;
use crate::storage::{Author, BranchName};
use crate::warnings::Warnings;

/// Repository configuration options.
#[derive(Clone)]
pub struct RepositoryConfig {
    /// Bare git repository backing the store; `None` keeps everything in memory.
    pub path: Option<PathBuf>,
    /// Create the repository if it doesn't exist.
    pub create_if_missing: bool,
    /// Author recorded on commits.
    pub author: Author,
    /// Allow committing while merge conflicts are outstanding.
    pub allow_commit_conflicts: bool,
    /// Warnings kept per operation before the rest are only counted.
    pub max_warnings: usize,
    /// Branch created on init and used for `HEAD` outside a session.
    pub default_branch: BranchName,
    /// Where users and grants are persisted.
    pub privileges: Option<Arc<dyn PrivilegeStore>>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            path: None,
            create_if_missing: true,
            author: Author::system(),
            allow_commit_conflicts: false,
            max_warnings: Warnings::DEFAULT_LIMIT,
            default_branch: BranchName::main(),
            privileges: None,
        }
    }
}

impl RepositoryConfig {
    /// Create a new configuration for a repository at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Configuration of a repository that lives in memory only.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Set create_if_missing flag.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn author(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.author = Author::new(name, email);
        self
    }

    /// Set allow_commit_conflicts flag.
    pub fn allow_commit_conflicts(mut self, value: bool) -> Self {
        self.allow_commit_conflicts = value;
        self
    }

    pub fn max_warnings(mut self, value: usize) -> Self {
        self.max_warnings = value;
        self
    }

    pub fn default_branch(mut self, branch: BranchName) -> Self {
        self.default_branch = branch;
        self
    }

    pub fn privileges(mut self, store: Arc<dyn PrivilegeStore>) -> Self {
        self.privileges = Some(store);
        self
    }

    pub(crate) fn warnings(&self) -> Warnings {
        Warnings::with_limit(self.max_warnings)
    }
}

impl fmt::Debug for RepositoryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryConfig")
            .field("path", &self.path)
            .field("create_if_missing", &self.create_if_missing)
            .field("author", &self.author)
            .field("allow_commit_conflicts", &self.allow_commit_conflicts)
            .field("max_warnings", &self.max_warnings)
            .field("default_branch", &self.default_branch)
            .field("privileges", &self.privileges.is_some())
            .finish()
    }
}
