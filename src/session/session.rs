//! Branch sessions: table writes, staging, commits, checkout and diffs.
//!
//! A session holds no mutable state of its own besides the checked out
//! branch. Every operation reads the branch's working set, works on
//! immutable snapshots, and publishes a new working set by compare-and-swap.

use chrono::{DateTime, Utc};
use tracing::info;

use super::error::{SessionError, SessionResult};
use super::refspec::{self, RefTarget};
use super::repository::Repository;
use super::status::{self, Status};
use super::working_set::WorkingSet;
use crate::catalog::{Column, DataType, Row, Schema, SchemaError, Value};
use crate::diff::{
    diff_all, diff_roots, diff_table, DeltaSummary, DiffError, PartialDiff, TableDelta,
};
use crate::merge::{ConflictSet, MergeError};
use crate::snapshot::{Root, Table, TableEditor};
use crate::storage::{
    Author, BranchName, CommitBuilder, CommitId, CommitInfo, CommitMessage, ObjectId, RefManager,
    StorageError, Store, TableId, TableName,
};
use crate::warnings::Warnings;

/// Options of [`Session::commit`].
#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    /// commit even when nothing is staged
    pub allow_empty: bool,
    /// overrides the repository's configured author
    pub author: Option<Author>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl CommitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_empty(mut self, value: bool) -> Self {
        self.allow_empty = value;
        self
    }

    pub fn author(mut self, author: Author) -> Self {
        self.author = Some(author);
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Work on one branch of a [`Repository`].
#[derive(Debug, Clone)]
pub struct Session {
    repo: Repository,
    branch: BranchName,
}

impl Session {
    pub(crate) fn new(repo: Repository, branch: BranchName) -> Self {
        Self { repo, branch }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn branch(&self) -> &BranchName {
        &self.branch
    }

    pub(crate) fn store(&self) -> &Store {
        self.repo.store()
    }

    /// Current tip of the checked out branch.
    pub fn head(&self) -> SessionResult<CommitId> {
        Ok(RefManager::resolve_branch(self.store().refs(), &self.branch)?)
    }

    pub fn working_set(&self) -> SessionResult<WorkingSet> {
        Ok(self.state()?.1)
    }

    pub(crate) fn state(&self) -> SessionResult<(ObjectId, WorkingSet)> {
        self.repo.ensure_working_set(&self.branch)
    }

    pub(crate) fn save(&self, expected: ObjectId, ws: &WorkingSet) -> SessionResult<ObjectId> {
        Ok(ws.save(self.store(), &self.branch, Some(expected))?)
    }

    /// Apply `f` to the working root and publish the result. The merge
    /// state's list of unmerged tables follows the root's conflict set.
    pub(crate) fn modify<T>(&self, f: impl FnOnce(&mut Root, &mut WorkingSet) -> SessionResult<T>) -> SessionResult<T> {
        let (ws_id, mut ws) = self.state()?;
        let mut root = Root::load(self.store(), &ws.working)?;
        let out = f(&mut root, &mut ws)?;
        ws.working = root.write(self.store())?;
        if let Some(merge) = ws.merge.as_mut() {
            merge.unmerged_tables = ConflictSet::load(self.store(), &root)?.tables();
        }
        self.save(ws_id, &ws)?;
        Ok(out)
    }

    /// Resolve a ref expression; `HEAD` is this session's branch.
    pub fn resolve(&self, expr: &str) -> SessionResult<RefTarget> {
        refspec::resolve(self.store(), self.repo.graph(), &self.branch, expr)
    }

    pub fn resolve_commit(&self, expr: &str) -> SessionResult<CommitId> {
        self.repo.resolve_commit_at(&self.branch, expr)
    }

    /// Root a ref expression points at, `WORKING` and `STAGED` included.
    pub fn root(&self, expr: &str) -> SessionResult<Root> {
        self.root_at(self.resolve(expr)?)
    }

    pub(crate) fn root_at(&self, target: RefTarget) -> SessionResult<Root> {
        let id = match target {
            RefTarget::Commit(commit) => return self.repo.root_of(commit),
            RefTarget::Working => self.working_set()?.working,
            RefTarget::Staged => self.working_set()?.staged,
        };
        Ok(Root::load(self.store(), &id)?)
    }

    pub fn working_root(&self) -> SessionResult<Root> {
        self.root_at(RefTarget::Working)
    }

    pub fn staged_root(&self) -> SessionResult<Root> {
        self.root_at(RefTarget::Staged)
    }

    // ==================== Tables ====================

    /// Tables of the working root.
    pub fn tables(&self) -> SessionResult<Vec<TableName>> {
        Ok(self.working_root()?.table_names())
    }

    /// A table of the working root.
    pub fn table(&self, name: &TableName) -> SessionResult<Table> {
        Ok(self.working_root()?.require_table(self.store(), name)?)
    }

    pub fn create_table(&self, name: &TableName, schema: Schema) -> SessionResult<()> {
        let store = self.store().clone();
        self.modify(|root, _| {
            if root.contains(name) {
                return Err(StorageError::TableAlreadyExists(name.clone()).into());
            }
            root.put_table(name.clone(), TableId::generate(), &Table::create(&store, schema)?)?;
            Ok(())
        })?;
        info!(table = %name, branch = %self.branch, "created table");
        Ok(())
    }

    pub fn drop_table(&self, name: &TableName) -> SessionResult<()> {
        self.modify(|root, _| {
            root.remove(name)
                .map(|_| ())
                .ok_or_else(|| StorageError::TableNotFound(name.clone()).into())
        })
    }

    /// Rename a table, keeping its identity (and any conflicts recorded for it).
    pub fn rename_table(&self, from: &TableName, to: &TableName) -> SessionResult<()> {
        let store = self.store().clone();
        self.modify(|root, _| {
            root.rename(from, to.clone())?;
            let mut conflicts = ConflictSet::load(&store, root)?;
            conflicts.rename_table(from, to);
            conflicts.attach(&store, root)?;
            Ok(())
        })
    }

    /// Run `f` against an editor of a working table and store the result.
    pub fn edit_table<T>(&self, name: &TableName, f: impl FnOnce(&mut TableEditor) -> SessionResult<T>) -> SessionResult<T> {
        let store = self.store().clone();
        self.modify(|root, _| {
            let entry = root
                .entry(name)
                .cloned()
                .ok_or_else(|| StorageError::TableNotFound(name.clone()))?;
            let mut editor = Table::load(&store, &entry.table)?.edit();
            let out = f(&mut editor)?;
            root.put_table(name.clone(), entry.id, &editor.finish()?)?;
            Ok(out)
        })
    }

    pub fn insert(&self, table: &TableName, rows: &[Row]) -> SessionResult<usize> {
        self.edit_table(table, |edit| {
            for row in rows {
                edit.insert(row)?;
            }
            Ok(rows.len())
        })
    }

    pub fn update(&self, table: &TableName, rows: &[Row]) -> SessionResult<usize> {
        self.edit_table(table, |edit| {
            for row in rows {
                edit.update(row)?;
            }
            Ok(rows.len())
        })
    }

    pub fn upsert(&self, table: &TableName, rows: &[Row]) -> SessionResult<usize> {
        self.edit_table(table, |edit| {
            for row in rows {
                edit.upsert(row)?;
            }
            Ok(rows.len())
        })
    }

    /// Delete rows (one copy each for key-less tables). Returns how many
    /// existed.
    pub fn delete(&self, table: &TableName, rows: &[Row]) -> SessionResult<usize> {
        self.edit_table(table, |edit| {
            let mut deleted = 0;
            for row in rows {
                deleted += usize::from(edit.delete(row)?);
            }
            Ok(deleted)
        })
    }

    /// Delete rows by primary key. Returns how many existed.
    pub fn delete_keys(&self, table: &TableName, keys: &[Vec<Value>]) -> SessionResult<usize> {
        self.edit_table(table, |edit| {
            let mut deleted = 0;
            for key in keys {
                deleted += usize::from(edit.delete_key(key)?);
            }
            Ok(deleted)
        })
    }

    // ==================== Schema changes ====================

    /// Replace a table's schema, rewriting rows as needed. Values that can't
    /// be coerced become null and are reported.
    pub fn alter_table(&self, name: &TableName, schema: Schema) -> SessionResult<Warnings> {
        self.alter_with(name, |_| Ok(schema))
    }

    fn alter_with(&self, name: &TableName, f: impl FnOnce(&Schema) -> Result<Schema, SchemaError>) -> SessionResult<Warnings> {
        let store = self.store().clone();
        let mut warnings = self.repo.config().warnings();
        self.modify(|root, _| {
            let entry = root
                .entry(name)
                .cloned()
                .ok_or_else(|| StorageError::TableNotFound(name.clone()))?;
            let table = Table::load(&store, &entry.table)?;
            let schema = f(table.schema())?;
            root.put_table(name.clone(), entry.id, &table.alter(schema, &mut warnings)?)?;
            Ok(())
        })?;
        Ok(warnings)
    }

    /// Add a column. A default, if set, is written into every existing row.
    pub fn add_column(&self, table: &TableName, column: Column) -> SessionResult<Warnings> {
        self.alter_with(table, |schema| schema.add_column(column))
    }

    pub fn drop_column(&self, table: &TableName, column: &str) -> SessionResult<Warnings> {
        self.alter_with(table, |schema| schema.drop_column(column))
    }

    pub fn rename_column(&self, table: &TableName, from: &str, to: &str) -> SessionResult<Warnings> {
        self.alter_with(table, |schema| schema.rename_column(from, to))
    }

    pub fn modify_column(&self, table: &TableName, column: &str, data_type: DataType, nullable: bool) -> SessionResult<Warnings> {
        self.alter_with(table, |schema| schema.modify_column(column, data_type, nullable))
    }

    /// Redefine the primary key; an empty list makes the table key-less.
    pub fn set_primary_key(&self, table: &TableName, columns: &[&str]) -> SessionResult<Warnings> {
        self.alter_with(table, |schema| schema.with_primary_key(columns))
    }

    // ==================== Staging and commits ====================

    /// Stage tables from the working root. A renamed table is staged under
    /// its new name; a deleted one is removed from the staged root.
    pub fn add(&self, tables: &[TableName]) -> SessionResult<()> {
        let (ws_id, mut ws) = self.state()?;
        let working = Root::load(self.store(), &ws.working)?;
        let mut staged = Root::load(self.store(), &ws.staged)?;
        for name in tables {
            match working.entry(name) {
                Some(entry) => {
                    let previous = staged.find_by_id(&entry.id).map(|(old, _)| old.clone());
                    if let Some(old) = previous {
                        staged.remove(&old);
                    }
                    staged.put(name.clone(), entry.clone());
                }
                None if staged.contains(name) => {
                    staged.remove(name);
                }
                None => return Err(StorageError::TableNotFound(name.clone()).into()),
            }
        }
        staged.set_conflicts(working.conflicts());
        ws.staged = staged.write(self.store())?;
        self.save(ws_id, &ws)?;
        Ok(())
    }

    /// Stage the whole working root.
    pub fn add_all(&self) -> SessionResult<()> {
        let (ws_id, mut ws) = self.state()?;
        ws.staged = ws.working;
        self.save(ws_id, &ws)?;
        Ok(())
    }

    /// Commit the staged root. During a merge the working root is committed
    /// with theirs as the second parent (or as a single-parent commit for a
    /// squash merge). Outstanding conflicts block the commit unless the
    /// repository allows committing them.
    pub fn commit(&self, message: &str, options: CommitOptions) -> SessionResult<CommitId> {
        let (ws_id, mut ws) = self.state()?;
        let store = self.store();

        let working = Root::load(store, &ws.working)?;
        let conflicts = ConflictSet::load(store, &working)?;
        if !conflicts.is_empty() && !self.repo.config().allow_commit_conflicts {
            return Err(MergeError::UnresolvedConflicts {
                count: conflicts.len(),
            }
            .into());
        }

        let head = self.head()?;
        let (root, parents, default_message) = match &ws.merge {
            Some(merge) if merge.squash => (ws.working, vec![merge.ours], CommitMessage::squash(&merge.theirs_label)),
            Some(merge) => (
                ws.working,
                vec![merge.ours, merge.theirs],
                CommitMessage::merge(&merge.theirs_label, self.branch.as_str()),
            ),
            None => (ws.staged, vec![head], String::new()),
        };
        if ws.merge.is_none() && root == self.repo.graph().commit(head)?.root && !options.allow_empty {
            return Err(SessionError::NothingToCommit);
        }
        let message = if message.trim().is_empty() && !default_message.is_empty() {
            default_message
        } else {
            message.to_string()
        };

        let expected = parents[0];
        let mut builder = CommitBuilder::new(store)
            .root(root)
            .parents(parents)
            .message(message)
            .author(options.author.unwrap_or_else(|| self.repo.config().author.clone()));
        if let Some(timestamp) = options.timestamp {
            builder = builder.timestamp(timestamp);
        }
        let commit = builder.commit()?;
        RefManager::update_branch_if_unchanged(store.refs(), &self.branch, expected, commit)?;

        let merged = ws.merge.take().is_some();
        ws.staged = root;
        self.save(ws_id, &ws)?;
        info!(
            branch = %self.branch,
            commit = %commit.short(),
            merge = merged,
            conflicts = conflicts.len(),
            "committed"
        );
        Ok(commit)
    }

    /// Stage everything, then commit.
    pub fn commit_all(&self, message: &str, options: CommitOptions) -> SessionResult<CommitId> {
        self.add_all()?;
        self.commit(message, options)
    }

    /// Staged and unstaged table changes.
    pub fn status(&self) -> SessionResult<Status> {
        let ws = self.working_set()?;
        let head = self.head()?;
        let head_root = self.repo.root_of(head)?;
        let staged = Root::load(self.store(), &ws.staged)?;
        let working = Root::load(self.store(), &ws.working)?;
        Ok(Status {
            branch: self.branch.clone(),
            head,
            merging: ws.merge.as_ref().map(|m| m.theirs),
            staged: status::changes(self.store(), &head_root, &staged)?,
            unstaged: status::changes(self.store(), &staged, &working)?,
            conflicts: ConflictSet::load(self.store(), &working)?.tables(),
        })
    }

    /// The working set differs from the branch tip.
    pub fn has_changes(&self) -> SessionResult<bool> {
        let ws = self.working_set()?;
        let head_root = self.repo.graph().commit(self.head()?)?.root;
        Ok(ws.is_merging() || ws.working != head_root || ws.staged != head_root)
    }

    // ==================== Branches ====================

    /// Switch to another branch. Refused when the current working set has
    /// uncommitted changes.
    pub fn checkout(&mut self, branch: &BranchName) -> SessionResult<()> {
        if branch == &self.branch {
            return Ok(());
        }
        if self.has_changes()? {
            return Err(SessionError::UncommittedChanges(self.branch.clone()));
        }
        if !RefManager::branch_exists(self.store().refs(), branch)? {
            return Err(StorageError::RefNotFound(branch.to_string()).into());
        }
        self.repo.ensure_working_set(branch)?;
        info!(from = %self.branch, to = %branch, "checked out branch");
        self.branch = branch.clone();
        Ok(())
    }

    /// Create a branch at the current head and switch to it. Uncommitted
    /// changes move to the new branch; the old branch is left clean.
    pub fn checkout_new_branch(&mut self, branch: &BranchName) -> SessionResult<()> {
        let (ws_id, ws) = self.state()?;
        if ws.is_merging() {
            return Err(MergeError::MergeInProgress.into());
        }
        let head = self.head()?;
        RefManager::create_branch(self.store().refs(), branch, head)?;

        let existing = WorkingSet::load(self.store(), branch)?.map(|(id, _)| id);
        ws.save(self.store(), branch, existing)?;
        let head_root = self.repo.graph().commit(head)?.root;
        self.save(ws_id, &WorkingSet::clean(head_root))?;

        info!(from = %self.branch, to = %branch, "checked out new branch");
        self.branch = branch.clone();
        Ok(())
    }

    /// Delete a branch other than the checked out one.
    pub fn delete_branch(&self, branch: &BranchName) -> SessionResult<()> {
        if branch == &self.branch {
            return Err(SessionError::CheckedOutBranch(branch.clone()));
        }
        self.repo.delete_branch(branch)
    }

    // ==================== Diffs and history ====================

    /// Delta of one table between two refs. With `strict`, `to` must
    /// descend from `from`; the working set counts as a descendant of the
    /// branch head.
    pub fn diff(&self, table: &TableName, from: &str, to: &str, strict: bool) -> SessionResult<TableDelta> {
        let from_target = self.resolve(from)?;
        let to_target = self.resolve(to)?;
        if strict {
            self.check_ancestry(from, from_target, to, to_target)?;
        }
        let from_root = self.root_at(from_target)?;
        let to_root = self.root_at(to_target)?;
        Ok(diff_table(self.store(), table, &from_root, &to_root)?)
    }

    fn check_ancestry(&self, from: &str, from_target: RefTarget, to: &str, to_target: RefTarget) -> SessionResult<()> {
        let as_commit = |target: RefTarget| -> SessionResult<CommitId> {
            match target {
                RefTarget::Commit(id) => Ok(id),
                RefTarget::Working | RefTarget::Staged => self.head(),
            }
        };
        let ordered = match (from_target, to_target) {
            (RefTarget::Commit(_), _) => self.repo.graph().is_ancestor(as_commit(from_target)?, as_commit(to_target)?)?,
            // the working set only precedes itself
            (_, RefTarget::Commit(_)) => false,
            (f, t) => f == t || (f == RefTarget::Staged && t == RefTarget::Working),
        };
        if !ordered {
            return Err(DiffError::InvalidAncestry {
                from: from.to_string(),
                to: to.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Deltas of every changed table between two refs. Tables that can't be
    /// read are listed as failures next to the others.
    pub fn diff_tables(&self, from: &str, to: &str) -> SessionResult<PartialDiff<TableDelta>> {
        let from_root = self.root(from)?;
        let to_root = self.root(to)?;
        Ok(diff_roots(self.store(), &from_root, &to_root))
    }

    /// Table-level summary of everything that changed between two refs.
    pub fn diff_all(&self, from: &str, to: &str) -> SessionResult<PartialDiff<DeltaSummary>> {
        let from_root = self.root(from)?;
        let to_root = self.root(to)?;
        Ok(diff_all(self.store(), &from_root, &to_root))
    }

    /// Commits reachable from `expr`, newest first.
    pub fn log(&self, expr: &str) -> SessionResult<Vec<CommitInfo>> {
        let start = self.resolve_commit(expr)?;
        Ok(self.repo.graph().history(start).collect::<Result<_, _>>()?)
    }
}
