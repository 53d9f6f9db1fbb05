//! Merging into a session's branch.
//!
//! `begin_merge` either finishes immediately (up to date, fast-forward) or
//! leaves the branch's working set in the merging state: the working root is
//! the merge candidate, conflicts are attached to it, and the pre-merge roots
//! are kept for `abort_merge`. `commit` finishes the merge.

use std::collections::BTreeSet;

use tracing::{debug, info};

use super::error::SessionResult;
use super::session::Session;
use super::working_set::{MergeState, WorkingSet};
use crate::merge::{
    merge_roots_with, Conflict, ConflictSet, MergeError, Resolution, TableConflict, TableMergeStats,
};
use crate::catalog::Value;
use crate::snapshot::{Root, Table};
use crate::storage::{CommitId, RefManager, StorageError, TableId, TableName};
use crate::warnings::Warnings;

/// Options of [`Session::begin_merge`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeOptions {
    /// create a merge commit even when a fast-forward is possible
    pub no_ff: bool,
    /// commit the merged root with a single parent
    pub squash: bool,
}

impl MergeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_ff(mut self, value: bool) -> Self {
        self.no_ff = value;
        self
    }

    pub fn squash(mut self, value: bool) -> Self {
        self.squash = value;
        self
    }
}

/// Summary of a merge left in progress.
#[derive(Debug, Clone)]
pub struct MergeReport {
    pub base: CommitId,
    pub theirs: CommitId,
    /// number of row and table conflicts
    pub conflicts: usize,
    pub unmerged_tables: BTreeSet<TableName>,
    pub stats: Vec<TableMergeStats>,
    pub warnings: Warnings,
}

/// What [`Session::begin_merge`] did.
#[derive(Debug, Clone)]
pub enum MergeStatus {
    /// theirs is already part of this branch
    UpToDate,
    /// the branch moved to theirs without a merge commit
    FastForward { commit: CommitId },
    /// the working set holds the merge candidate until commit or abort
    Merging(MergeReport),
}

impl Session {
    /// Start merging `theirs` (any ref expression) into this branch.
    pub fn begin_merge(&self, theirs: &str, options: MergeOptions) -> SessionResult<MergeStatus> {
        let (ws_id, ws) = self.state()?;
        if ws.is_merging() {
            return Err(MergeError::MergeInProgress.into());
        }
        if self.has_changes()? {
            return Err(MergeError::LocalChanges.into());
        }

        let graph = self.repository().graph();
        let ours_id = self.head()?;
        let theirs_id = self.resolve_commit(theirs)?;
        if graph.is_ancestor(theirs_id, ours_id)? {
            debug!(theirs = %theirs_id.short(), "already up to date");
            return Ok(MergeStatus::UpToDate);
        }

        let base_id = graph.merge_base(ours_id, theirs_id)?;
        if base_id == ours_id && !options.no_ff && !options.squash {
            RefManager::update_branch_if_unchanged(self.store().refs(), self.branch(), ours_id, theirs_id)?;
            self.save(ws_id, &WorkingSet::clean(graph.commit(theirs_id)?.root))?;
            info!(branch = %self.branch(), commit = %theirs_id.short(), "fast-forward");
            return Ok(MergeStatus::FastForward { commit: theirs_id });
        }

        let repo = self.repository();
        let base = repo.root_of(base_id)?;
        let ours = repo.root_of(ours_id)?;
        let other = repo.root_of(theirs_id)?;
        let outcome = merge_roots_with(self.store(), &base, &ours, &other, repo.config().warnings())?;

        let merged = outcome.root.write(self.store())?;
        let unmerged_tables = outcome.unmerged_tables();
        let next = WorkingSet {
            working: merged,
            staged: merged,
            merge: Some(MergeState {
                pre_merge_working: ws.working,
                pre_merge_staged: ws.staged,
                ours: ours_id,
                theirs: theirs_id,
                base: base_id,
                theirs_label: theirs.trim().to_string(),
                unmerged_tables: unmerged_tables.clone(),
                squash: options.squash,
            }),
        };
        self.save(ws_id, &next)?;

        info!(
            branch = %self.branch(),
            theirs = %theirs_id.short(),
            base = %base_id.short(),
            conflicts = outcome.conflicts.len(),
            "merge in progress"
        );
        Ok(MergeStatus::Merging(MergeReport {
            base: base_id,
            theirs: theirs_id,
            conflicts: outcome.conflicts.len(),
            unmerged_tables,
            stats: outcome.stats,
            warnings: outcome.warnings,
        }))
    }

    /// Throw the merge candidate away and restore the pre-merge roots.
    pub fn abort_merge(&self) -> SessionResult<()> {
        let (ws_id, ws) = self.state()?;
        let merge = ws.merge.ok_or(MergeError::NotMerging)?;
        let restored = WorkingSet {
            working: merge.pre_merge_working,
            staged: merge.pre_merge_staged,
            merge: None,
        };
        self.save(ws_id, &restored)?;
        info!(branch = %self.branch(), theirs = %merge.theirs.short(), "merge aborted");
        Ok(())
    }

    pub fn merge_state(&self) -> SessionResult<Option<MergeState>> {
        Ok(self.working_set()?.merge)
    }

    fn conflict_set(&self) -> SessionResult<ConflictSet> {
        Ok(ConflictSet::load(self.store(), &self.working_root()?)?)
    }

    /// Outstanding row conflicts, of one table or of all.
    pub fn conflicts(&self, table: Option<&TableName>) -> SessionResult<Vec<Conflict>> {
        let set = self.conflict_set()?;
        Ok(match table {
            Some(name) => set.for_table(name).cloned().collect(),
            None => set.rows().to_vec(),
        })
    }

    /// Outstanding table-level conflicts.
    pub fn table_conflicts(&self) -> SessionResult<Vec<TableConflict>> {
        Ok(self.conflict_set()?.table_conflicts().to_vec())
    }

    /// Mark every conflict of `table` resolved, keeping the merged contents.
    pub fn delete_conflicts(&self, table: &TableName) -> SessionResult<usize> {
        let store = self.store().clone();
        self.modify(|root, _| {
            let mut set = ConflictSet::load(&store, root)?;
            let removed = set.remove_table(table);
            set.attach(&store, root)?;
            Ok(removed)
        })
    }

    /// Mark one row conflict resolved, keeping the merged row.
    pub fn delete_conflict(&self, table: &TableName, key: &[Value]) -> SessionResult<bool> {
        let store = self.store().clone();
        self.modify(|root, _| {
            let mut set = ConflictSet::load(&store, root)?;
            let removed = set.remove_row(table, key).is_some();
            set.attach(&store, root)?;
            Ok(removed)
        })
    }

    /// Resolve one row conflict by writing the chosen version.
    pub fn resolve_conflict(&self, table: &TableName, key: &[Value], resolution: Resolution) -> SessionResult<bool> {
        let store = self.store().clone();
        self.modify(|root, _| {
            let mut set = ConflictSet::load(&store, root)?;
            let Some(conflict) = set.remove_row(table, key) else {
                return Ok(false);
            };
            let entry = root
                .entry(table)
                .cloned()
                .ok_or_else(|| StorageError::TableNotFound(table.clone()))?;
            let resolved = crate::merge::resolve_row(&Table::load(&store, &entry.table)?, &conflict, resolution)?;
            root.put_table(table.clone(), entry.id, &resolved)?;
            set.attach(&store, root)?;
            Ok(true)
        })
    }

    /// Resolve every conflict of `table` with the same choice. A table-level
    /// conflict replaces the table with the chosen side's version (or removes
    /// it when that side has none). Returns how many conflicts were resolved.
    pub fn resolve_conflicts(&self, table: &TableName, resolution: Resolution) -> SessionResult<usize> {
        let store = self.store().clone();
        self.modify(|root, _| {
            let mut set = ConflictSet::load(&store, root)?;
            let mut resolved = 0;

            if let Some(conflict) = set.remove_table_conflict(table) {
                let involved: BTreeSet<TableId> = [&conflict.base, &conflict.ours, &conflict.theirs]
                    .into_iter()
                    .flatten()
                    .map(|named| named.entry.id.clone())
                    .collect();
                remove_ids(root, &involved);
                if let Some(chosen) = conflict.pick(resolution) {
                    root.put(chosen.name.clone(), chosen.entry.clone());
                }
                resolved += 1;
            }

            let rows: Vec<Conflict> = set.for_table(table).cloned().collect();
            if !rows.is_empty() {
                let entry = root
                    .entry(table)
                    .cloned()
                    .ok_or_else(|| StorageError::TableNotFound(table.clone()))?;
                let mut edit = Table::load(&store, &entry.table)?.edit();
                for conflict in &rows {
                    match conflict.pick(resolution) {
                        Some(row) => edit.upsert(row)?,
                        None => {
                            edit.delete_key(&conflict.key)?;
                        }
                    }
                }
                root.put_table(table.clone(), entry.id, &edit.finish()?)?;
                resolved += set.remove_table(table);
            }

            set.attach(&store, root)?;
            debug!(table = %table, resolved, ?resolution, "conflicts resolved");
            Ok(resolved)
        })
    }
}

fn remove_ids(root: &mut Root, ids: &BTreeSet<TableId>) {
    let names: Vec<TableName> = root
        .entries()
        .filter(|(_, entry)| ids.contains(&entry.id))
        .map(|(name, _)| name.clone())
        .collect();
    for name in names {
        root.remove(&name);
    }
}
