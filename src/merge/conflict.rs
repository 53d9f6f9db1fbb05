//! Merge conflicts and their persistence.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::{format_key, Row, Value};
use crate::snapshot::{Root, RootEntry, Table};
use crate::storage::{ObjectId, StorageResult, Store, TableName};

/// A row both sides changed to different values.
///
/// `None` means the row is absent on that side (never existed, or deleted).
/// The merged table holds the `base` version until the conflict is resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub table: TableName,
    /// primary key values
    pub key: Vec<Value>,
    pub base: Option<Row>,
    pub ours: Option<Row>,
    pub theirs: Option<Row>,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.table, format_key(&self.key))
    }
}

/// A table-level version as recorded in a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedEntry {
    pub name: TableName,
    pub entry: RootEntry,
}

/// A table the merge could not reconcile as a whole: incompatible schema
/// changes, delete against modify, clashing renames or names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConflict {
    pub table: TableName,
    pub reason: String,
    pub base: Option<NamedEntry>,
    pub ours: Option<NamedEntry>,
    pub theirs: Option<NamedEntry>,
}

impl fmt::Display for TableConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.table, self.reason)
    }
}

/// Which version wins when resolving a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Ours,
    Theirs,
    Base,
}

impl Conflict {
    /// the row version chosen by `resolution`
    pub fn pick(&self, resolution: Resolution) -> Option<&Row> {
        match resolution {
            Resolution::Ours => self.ours.as_ref(),
            Resolution::Theirs => self.theirs.as_ref(),
            Resolution::Base => self.base.as_ref(),
        }
    }
}

/// Write the version of a conflicted row chosen by `resolution` into `table`.
pub fn resolve_row(table: &Table, conflict: &Conflict, resolution: Resolution) -> StorageResult<Table> {
    let mut edit = table.edit();
    match conflict.pick(resolution) {
        Some(row) => edit.upsert(row)?,
        None => {
            edit.delete_key(&conflict.key)?;
        }
    }
    edit.finish()
}

impl TableConflict {
    pub fn pick(&self, resolution: Resolution) -> Option<&NamedEntry> {
        match resolution {
            Resolution::Ours => self.ours.as_ref(),
            Resolution::Theirs => self.theirs.as_ref(),
            Resolution::Base => self.base.as_ref(),
        }
    }
}

/// All outstanding conflicts of a merge, stored next to the merged root.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConflictSet {
    #[serde(default)]
    rows: Vec<Conflict>,
    #[serde(default)]
    tables: Vec<TableConflict>,
}

impl ConflictSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Conflicts recorded in `root`, empty when there are none.
    pub fn load(store: &Store, root: &Root) -> StorageResult<Self> {
        match root.conflicts() {
            Some(id) => store.read_json(&id),
            None => Ok(Self::default()),
        }
    }

    /// Store the set and point `root` at it (or clear the pointer when empty).
    pub fn attach(&self, store: &Store, root: &mut Root) -> StorageResult<Option<ObjectId>> {
        let id = if self.is_empty() {
            None
        } else {
            Some(store.write_json(self)?)
        };
        root.set_conflicts(id);
        Ok(id)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.tables.is_empty()
    }

    /// total number of row and table conflicts
    pub fn len(&self) -> usize {
        self.rows.len() + self.tables.len()
    }

    pub fn push(&mut self, conflict: Conflict) {
        self.rows.push(conflict);
    }

    pub fn push_table(&mut self, conflict: TableConflict) {
        self.tables.push(conflict);
    }

    pub fn rows(&self) -> &[Conflict] {
        &self.rows
    }

    pub fn table_conflicts(&self) -> &[TableConflict] {
        &self.tables
    }

    /// Row conflicts of one table.
    pub fn for_table<'a>(&'a self, table: &'a TableName) -> impl Iterator<Item = &'a Conflict> + 'a {
        self.rows.iter().filter(move |c| &c.table == table)
    }

    /// Names of tables with any outstanding conflict.
    pub fn tables(&self) -> BTreeSet<TableName> {
        self.rows
            .iter()
            .map(|c| c.table.clone())
            .chain(self.tables.iter().map(|c| c.table.clone()))
            .collect()
    }

    /// Drop every conflict of `table`. Returns how many were removed.
    pub fn remove_table(&mut self, table: &TableName) -> usize {
        let before = self.len();
        self.rows.retain(|c| &c.table != table);
        self.tables.retain(|c| &c.table != table);
        before - self.len()
    }

    /// Remove one row conflict.
    pub fn remove_row(&mut self, table: &TableName, key: &[Value]) -> Option<Conflict> {
        let pos = self.rows.iter().position(|c| &c.table == table && c.key == key)?;
        Some(self.rows.remove(pos))
    }

    /// Remove the table-level conflict of `table`.
    pub fn remove_table_conflict(&mut self, table: &TableName) -> Option<TableConflict> {
        let pos = self.tables.iter().position(|c| &c.table == table)?;
        Some(self.tables.remove(pos))
    }

    /// Rename every conflict of a table.
    pub(crate) fn rename_table(&mut self, from: &TableName, to: &TableName) {
        for conflict in self.rows.iter_mut().filter(|c| &c.table == from) {
            conflict.table = to.clone();
        }
        for conflict in self.tables.iter_mut().filter(|c| &c.table == from) {
            conflict.table = to.clone();
        }
    }

    pub fn extend(&mut self, other: ConflictSet) {
        self.rows.extend(other.rows);
        self.tables.extend(other.tables);
    }
}
