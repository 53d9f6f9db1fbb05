//! Table deltas: schema and row differences between two table versions.

use tracing::warn;

use super::row_diff::{DiffType, RowDiff, RowDiffIter};
use crate::catalog::{reconcile, ColumnMapping, Schema, Value};
use crate::snapshot::{Root, RootEntry, Table};
use crate::storage::{ObjectId, StorageResult, Store, TableId, TableName};
use crate::warnings::{Warning, Warnings};

/// A table as found in one root.
#[derive(Debug, Clone)]
pub struct TableVersion {
    pub name: TableName,
    pub id: TableId,
    /// id of the stored table object
    pub object: ObjectId,
    pub table: Table,
}

impl TableVersion {
    pub fn from_entry(store: &Store, name: &TableName, entry: &RootEntry) -> StorageResult<Self> {
        Ok(Self {
            name: name.clone(),
            id: entry.id.clone(),
            object: entry.table,
            table: Table::load(store, &entry.table)?,
        })
    }

    /// Load `name` from `root`, if present.
    pub fn from_root(store: &Store, root: &Root, name: &TableName) -> StorageResult<Option<Self>> {
        root.entry(name)
            .map(|entry| Self::from_entry(store, name, entry))
            .transpose()
    }
}

/// Table-level classification of a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableChange {
    Added,
    Dropped,
    /// same identity under a new name (rows may have changed too)
    Renamed,
    Modified,
    Unchanged,
    /// the name refers to unrelated tables at the two ends (dropped, then
    /// created again)
    Replaced,
}

impl TableChange {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableChange::Added => "added",
            TableChange::Dropped => "dropped",
            TableChange::Renamed => "renamed",
            TableChange::Modified => "modified",
            TableChange::Unchanged => "unchanged",
            TableChange::Replaced => "replaced",
        }
    }
}

/// Schema and row differences between two versions of a table.
#[derive(Debug, Clone)]
pub struct TableDelta {
    from: Option<TableVersion>,
    to: Option<TableVersion>,
    change: TableChange,
    mapping: ColumnMapping,
    degraded: Option<String>,
}

/// Classify and prepare the delta between two table versions.
///
/// Identity decides pairing: versions with different [`TableId`]s are never
/// compared row by row, even when their names match.
pub fn compute_delta(from: Option<TableVersion>, to: Option<TableVersion>) -> TableDelta {
    let change = match (&from, &to) {
        (None, None) => TableChange::Unchanged,
        (None, Some(_)) => TableChange::Added,
        (Some(_), None) => TableChange::Dropped,
        (Some(f), Some(t)) if f.id != t.id => TableChange::Replaced,
        (Some(f), Some(t)) if f.name != t.name => TableChange::Renamed,
        (Some(f), Some(t)) if f.object == t.object => TableChange::Unchanged,
        _ => TableChange::Modified,
    };

    let empty = Schema::empty();
    let from_schema = from.as_ref().map_or(&empty, |v| v.table.schema());
    let to_schema = to.as_ref().map_or(&empty, |v| v.table.schema());
    let mapping = reconcile(from_schema, to_schema);

    let degraded = match (&from, &to) {
        (Some(f), Some(t)) if change != TableChange::Replaced => {
            let (fs, ts) = (f.table.schema(), t.table.schema());
            if fs.is_keyless() != ts.is_keyless() {
                Some("table switched between keyed and key-less".to_string())
            } else if fs.key_shape() != ts.key_shape() {
                Some("primary key set change".to_string())
            } else {
                None
            }
        }
        _ => None,
    };
    if let (Some(reason), Some(t)) = (&degraded, &to) {
        warn!(table = %t.name, reason = %reason, "degraded diff");
    }

    TableDelta {
        from,
        to,
        change,
        mapping,
        degraded,
    }
}

/// A [`RowDiff`] laid out over the union of both schemas' columns.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedDiff {
    /// values in the `to` schema, aligned with [`TableDelta::projection_columns`]
    pub to: Vec<Value>,
    /// `from` values coerced to the `to` types, aligned the same way
    pub from: Vec<Value>,
    pub diff_type: DiffType,
}

/// Cheap, table-level description of a delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaSummary {
    pub from_name: Option<TableName>,
    pub to_name: Option<TableName>,
    pub change: TableChange,
    pub schema_changed: bool,
    pub data_changed: bool,
    /// why the table's row diff is partial, see [`TableDelta::degraded_reason`]
    pub degraded: Option<String>,
}

impl DeltaSummary {
    /// name at the `to` end, or the `from` end for dropped tables
    pub fn name(&self) -> Option<&TableName> {
        self.to_name.as_ref().or(self.from_name.as_ref())
    }
}

/// Row counts of a delta.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub added: u64,
    pub removed: u64,
    pub modified: u64,
}

impl TableDelta {
    pub fn change(&self) -> TableChange {
        self.change
    }

    pub fn from(&self) -> Option<&TableVersion> {
        self.from.as_ref()
    }

    pub fn to(&self) -> Option<&TableVersion> {
        self.to.as_ref()
    }

    pub fn from_name(&self) -> Option<&TableName> {
        self.from.as_ref().map(|v| &v.name)
    }

    pub fn to_name(&self) -> Option<&TableName> {
        self.to.as_ref().map(|v| &v.name)
    }

    pub fn from_schema(&self) -> Option<&Schema> {
        self.from.as_ref().map(|v| v.table.schema())
    }

    pub fn to_schema(&self) -> Option<&Schema> {
        self.to.as_ref().map(|v| v.table.schema())
    }

    /// Tag-matched union of both column sets.
    pub fn mapping(&self) -> &ColumnMapping {
        &self.mapping
    }

    /// Why key-based matching was abandoned, if it was.
    pub fn degraded_reason(&self) -> Option<&str> {
        self.degraded.as_deref()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }

    /// Warnings attached to this delta (a degraded diff).
    pub fn warnings(&self) -> Warnings {
        let mut warnings = Warnings::new();
        if let Some(reason) = &self.degraded {
            let table = self.to_name().or(self.from_name()).map(|n| n.to_string()).unwrap_or_default();
            warnings.push(Warning::DegradedDiff {
                table,
                reason: reason.clone(),
            });
        }
        warnings
    }

    pub fn schema_changed(&self) -> bool {
        match (self.from_schema(), self.to_schema()) {
            (Some(f), Some(t)) => self.change == TableChange::Replaced || f != t,
            (None, None) => false,
            _ => true,
        }
    }

    /// Whether any row differs. Reads only the index roots for paired tables.
    pub fn data_changed(&self) -> StorageResult<bool> {
        Ok(match (&self.from, &self.to) {
            (Some(f), Some(t)) if self.change != TableChange::Replaced => f.table.rows() != t.table.rows(),
            (Some(f), Some(t)) => !f.table.rows().is_empty()? || !t.table.rows().is_empty()?,
            (Some(v), None) | (None, Some(v)) => !v.table.rows().is_empty()?,
            (None, None) => false,
        })
    }

    pub fn summary(&self) -> StorageResult<DeltaSummary> {
        Ok(DeltaSummary {
            from_name: self.from_name().cloned(),
            to_name: self.to_name().cloned(),
            change: self.change,
            schema_changed: self.schema_changed(),
            data_changed: self.data_changed()?,
            degraded: self.degraded.clone(),
        })
    }

    /// Row differences, ordered by primary key for keyed tables.
    pub fn row_diffs(&self) -> StorageResult<RowDiffIter> {
        let from = self.from.as_ref().map(|v| &v.table);
        let to = self.to.as_ref().map(|v| &v.table);
        match (from, to) {
            (Some(f), Some(t)) if self.change == TableChange::Replaced => Ok(RowDiffIter::unrelated(Some(f), Some(t))),
            (Some(f), Some(t)) if self.is_degraded() => RowDiffIter::by_content(f, t),
            (Some(f), Some(t)) => Ok(RowDiffIter::by_key(f, t)),
            (None, None) => Ok(RowDiffIter::empty()),
            (f, t) => Ok(RowDiffIter::unrelated(f, t)),
        }
    }

    /// Count added, removed and modified rows.
    pub fn stats(&self) -> StorageResult<DiffStats> {
        let mut stats = DiffStats::default();
        for diff in self.row_diffs()? {
            match diff?.diff_type() {
                DiffType::Added => stats.added += 1,
                DiffType::Removed => stats.removed += 1,
                DiffType::Modified => stats.modified += 1,
            }
        }
        Ok(stats)
    }

    /// Column names of the projection: `to_<name>` for every column, then
    /// `from_<name>`, then `diff_type`.
    pub fn projection_columns(&self) -> Vec<String> {
        let columns = self.mapping.columns();
        columns
            .iter()
            .map(|c| format!("to_{}", c.name()))
            .chain(columns.iter().map(|c| format!("from_{}", c.name())))
            .chain(std::iter::once("diff_type".to_string()))
            .collect()
    }

    /// Lay a row diff out over the union of both schemas. Values that fail
    /// coercion to the `to` type become null and are reported.
    pub fn project(&self, diff: &RowDiff, warnings: &mut Warnings) -> ProjectedDiff {
        ProjectedDiff {
            to: self.mapping.project_to(diff.to_row()),
            from: self.mapping.project_from(diff.from_row(), warnings),
            diff_type: diff.diff_type(),
        }
    }
}
