//! Table matching between two roots.

use std::collections::BTreeSet;

use tracing::warn;

use super::delta::{compute_delta, DeltaSummary, TableDelta, TableVersion};
use super::error::{DiffError, DiffResult};
use crate::snapshot::Root;
use crate::storage::{StorageError, StorageResult, Store, TableId, TableName};
use crate::warnings::{Warning, Warnings};

/// Delta for one table name between two roots.
///
/// A table renamed between the roots is followed through its identity, in
/// either direction. If the name refers to unrelated tables at the two ends
/// the delta is [`Replaced`](super::TableChange::Replaced).
pub fn diff_table(store: &Store, name: &TableName, from: &Root, to: &Root) -> DiffResult<TableDelta> {
    let from_entry = from.entry(name);
    let to_entry = to.entry(name);

    let (from_version, to_version) = match (from_entry, to_entry) {
        (None, None) => return Err(DiffError::TableNotFound(name.to_string())),
        (Some(f), Some(t)) => (
            Some(TableVersion::from_entry(store, name, f)?),
            Some(TableVersion::from_entry(store, name, t)?),
        ),
        (Some(f), None) => {
            let renamed = to
                .find_by_id(&f.id)
                .map(|(n, e)| TableVersion::from_entry(store, n, e))
                .transpose()?;
            (Some(TableVersion::from_entry(store, name, f)?), renamed)
        }
        (None, Some(t)) => {
            let renamed = from
                .find_by_id(&t.id)
                .map(|(n, e)| TableVersion::from_entry(store, n, e))
                .transpose()?;
            (renamed, Some(TableVersion::from_entry(store, name, t)?))
        }
    };
    Ok(compute_delta(from_version, to_version))
}

/// A table whose delta could not be computed.
#[derive(Debug)]
pub struct TableFailure {
    pub name: TableName,
    pub error: StorageError,
}

/// Per-table results of a whole-root diff. Tables that fail to load or
/// summarize are reported in `failures`; the others are still returned.
#[derive(Debug)]
pub struct PartialDiff<T> {
    pub items: Vec<T>,
    pub failures: Vec<TableFailure>,
}

impl<T> PartialDiff<T> {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// All items, or the first failure.
    pub fn into_result(self) -> StorageResult<Vec<T>> {
        match self.failures.into_iter().next() {
            Some(failure) => Err(failure.error),
            None => Ok(self.items),
        }
    }
}

impl PartialDiff<DeltaSummary> {
    /// Degraded-diff warnings of the summarized tables.
    pub fn warnings(&self) -> Warnings {
        let mut warnings = Warnings::new();
        for summary in &self.items {
            if let (Some(reason), Some(name)) = (&summary.degraded, summary.name()) {
                warnings.push(Warning::DegradedDiff {
                    table: name.to_string(),
                    reason: reason.clone(),
                });
            }
        }
        warnings
    }
}

/// Deltas of every table that differs between two roots, matched by
/// identity. A table dropped and recreated under the same name shows up as
/// one `Dropped` and one `Added` delta. Unchanged tables are left out.
pub fn diff_roots(store: &Store, from: &Root, to: &Root) -> PartialDiff<TableDelta> {
    let mut deltas = Vec::new();
    let mut failures = Vec::new();
    let mut seen: BTreeSet<TableId> = BTreeSet::new();

    for (name, entry) in from.entries() {
        seen.insert(entry.id.clone());
        let to_entry = match to.find_by_id(&entry.id) {
            Some((to_name, to_entry)) if to_name == name && to_entry.table == entry.table => continue,
            found => found,
        };
        let delta = TableVersion::from_entry(store, name, entry).and_then(|from_version| {
            let to_version = to_entry
                .map(|(to_name, to_entry)| TableVersion::from_entry(store, to_name, to_entry))
                .transpose()?;
            Ok(compute_delta(Some(from_version), to_version))
        });
        match delta {
            Ok(delta) => deltas.push(delta),
            Err(error) => failures.push(failed(name, error)),
        }
    }
    for (name, entry) in to.entries() {
        if seen.contains(&entry.id) {
            continue;
        }
        match TableVersion::from_entry(store, name, entry) {
            Ok(version) => deltas.push(compute_delta(None, Some(version))),
            Err(error) => failures.push(failed(name, error)),
        }
    }
    deltas.sort_by(|a, b| sort_name(a).cmp(&sort_name(b)));
    PartialDiff {
        items: deltas,
        failures,
    }
}

fn failed(name: &TableName, error: StorageError) -> TableFailure {
    warn!(table = %name, error = %error, "table skipped in root diff");
    TableFailure {
        name: name.clone(),
        error,
    }
}

fn sort_name(delta: &TableDelta) -> Option<&TableName> {
    delta.to_name().or(delta.from_name())
}

/// Table-level summaries of [`diff_roots`].
pub fn diff_all(store: &Store, from: &Root, to: &Root) -> PartialDiff<DeltaSummary> {
    let PartialDiff { items, mut failures } = diff_roots(store, from, to);
    let mut summaries = Vec::with_capacity(items.len());
    for delta in &items {
        match delta.summary() {
            Ok(summary) => summaries.push(summary),
            Err(error) => {
                if let Some(name) = sort_name(delta) {
                    failures.push(failed(name, error));
                }
            }
        }
    }
    PartialDiff {
        items: summaries,
        failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DataType, SchemaBuilder};
    use crate::diff::TableChange;
    use crate::snapshot::{RootEntry, Table};
    use crate::storage::ObjectId;

    fn name(s: &str) -> TableName {
        TableName::new(s).unwrap()
    }

    fn table(store: &Store, pk: i64) -> Table {
        let schema = SchemaBuilder::new()
            .add_required_column("pk", DataType::Int)
            .primary_key("pk")
            .build()
            .unwrap();
        let mut edit = Table::create(store, schema.clone()).unwrap().edit();
        edit.insert(&schema.row([("pk", pk)]).unwrap()).unwrap();
        edit.finish().unwrap()
    }

    #[test]
    fn test_diff_roots_matches_by_identity() {
        let store = Store::in_memory();
        let mut from = Root::empty();
        let kept = TableId::generate();
        let recreated = TableId::generate();
        from.put_table(name("kept"), kept, &table(&store, 1)).unwrap();
        from.put_table(name("old"), TableId::generate(), &table(&store, 1)).unwrap();
        from.put_table(name("same"), recreated, &table(&store, 1)).unwrap();

        let mut to = from.clone();
        to.rename(&name("kept"), name("moved")).unwrap();
        to.remove(&name("old"));
        to.remove(&name("same"));
        to.put_table(name("same"), TableId::generate(), &table(&store, 1)).unwrap();

        let diff = diff_roots(&store, &from, &to);
        assert!(diff.is_complete());
        let changes: Vec<(String, TableChange)> = diff
            .items
            .iter()
            .map(|d| (sort_name(d).unwrap().to_string(), d.change()))
            .collect();
        assert_eq!(
            changes,
            vec![
                ("moved".to_string(), TableChange::Renamed),
                ("old".to_string(), TableChange::Dropped),
                ("same".to_string(), TableChange::Dropped),
                ("same".to_string(), TableChange::Added),
            ]
        );
    }

    #[test]
    fn test_diff_table_follows_renames() {
        let store = Store::in_memory();
        let mut from = Root::empty();
        from.put_table(name("a"), TableId::generate(), &table(&store, 1)).unwrap();
        let mut to = from.clone();
        to.rename(&name("a"), name("b")).unwrap();

        let by_old = diff_table(&store, &name("a"), &from, &to).unwrap();
        let by_new = diff_table(&store, &name("b"), &from, &to).unwrap();
        assert_eq!(by_old.change(), TableChange::Renamed);
        assert_eq!(by_new.change(), TableChange::Renamed);
        assert!(diff_table(&store, &name("zzz"), &from, &to).unwrap_err().is_not_found());
    }

    #[test]
    fn test_diff_all_keeps_degraded_and_failed_tables_apart() {
        let store = Store::in_memory();
        let mut from = Root::empty();
        let t = table(&store, 1);
        from.put_table(name("plain"), TableId::generate(), &t).unwrap();
        from.put_table(name("rekeyed"), TableId::generate(), &t).unwrap();
        from.put_table(name("broken"), TableId::generate(), &t).unwrap();

        let mut to = from.clone();
        let mut edit = t.edit();
        edit.insert(&t.schema().row([("pk", 2)]).unwrap()).unwrap();
        to.put_table(name("plain"), from.entry(&name("plain")).unwrap().id.clone(), &edit.finish().unwrap())
            .unwrap();
        let keyless = t.alter(t.schema().with_primary_key(&[]).unwrap(), &mut Warnings::new()).unwrap();
        to.put_table(name("rekeyed"), from.entry(&name("rekeyed")).unwrap().id.clone(), &keyless)
            .unwrap();
        // points at an object the store never saw
        let missing = ObjectId::hash_bytes(b"missing table").unwrap();
        let broken_id = from.entry(&name("broken")).unwrap().id.clone();
        to.put(name("broken"), RootEntry { id: broken_id, table: missing });

        let diff = diff_all(&store, &from, &to);
        assert!(!diff.is_complete());
        assert_eq!(diff.failures.len(), 1);
        assert_eq!(diff.failures[0].name, name("broken"));
        assert!(matches!(diff.failures[0].error, StorageError::ObjectNotFound(_)));

        let names: Vec<_> = diff.items.iter().map(|s| s.name().unwrap().to_string()).collect();
        assert_eq!(names, vec!["plain", "rekeyed"]);
        assert!(diff.items[0].degraded.is_none());
        assert!(diff.items[1].degraded.is_some());
        assert!(diff.warnings().has_degraded_diff());
        assert_eq!(diff.warnings().total(), 1);
        assert!(diff.into_result().is_err());
    }

    #[test]
    fn test_identical_roots() {
        let store = Store::in_memory();
        let mut root = Root::empty();
        root.put_table(name("t"), TableId::generate(), &table(&store, 1)).unwrap();
        assert!(diff_all(&store, &root, &root).into_result().unwrap().is_empty());
    }
}
