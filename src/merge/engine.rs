//! Root-level three-way merge.
//!
//! Tables are matched across base, ours and theirs by identity, so a table
//! renamed on one side still merges with its counterpart. Each table merges
//! schema first, then rows. Conflicts from every table are collected before
//! returning; a merge with conflicts still produces a complete candidate root.

use std::collections::BTreeSet;

use tracing::{debug, info};

use super::conflict::{ConflictSet, NamedEntry, TableConflict};
use super::row_merge::merge_rows;
use super::schema_merge::merge_schemas;
use crate::diff::{compute_delta, TableVersion};
use crate::snapshot::{Root, RootEntry, Table};
use crate::storage::{StorageError, StorageResult, Store, TableId, TableName};
use crate::warnings::Warnings;

/// Per-table numbers of a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMergeStats {
    pub table: TableName,
    /// row changes taken from theirs
    pub applied: usize,
    pub conflicts: usize,
}

/// Result of [`merge_roots`].
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// candidate root, with the conflict set attached when there is one
    pub root: Root,
    pub conflicts: ConflictSet,
    /// tables whose rows needed a real three-way merge
    pub stats: Vec<TableMergeStats>,
    pub warnings: Warnings,
}

impl MergeOutcome {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// Names of tables with conflicts.
    pub fn unmerged_tables(&self) -> BTreeSet<TableName> {
        self.conflicts.tables()
    }
}

/// Merge `ours` and `theirs` against their common ancestor `base`.
pub fn merge_roots(store: &Store, base: &Root, ours: &Root, theirs: &Root) -> StorageResult<MergeOutcome> {
    merge_roots_with(store, base, ours, theirs, Warnings::new())
}

/// [`merge_roots`] with a caller-provided warning collector.
pub fn merge_roots_with(
    store: &Store,
    base: &Root,
    ours: &Root,
    theirs: &Root,
    warnings: Warnings,
) -> StorageResult<MergeOutcome> {
    let mut merge = RootMerge {
        store,
        conflicts: ConflictSet::new(),
        stats: Vec::new(),
        warnings,
    };

    let mut placements = Vec::new();
    if ours.same_tables(theirs) || theirs.same_tables(base) {
        placements.extend(ours.entries().map(|(n, e)| named(n, e)));
    } else if ours.same_tables(base) {
        placements.extend(theirs.entries().map(|(n, e)| named(n, e)));
    } else {
        let ids: BTreeSet<TableId> = [base, ours, theirs]
            .iter()
            .flat_map(|root| root.entries().map(|(_, e)| e.id.clone()))
            .collect();
        for id in &ids {
            let find = |root: &Root| root.find_by_id(id).map(|(n, e)| named(n, e));
            if let Some(entry) = merge.table(find(base), find(ours), find(theirs))? {
                placements.push(entry);
            }
        }
    }

    // tables under the name ours uses claim it first
    placements.sort_by_key(|p| ours.entry(&p.name).map(|e| e.id != p.entry.id).unwrap_or(true));
    let mut root = Root::empty();
    for placed in placements {
        match root.entry(&placed.name) {
            Some(existing) => {
                let existing = named(&placed.name, existing);
                merge.conflicts.push_table(TableConflict {
                    table: placed.name.clone(),
                    reason: "table name used by two different tables".to_string(),
                    base: None,
                    ours: Some(existing),
                    theirs: Some(placed),
                });
            }
            None => root.put(placed.name, placed.entry),
        }
    }

    merge.conflicts.attach(store, &mut root)?;
    info!(
        tables = root.len(),
        merged_tables = merge.stats.len(),
        conflicts = merge.conflicts.len(),
        "roots merged"
    );
    Ok(MergeOutcome {
        root,
        conflicts: merge.conflicts,
        stats: merge.stats,
        warnings: merge.warnings,
    })
}

fn named(name: &TableName, entry: &RootEntry) -> NamedEntry {
    NamedEntry {
        name: name.clone(),
        entry: entry.clone(),
    }
}

struct RootMerge<'a> {
    store: &'a Store,
    conflicts: ConflictSet,
    stats: Vec<TableMergeStats>,
    warnings: Warnings,
}

impl RootMerge<'_> {
    /// Merge one table identity. Returns the entry to place in the merged
    /// root, if any.
    fn table(
        &mut self,
        base: Option<NamedEntry>,
        ours: Option<NamedEntry>,
        theirs: Option<NamedEntry>,
    ) -> StorageResult<Option<NamedEntry>> {
        let outcome = match (&base, &ours, &theirs) {
            (_, None, None) => Ok(None),
            (None, Some(only), None) | (None, None, Some(only)) => Ok(Some(only.clone())),
            (None, Some(o), Some(t)) if o == t => Ok(Some(o.clone())),
            (None, Some(_), Some(_)) => Err("table created on both sides with different contents".to_string()),
            (Some(b), None, Some(other)) | (Some(b), Some(other), None) => {
                if other.entry.table == b.entry.table {
                    Ok(None)
                } else {
                    Err("table deleted on one side and modified on the other".to_string())
                }
            }
            (Some(b), Some(o), Some(t)) => match merged_name(b, o, t) {
                Err(reason) => Err(reason),
                Ok(name) => {
                    let (b_id, o_id, t_id) = (b.entry.table, o.entry.table, t.entry.table);
                    if o_id == t_id || t_id == b_id {
                        Ok(Some(rename(o, name)))
                    } else if o_id == b_id {
                        Ok(Some(rename(t, name)))
                    } else {
                        self.contents(name, b, o, t)?
                    }
                }
            },
        };

        match outcome {
            Ok(entry) => Ok(entry),
            Err(reason) => {
                let table = ours
                    .as_ref()
                    .or(theirs.as_ref())
                    .or(base.as_ref())
                    .map(|e| e.name.clone())
                    .ok_or_else(|| StorageError::Internal("table conflict without a table".to_string()))?;
                debug!(table = %table, reason = %reason, "table conflict");
                self.conflicts.push_table(TableConflict {
                    table,
                    reason,
                    base: base.clone(),
                    ours,
                    theirs,
                });
                // the merged root keeps the base version until resolved
                Ok(base)
            }
        }
    }

    /// Merge schema and rows of a table changed on both sides.
    fn contents(
        &mut self,
        name: TableName,
        base: &NamedEntry,
        ours: &NamedEntry,
        theirs: &NamedEntry,
    ) -> StorageResult<Result<Option<NamedEntry>, String>> {
        let b = Table::load(self.store, &base.entry.table)?;
        let o = Table::load(self.store, &ours.entry.table)?;
        let t = Table::load(self.store, &theirs.entry.table)?;

        let schema = match merge_schemas(b.schema(), o.schema(), t.schema()) {
            Ok(schema) => schema,
            Err(reason) => return Ok(Err(reason)),
        };

        let base_shape = b.schema().key_shape();
        if schema.key_shape() != base_shape {
            let ours_rekeyed = o.schema().key_shape() != base_shape;
            let theirs_rekeyed = t.schema().key_shape() != base_shape;
            let rows_changed = |side: &NamedEntry| -> StorageResult<bool> {
                compute_delta(
                    Some(TableVersion::from_entry(self.store, &base.name, &base.entry)?),
                    Some(TableVersion::from_entry(self.store, &side.name, &side.entry)?),
                )
                .data_changed()
            };
            if (ours_rekeyed && !theirs_rekeyed && rows_changed(theirs)?)
                || (theirs_rekeyed && !ours_rekeyed && rows_changed(ours)?)
            {
                return Ok(Err(
                    "primary key changed on one side while rows changed on the other".to_string(),
                ));
            }
        }

        let mut normalized = Vec::with_capacity(3);
        for table in [&b, &o, &t] {
            match table.alter(schema.clone(), &mut self.warnings) {
                Ok(table) => normalized.push(table),
                Err(e @ (StorageError::SchemaViolation(_) | StorageError::RowAlreadyExists { .. })) => {
                    return Ok(Err(format!("rows don't fit the merged schema: {}", e)));
                }
                Err(e) => return Err(e),
            }
        }
        let [b, o, t] = <[Table; 3]>::try_from(normalized)
            .map_err(|_| StorageError::Internal("expected three table versions".to_string()))?;

        let merged = merge_rows(&name, &b, &o, &t)?;
        self.stats.push(TableMergeStats {
            table: name.clone(),
            applied: merged.applied,
            conflicts: merged.conflicts.len(),
        });
        for conflict in merged.conflicts {
            self.conflicts.push(conflict);
        }
        Ok(Ok(Some(NamedEntry {
            name,
            entry: RootEntry {
                id: base.entry.id.clone(),
                table: merged.table.write()?,
            },
        })))
    }
}

fn merged_name(base: &NamedEntry, ours: &NamedEntry, theirs: &NamedEntry) -> Result<TableName, String> {
    if ours.name == theirs.name || theirs.name == base.name {
        Ok(ours.name.clone())
    } else if ours.name == base.name {
        Ok(theirs.name.clone())
    } else {
        Err(format!(
            "table '{}' renamed to '{}' and '{}'",
            base.name, ours.name, theirs.name
        ))
    }
}

fn rename(entry: &NamedEntry, name: TableName) -> NamedEntry {
    NamedEntry {
        name,
        entry: entry.entry.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, DataType, Schema, SchemaBuilder, Value};

    fn name(s: &str) -> TableName {
        TableName::new(s).unwrap()
    }

    fn schema() -> Schema {
        SchemaBuilder::new()
            .add_required_column("pk", DataType::Int)
            .add_column("c", DataType::Int)
            .primary_key("pk")
            .build()
            .unwrap()
    }

    fn with_rows(store: &Store, schema: &Schema, rows: &[(i64, i64)]) -> Table {
        let mut edit = Table::create(store, schema.clone()).unwrap().edit();
        for (pk, c) in rows {
            edit.insert(&schema.row([("pk", *pk), ("c", *c)]).unwrap()).unwrap();
        }
        edit.finish().unwrap()
    }

    fn set(root: &Root, table: &str, t: &Table) -> Root {
        let mut root = root.clone();
        let id = root.entry(&name(table)).map(|e| e.id.clone()).unwrap_or_else(TableId::generate);
        root.put_table(name(table), id, t).unwrap();
        root
    }

    #[test]
    fn test_row_conflict() {
        let store = Store::in_memory();
        let s = schema();
        let base = set(&Root::empty(), "t", &with_rows(&store, &s, &[(1, 1)]));
        let ours = set(&base, "t", &with_rows(&store, &s, &[(1, 2)]));
        let theirs = set(&base, "t", &with_rows(&store, &s, &[(1, 3)]));

        let outcome = merge_roots(&store, &base, &ours, &theirs).unwrap();
        assert_eq!(outcome.conflicts.rows().len(), 1);
        let conflict = &outcome.conflicts.rows()[0];
        assert_eq!(conflict.key, vec![Value::Int(1)]);
        let c = |row: &Option<crate::catalog::Row>| row.as_ref().unwrap().get_by_name(&s, "c").clone();
        assert_eq!(
            (c(&conflict.base), c(&conflict.ours), c(&conflict.theirs)),
            (Value::Int(1), Value::Int(2), Value::Int(3))
        );
        assert!(outcome.root.conflicts().is_some());
        let merged = outcome.root.require_table(&store, &name("t")).unwrap();
        assert_eq!(merged.get(&[Value::Int(1)]).unwrap().unwrap().get_by_name(&s, "c"), &Value::Int(1));
    }

    #[test]
    fn test_schema_and_rows_merge() {
        let store = Store::in_memory();
        let s = schema();
        let base_t = with_rows(&store, &s, &[(1, 1), (2, 2)]);
        let base = set(&Root::empty(), "t", &base_t);

        // ours adds a column, theirs inserts a row
        let added = s.add_column(Column::new("d", DataType::Text)).unwrap();
        let ours_t = base_t.alter(added.clone(), &mut Warnings::new()).unwrap();
        let ours = set(&base, "t", &ours_t);
        let theirs = set(&base, "t", &with_rows(&store, &s, &[(1, 1), (2, 2), (3, 3)]));

        let outcome = merge_roots(&store, &base, &ours, &theirs).unwrap();
        assert!(!outcome.has_conflicts());
        let merged = outcome.root.require_table(&store, &name("t")).unwrap();
        assert_eq!(merged.schema(), &added);
        assert_eq!(merged.row_count().unwrap(), 3);
        assert_eq!(outcome.stats.len(), 1);
        assert_eq!(outcome.stats[0].applied, 1);
    }

    #[test]
    fn test_widened_key_merges_with_row_edits() {
        let store = Store::in_memory();
        let s = schema();
        let base_t = with_rows(&store, &s, &[(1, 1), (2, 2)]);
        let base = set(&Root::empty(), "t", &base_t);

        let wide = s.modify_column("pk", DataType::BigInt, false).unwrap();
        let ours = set(&base, "t", &base_t.alter(wide.clone(), &mut Warnings::new()).unwrap());
        let theirs = set(&base, "t", &with_rows(&store, &s, &[(1, 1), (2, 20)]));

        let outcome = merge_roots(&store, &base, &ours, &theirs).unwrap();
        assert!(!outcome.has_conflicts());
        let merged = outcome.root.require_table(&store, &name("t")).unwrap();
        assert_eq!(merged.schema(), &wide);
        assert_eq!(merged.get(&[Value::Int(2)]).unwrap().unwrap().get_by_name(&s, "c"), &Value::Int(20));
    }

    #[test]
    fn test_rename_merges_with_edit() {
        let store = Store::in_memory();
        let s = schema();
        let base = set(&Root::empty(), "t", &with_rows(&store, &s, &[(1, 1)]));
        let mut ours = base.clone();
        ours.rename(&name("t"), name("renamed")).unwrap();
        let theirs = set(&base, "t", &with_rows(&store, &s, &[(1, 1), (2, 2)]));

        let outcome = merge_roots(&store, &base, &ours, &theirs).unwrap();
        assert!(!outcome.has_conflicts());
        assert!(!outcome.root.contains(&name("t")));
        let merged = outcome.root.require_table(&store, &name("renamed")).unwrap();
        assert_eq!(merged.row_count().unwrap(), 2);
    }

    #[test]
    fn test_delete_against_modify_table() {
        let store = Store::in_memory();
        let s = schema();
        let base = set(&Root::empty(), "t", &with_rows(&store, &s, &[(1, 1)]));
        let mut ours = base.clone();
        ours.remove(&name("t"));
        let theirs = set(&base, "t", &with_rows(&store, &s, &[(1, 5)]));

        let outcome = merge_roots(&store, &base, &ours, &theirs).unwrap();
        assert_eq!(outcome.conflicts.table_conflicts().len(), 1);
        assert!(outcome.conflicts.table_conflicts()[0].ours.is_none());
        // base version kept
        assert_eq!(outcome.root.entry(&name("t")), base.entry(&name("t")));
    }

    #[test]
    fn test_same_name_created_twice() {
        let store = Store::in_memory();
        let s = schema();
        let base = Root::empty();
        let ours = set(&base, "t", &with_rows(&store, &s, &[(1, 1)]));
        let theirs = set(&base, "t", &with_rows(&store, &s, &[(2, 2)]));

        let outcome = merge_roots(&store, &base, &ours, &theirs).unwrap();
        let conflicts = outcome.conflicts.table_conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(outcome.root.entry(&name("t")), ours.entry(&name("t")));
    }

    #[test]
    fn test_rekey_against_row_edit() {
        let store = Store::in_memory();
        let s = schema();
        let base_t = with_rows(&store, &s, &[(1, 1)]);
        let base = set(&Root::empty(), "t", &base_t);
        let rekeyed = base_t
            .alter(s.with_primary_key(&["pk", "c"]).unwrap(), &mut Warnings::new())
            .unwrap();
        let ours = set(&base, "t", &rekeyed);
        let theirs = set(&base, "t", &with_rows(&store, &s, &[(1, 1), (2, 2)]));

        let outcome = merge_roots(&store, &base, &ours, &theirs).unwrap();
        assert_eq!(outcome.conflicts.table_conflicts().len(), 1);
        assert!(outcome.conflicts.table_conflicts()[0].reason.contains("primary key"));
    }

    #[test]
    fn test_one_sided_change_wins_either_way() {
        let store = Store::in_memory();
        let s = schema();
        let base = set(&Root::empty(), "t", &with_rows(&store, &s, &[(1, 1)]));
        let changed = set(&base, "t", &with_rows(&store, &s, &[(1, 9)]));

        let a = merge_roots(&store, &base, &changed, &base).unwrap();
        let b = merge_roots(&store, &base, &base, &changed).unwrap();
        assert_eq!(a.root, b.root);
        assert_eq!(a.root.entry(&name("t")), changed.entry(&name("t")));
    }
}
