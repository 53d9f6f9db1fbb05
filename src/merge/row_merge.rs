//! Three-way merge of the rows of one table.
//!
//! Both sides are diffed against the base through their row indexes, so the
//! work is proportional to what changed. The result starts from ours and
//! applies every change theirs made to a key ours left alone.

use std::collections::BTreeMap;

use tracing::debug;

use super::conflict::Conflict;
use crate::catalog::{Row, Schema};
use crate::index::{self, IndexMutator};
use crate::snapshot::{decode_entry, Table};
use crate::storage::{StorageResult, TableName};

/// Outcome of [`merge_rows`].
#[derive(Debug)]
pub(crate) struct RowMerge {
    pub table: Table,
    pub conflicts: Vec<Conflict>,
    /// changes taken from theirs
    pub applied: usize,
}

/// Merge rows of three versions of a table that share one schema.
///
/// Keyed tables: a key changed on both sides to different values is a
/// conflict and keeps its base value. Key-less tables merge cardinalities:
/// each side's change in copies is applied on top of the other, so two sides
/// that each add one copy end up with two more than the base.
pub(crate) fn merge_rows(name: &TableName, base: &Table, ours: &Table, theirs: &Table) -> StorageResult<RowMerge> {
    let schema = ours.schema();
    let keyless = schema.is_keyless();

    let mut ours_changes: BTreeMap<Vec<u8>, Option<Vec<u8>>> = BTreeMap::new();
    for change in base.rows().diff(ours.rows()) {
        let change = change?;
        ours_changes.insert(change.key, change.to);
    }

    let mut rows = ours.rows().edit();
    let mut conflicts = Vec::new();
    let mut applied = 0;

    for change in base.rows().diff(theirs.rows()) {
        let change = change?;
        let Some(ours_value) = ours_changes.get(&change.key) else {
            apply(&mut rows, change.key, change.to);
            applied += 1;
            continue;
        };
        if keyless {
            let count = |v: Option<&[u8]>| -> StorageResult<u64> {
                Ok(match v {
                    Some(bytes) => index::decode_keyless(bytes)?.0,
                    None => 0,
                })
            };
            let base_n = count(change.from.as_deref())?;
            let ours_n = count(ours_value.as_deref())?;
            let theirs_n = count(change.to.as_deref())?;
            let merged = (ours_n + theirs_n).saturating_sub(base_n);
            let bytes = match (&change.to, ours_value, &change.from) {
                (Some(v), _, _) | (None, Some(v), _) | (None, None, Some(v)) => index::decode_keyless(v)?.1.to_vec(),
                (None, None, None) => continue,
            };
            if merged == 0 {
                rows.delete(change.key);
            } else {
                rows.put(change.key, index::encode_keyless(merged, &bytes));
            }
            applied += 1;
            continue;
        }
        if same_row(schema, &change.key, ours_value.as_deref(), change.to.as_deref())? {
            continue;
        }

        let decode = |v: Option<&[u8]>| -> StorageResult<Option<Row>> {
            v.map(|bytes| decode_entry(schema, &change.key, bytes).map(|(row, _)| row))
                .transpose()
        };
        conflicts.push(Conflict {
            table: name.clone(),
            key: index::decode_key(&change.key)?,
            base: decode(change.from.as_deref())?,
            ours: decode(ours_value.as_deref())?,
            theirs: decode(change.to.as_deref())?,
        });
        apply(&mut rows, change.key, change.from);
    }

    let table = ours.with_rows(rows.write()?);
    debug!(table = %name, applied, conflicts = conflicts.len(), "rows merged");
    Ok(RowMerge {
        table,
        conflicts,
        applied,
    })
}

fn apply(rows: &mut IndexMutator, key: Vec<u8>, value: Option<Vec<u8>>) {
    match value {
        Some(value) => rows.put(key, value),
        None => rows.delete(key),
    }
}

/// Both sides hold the same row under `key`. Equal bytes are equal rows;
/// different bytes are decoded and compared by value.
fn same_row(schema: &Schema, key: &[u8], ours: Option<&[u8]>, theirs: Option<&[u8]>) -> StorageResult<bool> {
    match (ours, theirs) {
        (None, None) => Ok(true),
        (Some(a), Some(b)) if a == b => Ok(true),
        (Some(a), Some(b)) => Ok(decode_entry(schema, key, a)? == decode_entry(schema, key, b)?),
        _ => Ok(false),
    }
}
