//! Row-level differences between two table versions.

use std::collections::{BTreeMap, VecDeque};

use crate::catalog::{reconcile, Row, Schema};
use crate::index::{codec, IndexChange, IndexDiff};
use crate::snapshot::{decode_entry, Table, TableScan};
use crate::storage::StorageResult;
use crate::warnings::Warnings;

/// Kind of a [`RowDiff`], as projected into diff relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiffType {
    Added,
    Removed,
    Modified,
}

impl DiffType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffType::Added => "added",
            DiffType::Removed => "removed",
            DiffType::Modified => "modified",
        }
    }
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One changed row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowDiff {
    Added(Row),
    Removed(Row),
    Modified { from: Row, to: Row },
}

impl RowDiff {
    pub fn diff_type(&self) -> DiffType {
        match self {
            RowDiff::Added(_) => DiffType::Added,
            RowDiff::Removed(_) => DiffType::Removed,
            RowDiff::Modified { .. } => DiffType::Modified,
        }
    }

    /// the row before the change
    pub fn from_row(&self) -> Option<&Row> {
        match self {
            RowDiff::Removed(row) | RowDiff::Modified { from: row, .. } => Some(row),
            RowDiff::Added(_) => None,
        }
    }

    /// the row after the change
    pub fn to_row(&self) -> Option<&Row> {
        match self {
            RowDiff::Added(row) | RowDiff::Modified { to: row, .. } => Some(row),
            RowDiff::Removed(_) => None,
        }
    }

    /// The same change seen from the other direction.
    pub fn reversed(self) -> RowDiff {
        match self {
            RowDiff::Added(row) => RowDiff::Removed(row),
            RowDiff::Removed(row) => RowDiff::Added(row),
            RowDiff::Modified { from, to } => RowDiff::Modified { from: to, to: from },
        }
    }
}

enum Source {
    /// matching primary key shapes: one index change per key
    Keyed {
        from: Schema,
        to: Schema,
        changes: IndexDiff,
    },
    /// key-less on both sides: index keys are content hashes, values carry counts
    Keyless {
        from: Schema,
        to: Schema,
        changes: IndexDiff,
    },
    /// every `from` row removed, then every `to` row added
    Unrelated {
        removed: Option<TableScan>,
        added: Option<TableScan>,
    },
    /// precomputed (degraded diffs)
    Ready,
}

/// Lazy stream of [`RowDiff`]s.
///
/// Dropping the iterator early releases everything; nothing runs in the
/// background.
pub struct RowDiffIter {
    source: Source,
    queue: VecDeque<RowDiff>,
    failed: bool,
}

impl RowDiffIter {
    pub(crate) fn empty() -> Self {
        Self::ready(VecDeque::new())
    }

    fn ready(queue: VecDeque<RowDiff>) -> Self {
        Self {
            source: Source::Ready,
            queue,
            failed: false,
        }
    }

    /// Diff two versions of the same table whose keys are comparable.
    pub(crate) fn by_key(from: &Table, to: &Table) -> Self {
        let changes = from.rows().diff(to.rows());
        let (from, to) = (from.schema().clone(), to.schema().clone());
        let source = if to.is_keyless() {
            Source::Keyless { from, to, changes }
        } else {
            Source::Keyed { from, to, changes }
        };
        Self {
            source,
            queue: VecDeque::new(),
            failed: false,
        }
    }

    /// All rows of `from` removed and all rows of `to` added.
    pub(crate) fn unrelated(from: Option<&Table>, to: Option<&Table>) -> Self {
        Self {
            source: Source::Unrelated {
                removed: from.map(Table::scan),
                added: to.map(Table::scan),
            },
            queue: VecDeque::new(),
            failed: false,
        }
    }

    /// Diff by whole-row content when keys can't be matched. Only
    /// `Added`/`Removed` entries are produced, `from` rows are compared after
    /// conversion to the `to` schema.
    pub(crate) fn by_content(from: &Table, to: &Table) -> StorageResult<Self> {
        let mapping = reconcile(from.schema(), to.schema());
        let columns: Vec<_> = to.schema().columns().iter().map(|c| (c.tag, c.data_type)).collect();
        // coercion problems here were already reported by the schema change
        let mut ignored = Warnings::with_limit(0);

        let mut multiset: BTreeMap<Vec<u8>, (i64, Option<Row>, Option<Row>)> = BTreeMap::new();
        for row in from.scan() {
            let row = row?;
            let content = codec::encode_values(&columns, &mapping.convert_row(&row, &mut ignored));
            let slot = multiset.entry(content).or_insert((0, None, None));
            slot.0 -= 1;
            slot.1.get_or_insert(row);
        }
        for row in to.scan() {
            let row = row?;
            let content = codec::encode_values(&columns, &row);
            let slot = multiset.entry(content).or_insert((0, None, None));
            slot.0 += 1;
            slot.2.get_or_insert(row);
        }

        let mut queue = VecDeque::new();
        for (_, (balance, removed, added)) in multiset {
            if balance < 0 {
                if let Some(row) = removed {
                    queue.extend(std::iter::repeat(RowDiff::Removed(row)).take(balance.unsigned_abs() as usize));
                }
            } else if let Some(row) = added {
                queue.extend(std::iter::repeat(RowDiff::Added(row)).take(balance as usize));
            }
        }
        Ok(Self::ready(queue))
    }

    fn fill(&mut self) -> StorageResult<()> {
        while self.queue.is_empty() {
            match &mut self.source {
                Source::Ready => return Ok(()),
                Source::Keyed { from, to, changes } => match changes.next() {
                    None => self.source = Source::Ready,
                    Some(change) => {
                        if let Some(diff) = keyed_change(from, to, change?)? {
                            self.queue.push_back(diff);
                        }
                    }
                },
                Source::Keyless { from, to, changes } => match changes.next() {
                    None => self.source = Source::Ready,
                    Some(change) => keyless_change(from, to, change?, &mut self.queue)?,
                },
                Source::Unrelated { removed, added } => {
                    if let Some(scan) = removed {
                        match scan.next() {
                            Some(row) => self.queue.push_back(RowDiff::Removed(row?)),
                            None => *removed = None,
                        }
                    } else if let Some(scan) = added {
                        match scan.next() {
                            Some(row) => self.queue.push_back(RowDiff::Added(row?)),
                            None => *added = None,
                        }
                    } else {
                        self.source = Source::Ready;
                    }
                }
            }
        }
        Ok(())
    }
}

fn keyed_change(from: &Schema, to: &Schema, change: IndexChange) -> StorageResult<Option<RowDiff>> {
    let old = match &change.from {
        Some(value) => Some(decode_entry(from, &change.key, value)?.0),
        None => None,
    };
    let new = match &change.to {
        Some(value) => Some(decode_entry(to, &change.key, value)?.0),
        None => None,
    };
    Ok(match (old, new) {
        (None, Some(row)) => Some(RowDiff::Added(row)),
        (Some(row), None) => Some(RowDiff::Removed(row)),
        // different bytes can still hold equal values (e.g. a widened column)
        (Some(from), Some(to)) if from != to => Some(RowDiff::Modified { from, to }),
        _ => None,
    })
}

fn keyless_change(from: &Schema, to: &Schema, change: IndexChange, queue: &mut VecDeque<RowDiff>) -> StorageResult<()> {
    let old = match &change.from {
        Some(value) => Some(decode_entry(from, &change.key, value)?),
        None => None,
    };
    let new = match &change.to {
        Some(value) => Some(decode_entry(to, &change.key, value)?),
        None => None,
    };
    let old_count = old.as_ref().map_or(0, |(_, n)| *n);
    let new_count = new.as_ref().map_or(0, |(_, n)| *n);
    if new_count > old_count {
        if let Some((row, _)) = new {
            queue.extend(std::iter::repeat(RowDiff::Added(row)).take((new_count - old_count) as usize));
        }
    } else if old_count > new_count {
        if let Some((row, _)) = old {
            queue.extend(std::iter::repeat(RowDiff::Removed(row)).take((old_count - new_count) as usize));
        }
    }
    Ok(())
}

impl Iterator for RowDiffIter {
    type Item = StorageResult<RowDiff>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if let Err(e) = self.fill() {
            self.failed = true;
            return Some(Err(e));
        }
        self.queue.pop_front().map(Ok)
    }
}
