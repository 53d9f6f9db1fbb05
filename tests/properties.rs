//! Property-based tests for diff and merge.

use std::collections::BTreeMap;

use proptest::prelude::*;
use tablevc::catalog::{format_key, Column, DataType, Row, Schema, SchemaBuilder, Tag, Value};
use tablevc::diff::{diff_table, DiffType, RowDiff};
use tablevc::merge::merge_roots;
use tablevc::snapshot::{Root, Table};
use tablevc::storage::{Store, TableId, TableName};

// =============================================================================
// Test helpers
// =============================================================================

/// pk -> c
type Rows = BTreeMap<i64, i64>;
/// pk -> new c, or None to delete
type Edits = BTreeMap<i64, Option<i64>>;

fn t() -> TableName {
    TableName::new("t").unwrap()
}

fn schema() -> Schema {
    SchemaBuilder::new()
        .column(Column::with_tag(Tag::new(1), "pk", DataType::Int))
        .column(Column::with_tag(Tag::new(2), "c", DataType::Int))
        .primary_key("pk")
        .build()
        .unwrap()
}

fn arbitrary_rows() -> impl Strategy<Value = Rows> {
    // few keys and values, so independent edits collide often
    prop::collection::btree_map(0i64..24, 0i64..4, 0..16)
}

fn arbitrary_edits() -> impl Strategy<Value = Edits> {
    prop::collection::btree_map(0i64..24, prop::option::of(0i64..4), 0..10)
}

fn apply(rows: &Rows, edits: &Edits) -> Rows {
    let mut out = rows.clone();
    for (pk, edit) in edits {
        match edit {
            Some(c) => out.insert(*pk, *c),
            None => out.remove(pk),
        };
    }
    out
}

struct Repo {
    store: Store,
    schema: Schema,
    id: TableId,
}

impl Repo {
    fn new() -> Self {
        Self {
            store: Store::in_memory(),
            schema: schema(),
            id: TableId::generate(),
        }
    }

    /// a root holding t with `rows`; every root shares t's identity
    fn root(&self, rows: &Rows) -> Root {
        let mut edit = Table::create(&self.store, self.schema.clone()).unwrap().edit();
        for (pk, c) in rows {
            edit.insert(&self.schema.row([("pk", *pk), ("c", *c)]).unwrap()).unwrap();
        }
        let mut root = Root::empty();
        root.put_table(t(), self.id.clone(), &edit.finish().unwrap()).unwrap();
        root
    }

    fn rows_of(&self, root: &Root) -> Rows {
        let table = root.require_table(&self.store, &t()).unwrap();
        table
            .scan()
            .map(|row| {
                let row = row.unwrap();
                let pk = row.get_by_name(&self.schema, "pk").as_i64().unwrap();
                let c = row.get_by_name(&self.schema, "c").as_i64().unwrap();
                (pk, c)
            })
            .collect()
    }

    fn diff(&self, from: &Root, to: &Root) -> Vec<RowDiff> {
        diff_table(&self.store, &t(), from, to)
            .unwrap()
            .row_diffs()
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    fn key(&self, diff: &RowDiff) -> String {
        let row = diff.to_row().or(diff.from_row()).unwrap();
        format_key(&self.schema.key_of(row))
    }

    /// key -> (from, to) of every row change
    fn changes(&self, from: &Root, to: &Root) -> BTreeMap<String, (Option<Row>, Option<Row>)> {
        self.diff(from, to)
            .into_iter()
            .map(|d| (self.key(&d), (d.from_row().cloned(), d.to_row().cloned())))
            .collect()
    }
}

// =============================================================================
// Diff properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// diff(t, c, c) is empty
    #[test]
    fn diff_of_a_version_with_itself_is_empty(rows in arbitrary_rows()) {
        let repo = Repo::new();
        let root = repo.root(&rows);
        prop_assert!(repo.diff(&root, &root).is_empty());
    }

    /// Added in one direction is Removed in the other, with values swapped.
    #[test]
    fn diff_classification_is_symmetric(rows in arbitrary_rows(), edits in arbitrary_edits()) {
        let repo = Repo::new();
        let a = repo.root(&rows);
        let b = repo.root(&apply(&rows, &edits));

        let forward = repo.diff(&a, &b);
        let backward: BTreeMap<String, RowDiff> = repo
            .diff(&b, &a)
            .into_iter()
            .map(|d| (repo.key(&d), d))
            .collect();
        prop_assert_eq!(forward.len(), backward.len());
        for diff in forward {
            let mirrored = &backward[&repo.key(&diff)];
            let expected = match diff.diff_type() {
                DiffType::Added => DiffType::Removed,
                DiffType::Removed => DiffType::Added,
                DiffType::Modified => DiffType::Modified,
            };
            prop_assert_eq!(mirrored.diff_type(), expected);
            prop_assert_eq!(mirrored.from_row(), diff.to_row());
            prop_assert_eq!(mirrored.to_row(), diff.from_row());
        }
    }

    /// A→B followed by B→C, collapsed per key, equals A→C.
    #[test]
    fn diffs_compose_along_a_chain(
        rows in arbitrary_rows(),
        first in arbitrary_edits(),
        second in arbitrary_edits(),
    ) {
        let repo = Repo::new();
        let b_rows = apply(&rows, &first);
        let a = repo.root(&rows);
        let b = repo.root(&b_rows);
        let c = repo.root(&apply(&b_rows, &second));

        let mut collapsed = repo.changes(&a, &b);
        for (key, (from, to)) in repo.changes(&b, &c) {
            collapsed
                .entry(key)
                .and_modify(|change| change.1 = to.clone())
                .or_insert((from, to));
        }
        // add-then-delete and modify-then-revert cancel out
        collapsed.retain(|_, (from, to)| from != to);

        prop_assert_eq!(collapsed, repo.changes(&a, &c));
    }
}

// =============================================================================
// Merge properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A table changed on one side only merges to that side's version,
    /// whichever side is ours.
    #[test]
    fn one_sided_changes_merge_commutatively(rows in arbitrary_rows(), edits in arbitrary_edits()) {
        let repo = Repo::new();
        let changed_rows = apply(&rows, &edits);
        let base = repo.root(&rows);
        let changed = repo.root(&changed_rows);

        let as_ours = merge_roots(&repo.store, &base, &changed, &base).unwrap();
        let as_theirs = merge_roots(&repo.store, &base, &base, &changed).unwrap();
        prop_assert!(as_ours.conflicts.is_empty());
        prop_assert!(as_theirs.conflicts.is_empty());
        prop_assert_eq!(repo.rows_of(&as_ours.root), changed_rows.clone());
        prop_assert_eq!(repo.rows_of(&as_theirs.root), changed_rows);
    }

    /// Conflicts are reported exactly for keys both sides changed to
    /// different values; every other change is merged.
    #[test]
    fn conflicts_are_complete_and_exact(
        rows in arbitrary_rows(),
        ours_edits in arbitrary_edits(),
        theirs_edits in arbitrary_edits(),
    ) {
        let repo = Repo::new();
        let ours_rows = apply(&rows, &ours_edits);
        let theirs_rows = apply(&rows, &theirs_edits);
        let outcome = merge_roots(
            &repo.store,
            &repo.root(&rows),
            &repo.root(&ours_rows),
            &repo.root(&theirs_rows),
        )
        .unwrap();

        let mut expected_conflicts = Vec::new();
        let mut expected_rows = Rows::new();
        let keys = rows.keys().chain(ours_rows.keys()).chain(theirs_rows.keys());
        for pk in keys.copied().collect::<std::collections::BTreeSet<_>>() {
            let (b, o, th) = (rows.get(&pk), ours_rows.get(&pk), theirs_rows.get(&pk));
            let merged = if o == th || th == b {
                o
            } else if o == b {
                th
            } else {
                expected_conflicts.push(vec![Value::Int(pk)]);
                b
            };
            if let Some(c) = merged {
                expected_rows.insert(pk, *c);
            }
        }

        let mut reported: Vec<Vec<Value>> = outcome.conflicts.rows().iter().map(|c| c.key.clone()).collect();
        reported.sort_by_key(|key| key[0].as_i64());
        prop_assert_eq!(reported, expected_conflicts);
        prop_assert_eq!(repo.rows_of(&outcome.root), expected_rows);
    }
}
