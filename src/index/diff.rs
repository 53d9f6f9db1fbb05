//! Structural diff of two row index versions.

use std::cmp::Ordering;

use super::tree::{Cursor, Pending, RowIndex};
use crate::storage::{ObjectId, StorageError, StorageResult, Store};

/// One differing key. `from` is `None` for an insert, `to` is `None` for a
/// delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexChange {
    pub key: Vec<u8>,
    pub from: Option<Vec<u8>>,
    pub to: Option<Vec<u8>>,
}

/// Lazy, key-ordered stream of [`IndexChange`]s.
///
/// Both sides are walked in step, descending only where the child pointers
/// differ. Subtrees with the same id are skipped without being read, so the
/// cost follows the size of the change rather than the size of the table.
pub struct IndexDiff {
    store: Store,
    roots: (ObjectId, ObjectId),
    cursors: Option<(Cursor, Cursor)>,
    done: bool,
}

impl IndexDiff {
    pub(crate) fn new(from: &RowIndex, to: &RowIndex) -> Self {
        Self {
            store: from.store().clone(),
            roots: (from.root(), to.root()),
            cursors: None,
            done: from.root() == to.root(),
        }
    }

    fn step(&mut self) -> StorageResult<Option<IndexChange>> {
        if self.cursors.is_none() {
            let from = Cursor::new(&self.store, self.roots.0)?;
            let to = Cursor::new(&self.store, self.roots.1)?;
            self.cursors = Some((from, to));
        }
        let Some((from, to)) = self.cursors.as_mut() else {
            return Ok(None);
        };

        loop {
            match (from.pending(), to.pending()) {
                (None, None) => return Ok(None),
                (Some(Pending::Child { id: a, level: la }), Some(Pending::Child { id: b, level: lb })) => {
                    if a == b {
                        from.skip();
                        to.skip();
                    } else if la > lb {
                        from.descend()?;
                    } else if lb > la {
                        to.descend()?;
                    } else {
                        from.descend()?;
                        to.descend()?;
                    }
                }
                (Some(Pending::Child { .. }), _) => from.descend()?,
                (_, Some(Pending::Child { .. })) => to.descend()?,
                (from_next, to_next) => {
                    let order = match (from.entry(), to.entry()) {
                        (Some((from_key, _)), Some((to_key, _))) => from_key.cmp(to_key),
                        _ if to_next.is_none() => Ordering::Less,
                        _ if from_next.is_none() => Ordering::Greater,
                        _ => return Err(StorageError::Internal("row index cursor lost its entry".to_string())),
                    };
                    if let Some(change) = compare(from, to, order)? {
                        return Ok(Some(change));
                    }
                }
            }
        }
    }
}

// consume the smaller side (or both on equal keys) and report a difference
fn compare(from: &mut Cursor, to: &mut Cursor, order: Ordering) -> StorageResult<Option<IndexChange>> {
    let change = match order {
        Ordering::Less => from.next_entry()?.map(|(key, value)| IndexChange {
            key,
            from: Some(value),
            to: None,
        }),
        Ordering::Greater => to.next_entry()?.map(|(key, value)| IndexChange {
            key,
            from: None,
            to: Some(value),
        }),
        Ordering::Equal => {
            let old = from.next_entry()?;
            let new = to.next_entry()?;
            match (old, new) {
                (Some((key, old)), Some((_, new))) if old != new => Some(IndexChange {
                    key,
                    from: Some(old),
                    to: Some(new),
                }),
                _ => None,
            }
        }
    };
    Ok(change)
}

impl Iterator for IndexDiff {
    type Item = StorageResult<IndexChange>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Some(change)) => Some(Ok(change)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    use super::*;
    use crate::storage::{MemoryStore, ObjectStore, StorageResult};

    /// Object store that counts reads.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        reads: AtomicUsize,
    }

    impl ObjectStore for CountingStore {
        fn get(&self, id: &ObjectId) -> StorageResult<Option<Vec<u8>>> {
            self.reads.fetch_add(1, AtomicOrdering::SeqCst);
            self.inner.get(id)
        }

        fn put(&self, bytes: &[u8]) -> StorageResult<ObjectId> {
            self.inner.put(bytes)
        }
    }

    fn key(i: u32) -> Vec<u8> {
        i.to_be_bytes().to_vec()
    }

    fn build(store: &Store, n: u32) -> RowIndex {
        RowIndex::from_entries(store, (0..n).map(|i| (key(i), vec![1]))).unwrap()
    }

    fn changes(from: &RowIndex, to: &RowIndex) -> Vec<IndexChange> {
        from.diff(to).collect::<StorageResult<Vec<_>>>().unwrap()
    }

    #[test]
    fn test_identical_roots_have_no_changes() {
        let store = Store::in_memory();
        let index = build(&store, 1_000);
        assert!(changes(&index, &index.clone()).is_empty());
    }

    #[test]
    fn test_insert_update_delete() {
        let store = Store::in_memory();
        let base = build(&store, 1_000);
        let mut edit = base.edit();
        edit.delete(key(10));
        edit.put(key(500), vec![2]);
        edit.put(key(5_000), vec![3]);
        let next = edit.write().unwrap();

        let diff = changes(&base, &next);
        assert_eq!(
            diff,
            vec![
                IndexChange { key: key(10), from: Some(vec![1]), to: None },
                IndexChange { key: key(500), from: Some(vec![1]), to: Some(vec![2]) },
                IndexChange { key: key(5_000), from: None, to: Some(vec![3]) },
            ]
        );

        let reverse = changes(&next, &base);
        assert_eq!(reverse.len(), 3);
        assert_eq!(reverse[0].to, Some(vec![1]));
    }

    #[test]
    fn test_diff_against_empty() {
        let store = Store::in_memory();
        let empty = RowIndex::empty(&store).unwrap();
        let full = build(&store, 200);
        assert_eq!(changes(&empty, &full).len(), 200);
        assert!(changes(&full, &empty).iter().all(|c| c.to.is_none()));
    }

    #[test]
    fn test_small_change_reads_few_nodes() {
        let counting = Arc::new(CountingStore::default());
        let store = Store::new(counting.clone(), Arc::new(MemoryStore::new()));
        let base = build(&store, 50_000);
        let mut edit = base.edit();
        edit.put(key(25_000), vec![9]);
        let next = edit.write().unwrap();

        counting.reads.store(0, AtomicOrdering::SeqCst);
        let diff = changes(&base, &next);
        assert_eq!(diff.len(), 1);
        let reads = counting.reads.load(AtomicOrdering::SeqCst);
        // 50k entries is ~1500 leaves; a single change touches one path per side
        assert!(reads < 40, "diff read {} nodes", reads);
    }
}
