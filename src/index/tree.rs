//! Persistent row index: an ordered, content-addressed search tree.
//!
//! Every node is an immutable object in the [`Store`]; an index is identified
//! by its root id. Edits produce a new root and share every untouched node
//! with the old one, and the same contents always produce the same root.

use std::collections::BTreeMap;
use std::ops::Bound;

use tracing::debug;

use super::diff::IndexDiff;
use super::node::{is_boundary, load, ChildRef, Node};
use crate::storage::{ObjectId, StorageError, StorageResult, Store};

/// Handle to one version of a row index.
#[derive(Debug, Clone)]
pub struct RowIndex {
    store: Store,
    root: ObjectId,
}

impl PartialEq for RowIndex {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

impl Eq for RowIndex {}

impl RowIndex {
    /// Write (or find) the empty index.
    pub fn empty(store: &Store) -> StorageResult<Self> {
        let root = store.put(&Node::Leaf(Vec::new()).encode())?;
        Ok(Self::load(store, root))
    }

    /// Open an index by root id. Nodes are read lazily.
    pub fn load(store: &Store, root: ObjectId) -> Self {
        Self {
            store: store.clone(),
            root,
        }
    }

    /// Build an index from entries in any order. Later duplicates win.
    pub fn from_entries(
        store: &Store,
        entries: impl IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
    ) -> StorageResult<Self> {
        let sorted: BTreeMap<Vec<u8>, Vec<u8>> = entries.into_iter().collect();
        let mut writer = TreeWriter::new(store);
        for (key, value) in sorted {
            writer.push_entry(key, value)?;
        }
        let root = writer.finish()?;
        Ok(Self::load(store, root))
    }

    pub fn root(&self) -> ObjectId {
        self.root
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Number of entries, read from the root alone.
    pub fn count(&self) -> StorageResult<u64> {
        Ok(load(&self.store, self.root)?.count())
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.count()? == 0)
    }

    /// Point lookup.
    pub fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let mut node = load(&self.store, self.root)?;
        loop {
            match node {
                Node::Leaf(entries) => {
                    return Ok(entries
                        .binary_search_by(|(k, _)| k.as_slice().cmp(key))
                        .ok()
                        .map(|i| entries[i].1.clone()));
                }
                Node::Internal { children, .. } => {
                    let idx = children.partition_point(|c| c.last_key.as_slice() < key);
                    match children.get(idx) {
                        Some(child) => node = load(&self.store, child.id)?,
                        None => return Ok(None),
                    }
                }
            }
        }
    }

    /// All entries in key order.
    pub fn iter(&self) -> IndexIter {
        IndexIter {
            store: self.store.clone(),
            root: self.root,
            cursor: None,
            done: false,
        }
    }

    /// Start a batch of edits on top of this version.
    pub fn edit(&self) -> IndexMutator {
        IndexMutator {
            base: self.clone(),
            edits: BTreeMap::new(),
        }
    }

    /// Changes from `self` to `to`, skipping shared subtrees.
    pub fn diff(&self, to: &RowIndex) -> IndexDiff {
        IndexDiff::new(self, to)
    }

    /// leaf pointers in key order
    pub(crate) fn leaf_refs(&self) -> StorageResult<Vec<ChildRef>> {
        let mut out = Vec::new();
        match load(&self.store, self.root)? {
            Node::Leaf(entries) => {
                if let Some((last, _)) = entries.last() {
                    out.push(ChildRef {
                        last_key: last.clone(),
                        id: self.root,
                        count: entries.len() as u64,
                    });
                }
            }
            Node::Internal { level, children } => collect_leaves(&self.store, level, children, &mut out)?,
        }
        Ok(out)
    }
}

fn collect_leaves(store: &Store, level: u8, children: Vec<ChildRef>, out: &mut Vec<ChildRef>) -> StorageResult<()> {
    if level <= 1 {
        out.extend(children);
        return Ok(());
    }
    for child in children {
        match load(store, child.id)? {
            Node::Internal { level, children } => collect_leaves(store, level, children, out)?,
            Node::Leaf(_) => {
                return Err(StorageError::corrupted(child.id, format!("leaf below level {}", level)));
            }
        }
    }
    Ok(())
}

// ==================== Writing ====================

/// Streams sorted entries (and reusable leaves) into chunked nodes.
struct TreeWriter<'a> {
    store: &'a Store,
    pending: Vec<(Vec<u8>, Vec<u8>)>,
    leaves: Vec<ChildRef>,
    written: usize,
}

impl<'a> TreeWriter<'a> {
    fn new(store: &'a Store) -> Self {
        Self {
            store,
            pending: Vec::new(),
            leaves: Vec::new(),
            written: 0,
        }
    }

    fn push_entry(&mut self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        let boundary = is_boundary(0, &key);
        self.pending.push((key, value));
        if boundary {
            self.flush_leaf()?;
        }
        Ok(())
    }

    /// an existing leaf can be appended as is only on a chunk boundary
    fn at_boundary(&self) -> bool {
        self.pending.is_empty()
    }

    fn push_leaf(&mut self, leaf: ChildRef) {
        self.leaves.push(leaf);
    }

    fn flush_leaf(&mut self) -> StorageResult<()> {
        let entries = std::mem::take(&mut self.pending);
        let Some((last_key, _)) = entries.last() else {
            return Ok(());
        };
        let last_key = last_key.clone();
        let count = entries.len() as u64;
        let id = self.store.put(&Node::Leaf(entries).encode())?;
        self.written += 1;
        self.leaves.push(ChildRef { last_key, id, count });
        Ok(())
    }

    fn write_internal(&mut self, level: u8, children: Vec<ChildRef>) -> StorageResult<ChildRef> {
        let last_key = children.last().map(|c| c.last_key.clone()).unwrap_or_default();
        let count = children.iter().map(|c| c.count).sum();
        let id = self.store.put(&Node::Internal { level, children }.encode())?;
        self.written += 1;
        Ok(ChildRef { last_key, id, count })
    }

    fn finish(mut self) -> StorageResult<ObjectId> {
        self.flush_leaf()?;
        let mut children = std::mem::take(&mut self.leaves);
        if children.is_empty() {
            return self.store.put(&Node::Leaf(Vec::new()).encode());
        }

        let mut level = 1u8;
        while children.len() > 1 {
            let mut next = Vec::new();
            let mut chunk = Vec::new();
            for child in children {
                let boundary = is_boundary(level, &child.last_key);
                chunk.push(child);
                // at least two children per node, so every level shrinks
                if boundary && chunk.len() >= 2 {
                    next.push(self.write_internal(level, std::mem::take(&mut chunk))?);
                }
            }
            if !chunk.is_empty() {
                next.push(self.write_internal(level, chunk)?);
            }
            children = next;
            level = level
                .checked_add(1)
                .ok_or_else(|| StorageError::Internal("row index too deep".to_string()))?;
        }

        debug!(nodes_written = self.written, "row index written");
        children
            .pop()
            .map(|root| root.id)
            .ok_or_else(|| StorageError::Internal("row index writer lost its root".to_string()))
    }
}

/// A batch of puts and deletes against one index version.
///
/// Edits are buffered in memory; [`write`](Self::write) rebuilds only the
/// leaves whose key range was touched and reuses every other leaf.
#[derive(Debug, Clone)]
pub struct IndexMutator {
    base: RowIndex,
    edits: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl IndexMutator {
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.edits.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.edits.insert(key, None);
    }

    /// Read through pending edits.
    pub fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        match self.edits.get(key) {
            Some(edit) => Ok(edit.clone()),
            None => self.base.get(key),
        }
    }

    /// number of buffered edits
    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Apply the edits and return the new index version.
    pub fn write(self) -> StorageResult<RowIndex> {
        if self.edits.is_empty() {
            return Ok(self.base);
        }
        let store = self.base.store.clone();
        let leaves = self.base.leaf_refs()?;
        let mut writer = TreeWriter::new(&store);
        let mut reused = 0usize;

        if leaves.is_empty() {
            merge_leaf(&mut writer, Vec::new(), self.edits.range::<[u8], _>(..))?;
        }
        for (i, leaf) in leaves.iter().enumerate() {
            let is_last = i + 1 == leaves.len();
            let lower = match i {
                0 => Bound::Unbounded,
                _ => Bound::Excluded(leaves[i - 1].last_key.as_slice()),
            };
            let upper = if is_last {
                Bound::Unbounded
            } else {
                Bound::Included(leaf.last_key.as_slice())
            };
            let mut edits = self.edits.range::<[u8], _>((lower, upper)).peekable();

            if edits.peek().is_none() && writer.at_boundary() && (is_last || is_boundary(0, &leaf.last_key)) {
                writer.push_leaf(leaf.clone());
                reused += 1;
                continue;
            }
            let entries = match load(&store, leaf.id)? {
                Node::Leaf(entries) => entries,
                Node::Internal { .. } => return Err(StorageError::corrupted(leaf.id, "expected a leaf")),
            };
            merge_leaf(&mut writer, entries, edits)?;
        }

        let root = writer.finish()?;
        debug!(edits = self.edits.len(), leaves_reused = reused, root = %root.short(), "row index updated");
        Ok(RowIndex::load(&store, root))
    }
}

fn merge_leaf<'e>(
    writer: &mut TreeWriter<'_>,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    edits: impl Iterator<Item = (&'e Vec<u8>, &'e Option<Vec<u8>>)>,
) -> StorageResult<()> {
    let mut edits = edits.peekable();
    for (key, value) in entries {
        while let Some((edit_key, edit)) = edits.next_if(|(k, _)| k.as_slice() < key.as_slice()) {
            if let Some(v) = edit {
                writer.push_entry(edit_key.clone(), v.clone())?;
            }
        }
        match edits.next_if(|(k, _)| k.as_slice() == key.as_slice()) {
            Some((_, Some(new_value))) => writer.push_entry(key, new_value.clone())?,
            Some((_, None)) => {}
            None => writer.push_entry(key, value)?,
        }
    }
    for (edit_key, edit) in edits {
        if let Some(v) = edit {
            writer.push_entry(edit_key.clone(), v.clone())?;
        }
    }
    Ok(())
}

// ==================== Reading ====================

struct Frame {
    node: Node,
    idx: usize,
}

/// What a cursor points at next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pending {
    /// an unread child subtree
    Child { id: ObjectId, level: u8 },
    /// a leaf entry, see [`Cursor::entry`]
    Entry,
}

/// Position in an index: one frame per loaded level, root first. Children
/// are only loaded on [`descend`](Cursor::descend), so a caller can skip a
/// subtree knowing nothing but its id.
pub(crate) struct Cursor {
    store: Store,
    stack: Vec<Frame>,
}

impl Cursor {
    pub(crate) fn new(store: &Store, root: ObjectId) -> StorageResult<Self> {
        let node = load(store, root)?;
        Ok(Self {
            store: store.clone(),
            stack: vec![Frame { node, idx: 0 }],
        })
    }

    /// The next unvisited item, or `None` at the end.
    pub(crate) fn pending(&mut self) -> Option<Pending> {
        loop {
            let top = self.stack.last()?;
            if top.idx < top.node.len() {
                return Some(match &top.node {
                    Node::Leaf(_) => Pending::Entry,
                    Node::Internal { level, children } => Pending::Child {
                        id: children[top.idx].id,
                        level: level.saturating_sub(1),
                    },
                });
            }
            self.stack.pop();
            if let Some(parent) = self.stack.last_mut() {
                parent.idx += 1;
            }
        }
    }

    /// the pending leaf entry
    pub(crate) fn entry(&self) -> Option<(&[u8], &[u8])> {
        let top = self.stack.last()?;
        match &top.node {
            Node::Leaf(entries) => entries.get(top.idx).map(|(k, v)| (k.as_slice(), v.as_slice())),
            Node::Internal { .. } => None,
        }
    }

    /// Load the pending child and move into it.
    pub(crate) fn descend(&mut self) -> StorageResult<()> {
        if let Some(Pending::Child { id, .. }) = self.pending() {
            let node = load(&self.store, id)?;
            self.stack.push(Frame { node, idx: 0 });
        }
        Ok(())
    }

    /// Move past the pending child or entry.
    pub(crate) fn skip(&mut self) {
        if self.pending().is_some() {
            if let Some(top) = self.stack.last_mut() {
                top.idx += 1;
            }
        }
    }

    /// Next leaf entry, descending as needed.
    pub(crate) fn next_entry(&mut self) -> StorageResult<Option<(Vec<u8>, Vec<u8>)>> {
        loop {
            match self.pending() {
                None => return Ok(None),
                Some(Pending::Child { .. }) => self.descend()?,
                Some(Pending::Entry) => {
                    let entry = self.entry().map(|(k, v)| (k.to_vec(), v.to_vec()));
                    self.skip();
                    return Ok(entry);
                }
            }
        }
    }
}

/// Iterator over all entries of an index.
pub struct IndexIter {
    store: Store,
    root: ObjectId,
    cursor: Option<Cursor>,
    done: bool,
}

impl IndexIter {
    fn step(&mut self) -> StorageResult<Option<(Vec<u8>, Vec<u8>)>> {
        if self.cursor.is_none() {
            self.cursor = Some(Cursor::new(&self.store, self.root)?);
        }
        match self.cursor.as_mut() {
            Some(cursor) => cursor.next_entry(),
            None => Ok(None),
        }
    }
}

impl Iterator for IndexIter {
    type Item = StorageResult<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Some(entry)) => Some(Ok(entry)),
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
    use super::*;

    fn key(i: u32) -> Vec<u8> {
        i.to_be_bytes().to_vec()
    }

    fn build(store: &Store, range: std::ops::Range<u32>) -> RowIndex {
        RowIndex::from_entries(store, range.map(|i| (key(i), format!("v{}", i).into_bytes()))).unwrap()
    }

    fn all(index: &RowIndex) -> Vec<(Vec<u8>, Vec<u8>)> {
        index.iter().collect::<StorageResult<Vec<_>>>().unwrap()
    }

    #[test]
    fn test_empty_index() {
        let store = Store::in_memory();
        let index = RowIndex::empty(&store).unwrap();
        assert_eq!(index.count().unwrap(), 0);
        assert!(all(&index).is_empty());
        assert_eq!(index.get(b"x").unwrap(), None);
        assert_eq!(index, RowIndex::from_entries(&store, Vec::new()).unwrap());
    }

    #[test]
    fn test_large_index_lookup_and_order() {
        let store = Store::in_memory();
        let index = build(&store, 0..5_000);
        assert_eq!(index.count().unwrap(), 5_000);
        assert!(index.leaf_refs().unwrap().len() > 10);
        assert_eq!(index.get(&key(4_321)).unwrap(), Some(b"v4321".to_vec()));
        assert_eq!(index.get(&key(9_999)).unwrap(), None);

        let entries = all(&index);
        assert_eq!(entries.len(), 5_000);
        assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn test_same_contents_same_root() {
        let store = Store::in_memory();
        let direct = build(&store, 0..2_000);

        // reach the same contents through a different edit history
        let mut edit = build(&store, 500..2_500).edit();
        for i in 0..500 {
            edit.put(key(i), format!("v{}", i).into_bytes());
        }
        for i in 2_000..2_500 {
            edit.delete(key(i));
        }
        edit.put(key(7), b"changed".to_vec());
        let via_edits = edit.write().unwrap();
        assert_ne!(via_edits, direct);

        let mut undo = via_edits.edit();
        undo.put(key(7), b"v7".to_vec());
        assert_eq!(undo.write().unwrap(), direct);
    }

    #[test]
    fn test_edit_reuses_untouched_leaves() {
        let store = Store::in_memory();
        let index = build(&store, 0..10_000);
        let before: Vec<ObjectId> = index.leaf_refs().unwrap().iter().map(|l| l.id).collect();

        let mut edit = index.edit();
        edit.put(key(5_000), b"new".to_vec());
        let updated = edit.write().unwrap();
        let after: Vec<ObjectId> = updated.leaf_refs().unwrap().iter().map(|l| l.id).collect();

        let changed = after.iter().filter(|id| !before.contains(id)).count();
        assert!(changed <= 2, "{} leaves rewritten", changed);
        assert_eq!(updated.get(&key(5_000)).unwrap(), Some(b"new".to_vec()));
        assert_eq!(updated.count().unwrap(), 10_000);
    }

    #[test]
    fn test_delete_everything() {
        let store = Store::in_memory();
        let index = build(&store, 0..300);
        let mut edit = index.edit();
        for i in 0..300 {
            edit.delete(key(i));
        }
        let emptied = edit.write().unwrap();
        assert_eq!(emptied, RowIndex::empty(&store).unwrap());
    }

    #[test]
    fn test_mutator_reads_through_edits() {
        let store = Store::in_memory();
        let index = build(&store, 0..10);
        let mut edit = index.edit();
        edit.delete(key(3));
        edit.put(key(42), b"x".to_vec());
        assert_eq!(edit.get(&key(3)).unwrap(), None);
        assert_eq!(edit.get(&key(42)).unwrap(), Some(b"x".to_vec()));
        assert_eq!(edit.get(&key(4)).unwrap(), Some(b"v4".to_vec()));
        assert_eq!(edit.len(), 2);
    }

    #[test]
    fn test_missing_node_is_reported() {
        let store = Store::in_memory();
        let bogus = ObjectId::hash_bytes(b"never stored").unwrap();
        let index = RowIndex::load(&store, bogus);
        assert!(index.count().is_err());
        let first = index.iter().next().unwrap();
        assert!(matches!(first, Err(StorageError::ObjectNotFound(_))));
    }
}
