//! Commit graph traversal.
//!
//! Walks are ordered by generation number (`height`) so that a commit is
//! always visited after every descendant reachable in the same walk. Ties are
//! broken by discovery order, which keeps every result deterministic.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use parking_lot::Mutex;
use tracing::debug;

use crate::storage::{Commit, CommitId, CommitInfo, StorageError, StorageResult, Store};

const FROM_A: u8 = 0b01;
const FROM_B: u8 = 0b10;
const BOTH: u8 = FROM_A | FROM_B;

/// Queue entry: highest generation first, then earliest discovered.
type Entry = (u64, Reverse<u64>, CommitId);

/// Read access to the commit graph with a small commit cache.
pub struct CommitGraph {
    store: Store,
    cache: Mutex<HashMap<CommitId, Commit>>,
}

impl CommitGraph {
    pub fn new(store: &Store) -> Self {
        Self {
            store: store.clone(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn commit(&self, id: CommitId) -> StorageResult<Commit> {
        if let Some(commit) = self.cache.lock().get(&id) {
            return Ok(commit.clone());
        }
        let commit = Commit::load(&self.store, id)?;
        self.cache.lock().insert(id, commit.clone());
        Ok(commit)
    }

    /// Best common ancestor of `a` and `b`: the common ancestor with the
    /// greatest generation number, earliest discovered on ties.
    ///
    /// Fails with `NoCommonAncestor` when the histories are disconnected,
    /// which only happens in a damaged repository.
    pub fn merge_base(&self, a: CommitId, b: CommitId) -> StorageResult<CommitId> {
        if a == b {
            return Ok(a);
        }
        let mut flags: HashMap<CommitId, u8> = HashMap::new();
        let mut queue = Walk::default();
        flags.insert(a, FROM_A);
        flags.insert(b, FROM_B);
        queue.push(self.commit(a)?.height, a);
        queue.push(self.commit(b)?.height, b);

        while let Some(id) = queue.pop() {
            let flag = flags.get(&id).copied().unwrap_or_default();
            if flag == BOTH {
                debug!(a = %a.short(), b = %b.short(), base = %id.short(), "merge base found");
                return Ok(id);
            }
            for parent in self.commit(id)?.parents {
                match flags.get_mut(&parent) {
                    Some(existing) => *existing |= flag,
                    None => {
                        flags.insert(parent, flag);
                        queue.push(self.commit(parent)?.height, parent);
                    }
                }
            }
        }
        Err(StorageError::NoCommonAncestor {
            a: a.to_string(),
            b: b.to_string(),
        })
    }

    /// True when `ancestor` is reachable from `descendant` (a commit is its
    /// own ancestor).
    pub fn is_ancestor(&self, ancestor: CommitId, descendant: CommitId) -> StorageResult<bool> {
        if ancestor == descendant {
            return Ok(true);
        }
        let floor = self.commit(ancestor)?.height;
        let mut seen = HashSet::from([descendant]);
        let mut stack = vec![descendant];
        while let Some(id) = stack.pop() {
            let commit = self.commit(id)?;
            if commit.height <= floor {
                continue;
            }
            for parent in commit.parents {
                if parent == ancestor {
                    return Ok(true);
                }
                if seen.insert(parent) {
                    stack.push(parent);
                }
            }
        }
        Ok(false)
    }

    /// Ancestors of `start` (inclusive), newest generation first.
    pub fn history(&self, start: CommitId) -> HistoryIter<'_> {
        HistoryIter {
            graph: self,
            queue: Walk::seeded(start),
            seen: HashSet::from([start]),
            first_parent: false,
            failed: false,
        }
    }

    /// `start` and its first-parent chain.
    pub fn first_parent_history(&self, start: CommitId) -> HistoryIter<'_> {
        HistoryIter {
            first_parent: true,
            ..self.history(start)
        }
    }

    /// Commits reachable from `to` but not from `from`, newest first.
    pub fn commits_in_range(&self, from: CommitId, to: CommitId) -> StorageResult<Vec<CommitId>> {
        const EXCLUDED: u8 = FROM_A;
        const INCLUDED: u8 = FROM_B;

        if from == to {
            return Ok(Vec::new());
        }
        let mut flags: HashMap<CommitId, u8> = HashMap::from([(from, EXCLUDED), (to, INCLUDED)]);
        let mut queue = Walk::default();
        queue.push(self.commit(from)?.height, from);
        queue.push(self.commit(to)?.height, to);

        let mut out = Vec::new();
        // stop once only excluded commits are left to explore
        while queue.any(|id| flags.get(&id) == Some(&INCLUDED)) {
            let Some(id) = queue.pop() else { break };
            let flag = flags.get(&id).copied().unwrap_or_default();
            if flag == INCLUDED {
                out.push(id);
            }
            for parent in self.commit(id)?.parents {
                match flags.get_mut(&parent) {
                    Some(existing) => *existing |= flag,
                    None => {
                        flags.insert(parent, flag);
                        queue.push(self.commit(parent)?.height, parent);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Commits reachable from `heads` that descend from `of` (exclusive),
    /// newest first.
    pub fn descendants(&self, of: CommitId, heads: &[CommitId]) -> StorageResult<Vec<CommitId>> {
        let floor = self.commit(of)?.height;
        let mut candidates: Vec<(u64, CommitId)> = Vec::new();
        let mut seen: HashSet<CommitId> = HashSet::new();
        let mut stack: Vec<CommitId> = heads.to_vec();
        while let Some(id) = stack.pop() {
            if id == of || !seen.insert(id) {
                continue;
            }
            let commit = self.commit(id)?;
            if commit.height <= floor {
                continue;
            }
            candidates.push((commit.height, id));
            stack.extend(commit.parents.iter().copied());
        }

        // oldest first, so every parent is decided before its children
        candidates.sort();
        let mut descends: HashSet<CommitId> = HashSet::new();
        for (_, id) in &candidates {
            let parents = self.commit(*id)?.parents;
            if parents.iter().any(|p| *p == of || descends.contains(p)) {
                descends.insert(*id);
            }
        }
        Ok(candidates
            .into_iter()
            .rev()
            .map(|(_, id)| id)
            .filter(|id| descends.contains(id))
            .collect())
    }
}

#[derive(Default)]
struct Walk {
    heap: BinaryHeap<Entry>,
    seq: u64,
}

impl Walk {
    fn seeded(start: CommitId) -> Self {
        let mut walk = Walk::default();
        // height is only used for ordering; the start commit always comes first
        walk.push(u64::MAX, start);
        walk
    }

    fn push(&mut self, height: u64, id: CommitId) {
        self.heap.push((height, Reverse(self.seq), id));
        self.seq += 1;
    }

    fn pop(&mut self) -> Option<CommitId> {
        self.heap.pop().map(|(_, _, id)| id)
    }

    fn any(&self, f: impl Fn(CommitId) -> bool) -> bool {
        self.heap.iter().any(|(_, _, id)| f(*id))
    }
}

/// Iterator over a commit's ancestry, newest generation first.
pub struct HistoryIter<'a> {
    graph: &'a CommitGraph,
    queue: Walk,
    seen: HashSet<CommitId>,
    first_parent: bool,
    failed: bool,
}

impl HistoryIter<'_> {
    fn step(&mut self) -> StorageResult<Option<CommitInfo>> {
        let Some(id) = self.queue.pop() else {
            return Ok(None);
        };
        let commit = self.graph.commit(id)?;
        let parents: Vec<CommitId> = if self.first_parent {
            commit.first_parent().into_iter().collect()
        } else {
            commit.parents.clone()
        };
        for parent in parents {
            if self.seen.insert(parent) {
                let height = self.graph.commit(parent)?.height;
                self.queue.push(height, parent);
            }
        }
        Ok(Some(CommitInfo { id, commit }))
    }
}

impl Iterator for HistoryIter<'_> {
    type Item = StorageResult<CommitInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.step() {
            Ok(Some(info)) => Some(Ok(info)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
