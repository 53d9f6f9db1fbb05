//! Row index nodes and chunk boundaries.
//!
//! Node layout (all integers big endian):
//!
//! ```text
//! leaf:      0x00 | level=0 | n: u32 | n * (klen: u32, key, vlen: u32, value)
//! internal:  0x01 | level   | n: u32 | n * (klen: u32, last_key, oid: [u8; 20], count: u64)
//! ```
//!
//! A chunk ends after any entry whose key hashes to a boundary at that level,
//! so node boundaries depend only on the keys themselves. Identical contents
//! always produce identical nodes, whatever order the edits arrived in.

use super::codec::{put_chunk, Reader};
use crate::storage::{ObjectId, StorageError, StorageResult, Store};

/// average number of entries per node
pub(crate) const TARGET_FANOUT: u32 = 32;

const KIND_LEAF: u8 = 0;
const KIND_INTERNAL: u8 = 1;

/// Pointer from an internal node to a child subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChildRef {
    /// greatest key in the subtree
    pub last_key: Vec<u8>,
    pub id: ObjectId,
    /// number of entries in the subtree
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Node {
    Leaf(Vec<(Vec<u8>, Vec<u8>)>),
    Internal { level: u8, children: Vec<ChildRef> },
}

impl Node {
    pub(crate) fn len(&self) -> usize {
        match self {
            Node::Leaf(entries) => entries.len(),
            Node::Internal { children, .. } => children.len(),
        }
    }

    /// number of entries below this node
    pub(crate) fn count(&self) -> u64 {
        match self {
            Node::Leaf(entries) => entries.len() as u64,
            Node::Internal { children, .. } => children.iter().map(|c| c.count).sum(),
        }
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Node::Leaf(entries) => {
                out.extend_from_slice(&[KIND_LEAF, 0]);
                out.extend_from_slice(&(entries.len() as u32).to_be_bytes());
                for (key, value) in entries {
                    put_chunk(&mut out, key);
                    put_chunk(&mut out, value);
                }
            }
            Node::Internal { level, children } => {
                out.extend_from_slice(&[KIND_INTERNAL, *level]);
                out.extend_from_slice(&(children.len() as u32).to_be_bytes());
                for child in children {
                    put_chunk(&mut out, &child.last_key);
                    out.extend_from_slice(child.id.as_bytes());
                    out.extend_from_slice(&child.count.to_be_bytes());
                }
            }
        }
        out
    }

    pub(crate) fn decode(id: &ObjectId, bytes: &[u8]) -> StorageResult<Node> {
        let corrupt = |e: StorageError| match e {
            StorageError::CorruptedData { reason, .. } => StorageError::corrupted(id, reason),
            other => other,
        };
        let mut reader = Reader::new(bytes);
        let kind = reader.u8().map_err(corrupt)?;
        let level = reader.u8().map_err(corrupt)?;
        let n = reader.u32().map_err(corrupt)? as usize;

        let node = match kind {
            KIND_LEAF => {
                let mut entries = Vec::with_capacity(n);
                for _ in 0..n {
                    let key = reader.chunk().map_err(corrupt)?.to_vec();
                    let value = reader.chunk().map_err(corrupt)?.to_vec();
                    entries.push((key, value));
                }
                Node::Leaf(entries)
            }
            KIND_INTERNAL => {
                let mut children = Vec::with_capacity(n);
                for _ in 0..n {
                    let last_key = reader.chunk().map_err(corrupt)?.to_vec();
                    let oid = reader.bytes(ObjectId::LEN).map_err(corrupt)?;
                    let count = reader.u64().map_err(corrupt)?;
                    children.push(ChildRef {
                        last_key,
                        id: ObjectId::from_bytes(oid)?,
                        count,
                    });
                }
                if children.is_empty() {
                    return Err(StorageError::corrupted(id, "internal node without children"));
                }
                Node::Internal { level, children }
            }
            other => return Err(StorageError::corrupted(id, format!("unknown node kind {}", other))),
        };
        if !reader.is_empty() {
            return Err(StorageError::corrupted(id, "trailing bytes after node"));
        }
        Ok(node)
    }
}

pub(crate) fn load(store: &Store, id: ObjectId) -> StorageResult<Node> {
    let bytes = store.get(&id)?;
    Node::decode(&id, &bytes)
}

/// True when a chunk at `level` closes after `key`.
pub(crate) fn is_boundary(level: u8, key: &[u8]) -> bool {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[level]);
    hasher.update(key);
    let hash = hasher.finalize();
    let mut prefix = [0u8; 4];
    prefix.copy_from_slice(&hash.as_bytes()[..4]);
    u32::from_le_bytes(prefix) % TARGET_FANOUT == 0
}
