//! Row index
//!
//! A table's rows live in a persistent ordered tree keyed by encoded primary
//! key (or content hash, for key-less tables). Nodes are chunked by key hash,
//! which keeps the tree shape a function of its contents. Two versions that
//! share rows share nodes, and a diff can skip any subtree whose id is the
//! same on both sides.

pub mod codec;
mod diff;
mod node;
mod tree;

pub use codec::{
    decode_key, decode_keyless, decode_values, encode_key, encode_keyless, encode_values,
    keyless_key,
};
pub use diff::{IndexChange, IndexDiff};
pub use tree::{IndexIter, IndexMutator, RowIndex};
