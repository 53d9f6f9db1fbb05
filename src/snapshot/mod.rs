//! Snapshot objects
//!
//! ```text
//! Commit ──► Root ──► { name: (TableId, Table) } ──► Table ──► Schema
//!                 └─► ConflictSet (during a merge)          └─► RowIndex
//! ```
//!
//! All objects are immutable and content addressed; unchanged tables keep
//! their id across commits.

mod root;
mod table;

pub use root::{Root, RootEntry};
pub(crate) use table::decode_entry;
pub use table::{Table, TableEditor, TableScan};
