//! Table Delta Computer
//!
//! Compares table versions: [`compute_delta`] classifies the change and
//! matches columns by tag, [`TableDelta::row_diffs`] streams row differences,
//! and [`diff_roots`] pairs up every table of two roots by identity.

mod delta;
mod error;
mod root_diff;
mod row_diff;

pub use delta::{
    compute_delta, DeltaSummary, DiffStats, ProjectedDiff, TableChange, TableDelta, TableVersion,
};
pub use error::{DiffError, DiffResult};
pub use root_diff::{diff_all, diff_roots, diff_table, PartialDiff, TableFailure};
pub use row_diff::{DiffType, RowDiff, RowDiffIter};
