//! Non-fatal conditions reported next to diff and merge results.
//!
//! Coercion failures and degraded diffs do not abort an operation: the
//! affected value becomes null (or the diff loses `Modified` entries) and a
//! [`Warning`] is recorded. A [`Warnings`] collector keeps at most `limit`
//! entries and counts the rest, so one bad column in a large table can't
//! flood the caller.

use std::fmt;

/// One recovered problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// a value could not be converted to its column's new type and became null
    Coercion {
        column: String,
        value: String,
        target: String,
    },
    /// key-based matching was unsound, only added/removed rows were reported
    DegradedDiff { table: String, reason: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::Coercion { column, value, target } => write!(
                f,
                "unable to coerce value from field '{}': {} cannot be represented as {}",
                column, value, target
            ),
            Warning::DegradedDiff { table, reason } => write!(
                f,
                "cannot render full diff between commits for table '{}': {}",
                table, reason
            ),
        }
    }
}

/// Bounded warning accumulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warnings {
    items: Vec<Warning>,
    suppressed: usize,
    limit: usize,
}

impl Default for Warnings {
    fn default() -> Self {
        Self::with_limit(Self::DEFAULT_LIMIT)
    }
}

impl Warnings {
    pub const DEFAULT_LIMIT: usize = 64;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            items: Vec::new(),
            suppressed: 0,
            limit,
        }
    }

    pub fn push(&mut self, warning: Warning) {
        if self.items.len() < self.limit {
            self.items.push(warning);
        } else {
            self.suppressed += 1;
        }
    }

    /// move everything from `other` into this collector
    pub fn absorb(&mut self, other: Warnings) {
        for warning in other.items {
            self.push(warning);
        }
        self.suppressed += other.suppressed;
    }

    /// retained warnings
    pub fn items(&self) -> &[Warning] {
        &self.items
    }

    /// warnings dropped because the limit was reached
    pub fn suppressed(&self) -> usize {
        self.suppressed
    }

    /// total warnings seen, retained or not
    pub fn total(&self) -> usize {
        self.items.len() + self.suppressed
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn has_degraded_diff(&self) -> bool {
        self.items.iter().any(|w| matches!(w, Warning::DegradedDiff { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coercion(i: usize) -> Warning {
        Warning::Coercion {
            column: "c".into(),
            value: i.to_string(),
            target: "INT".into(),
        }
    }

    #[test]
    fn test_limit_counts_overflow() {
        let mut warnings = Warnings::with_limit(2);
        for i in 0..5 {
            warnings.push(coercion(i));
        }
        assert_eq!(warnings.items().len(), 2);
        assert_eq!(warnings.suppressed(), 3);
        assert_eq!(warnings.total(), 5);
    }

    #[test]
    fn test_absorb_keeps_suppressed_counts() {
        let mut a = Warnings::with_limit(1);
        let mut b = Warnings::with_limit(1);
        b.push(coercion(1));
        b.push(coercion(2));
        a.push(coercion(0));
        a.absorb(b);
        assert_eq!(a.items().len(), 1);
        assert_eq!(a.total(), 3);
    }

    #[test]
    fn test_display() {
        let w = Warning::DegradedDiff {
            table: "t".into(),
            reason: "primary key set changed".into(),
        };
        assert!(w.to_string().starts_with("cannot render full diff between commits"));
        assert!(coercion(1).to_string().starts_with("unable to coerce value from field"));
    }
}
