//! Column reconciliation between two schema versions.
//!
//! Columns are matched by tag only. A tag present in both schemas is
//! "matched"; its values pass through unchanged when the types agree and are
//! coerced to the `to` type otherwise. A tag present on one side only shows up
//! as null on the other side. Two columns with the same name but different
//! tags are unrelated.

use super::row::Row;
use super::schema::Schema;
use super::types::{Column, Tag};
use super::value::{coerce, Value};
use crate::warnings::{Warning, Warnings};

/// One column of the union of two schemas.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedColumn {
    pub tag: Tag,
    pub from: Option<Column>,
    pub to: Option<Column>,
}

impl MappedColumn {
    /// present in both schemas
    pub fn is_matched(&self) -> bool {
        self.from.is_some() && self.to.is_some()
    }

    /// matched, but the values need converting
    pub fn needs_coercion(&self) -> bool {
        match (&self.from, &self.to) {
            (Some(f), Some(t)) => f.data_type != t.data_type,
            _ => false,
        }
    }

    /// display name: the `to` name when the column still exists
    pub fn name(&self) -> &str {
        self.to
            .as_ref()
            .or(self.from.as_ref())
            .map(|c| c.name.as_str())
            .unwrap_or_default()
    }

    /// `to` name differs from the `from` name
    pub fn is_renamed(&self) -> bool {
        match (&self.from, &self.to) {
            (Some(f), Some(t)) => f.name != t.name,
            _ => false,
        }
    }
}

/// Result of [`reconcile`]: the union of both column sets, `to` columns first
/// (in `to` order), then columns that exist only in `from`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColumnMapping {
    columns: Vec<MappedColumn>,
}

/// Match the columns of two schema versions by tag.
pub fn reconcile(from: &Schema, to: &Schema) -> ColumnMapping {
    let mut columns: Vec<MappedColumn> = to
        .columns()
        .iter()
        .map(|t| MappedColumn {
            tag: t.tag,
            from: from.column(t.tag).cloned(),
            to: Some(t.clone()),
        })
        .collect();
    columns.extend(
        from.columns()
            .iter()
            .filter(|f| !to.contains_tag(f.tag))
            .map(|f| MappedColumn {
                tag: f.tag,
                from: Some(f.clone()),
                to: None,
            }),
    );
    ColumnMapping { columns }
}

impl ColumnMapping {
    pub fn columns(&self) -> &[MappedColumn] {
        &self.columns
    }

    pub fn matched(&self) -> impl Iterator<Item = &MappedColumn> + '_ {
        self.columns.iter().filter(|c| c.is_matched())
    }

    /// columns only in `to` (added)
    pub fn to_only(&self) -> impl Iterator<Item = &MappedColumn> + '_ {
        self.columns.iter().filter(|c| c.from.is_none())
    }

    /// columns only in `from` (dropped)
    pub fn from_only(&self) -> impl Iterator<Item = &MappedColumn> + '_ {
        self.columns.iter().filter(|c| c.to.is_none())
    }

    /// true when rows of `from` are valid rows of `to` without conversion
    pub fn is_identity(&self) -> bool {
        self.columns.iter().all(|c| c.is_matched() && !c.needs_coercion())
    }

    /// Values of a `from` row aligned with [`columns`](Self::columns). Matched
    /// columns are coerced to their `to` type; failures become null and are
    /// reported in `warnings`.
    pub fn project_from(&self, row: Option<&Row>, warnings: &mut Warnings) -> Vec<Value> {
        self.columns
            .iter()
            .map(|c| match (row, &c.from) {
                (Some(row), Some(_)) => convert(c, row.get(c.tag), warnings),
                _ => Value::Null,
            })
            .collect()
    }

    /// Values of a `to` row aligned with [`columns`](Self::columns).
    pub fn project_to(&self, row: Option<&Row>) -> Vec<Value> {
        self.columns
            .iter()
            .map(|c| match (row, &c.to) {
                (Some(row), Some(_)) => row.get(c.tag).clone(),
                _ => Value::Null,
            })
            .collect()
    }

    /// Rewrite a `from` row as a `to` row: dropped columns removed, matched
    /// columns coerced, added columns left null.
    pub fn convert_row(&self, row: &Row, warnings: &mut Warnings) -> Row {
        self.columns
            .iter()
            .filter(|c| c.is_matched())
            .map(|c| (c.tag, convert(c, row.get(c.tag), warnings)))
            .collect()
    }
}

fn convert(column: &MappedColumn, value: &Value, warnings: &mut Warnings) -> Value {
    let Some(to) = &column.to else {
        return value.clone();
    };
    if !column.needs_coercion() || value.is_null() {
        return value.clone();
    }
    match coerce(value, &to.data_type) {
        Ok(v) => v,
        Err(e) => {
            warnings.push(Warning::Coercion {
                column: column.name().to_string(),
                value: e.value,
                target: e.target.to_string(),
            });
            Value::Null
        }
    }
}
