//! Rows addressed by column tag.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::schema::Schema;
use super::types::Tag;
use super::value::{Value, NULL};

/// A full row: one value per column tag. Nulls are not stored, so two rows
/// compare equal exactly when every column is canonically equal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(BTreeMap<Tag, Value>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column value; setting `Null` clears it.
    pub fn set(&mut self, tag: Tag, value: Value) {
        if value.is_null() {
            self.0.remove(&tag);
        } else {
            self.0.insert(tag, value);
        }
    }

    /// Builder form of [`Row::set`].
    pub fn with(mut self, tag: Tag, value: impl Into<Value>) -> Self {
        self.set(tag, value.into());
        self
    }

    /// Value of a column, `Null` if unset.
    pub fn get(&self, tag: Tag) -> &Value {
        self.0.get(&tag).unwrap_or(&NULL)
    }

    /// Value of a column if it is set.
    pub fn try_get(&self, tag: Tag) -> Option<&Value> {
        self.0.get(&tag)
    }

    /// Value of a column looked up by name.
    pub fn get_by_name<'a>(&'a self, schema: &Schema, name: &str) -> &'a Value {
        match schema.column_by_name(name) {
            Some(col) => self.get(col.tag),
            None => &NULL,
        }
    }

    pub fn remove(&mut self, tag: Tag) -> Option<Value> {
        self.0.remove(&tag)
    }

    /// Non-null values in tag order.
    pub fn iter(&self) -> impl Iterator<Item = (Tag, &Value)> + '_ {
        self.0.iter().map(|(tag, value)| (*tag, value))
    }

    /// Number of non-null values.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keep only the columns `keep` accepts.
    pub fn retain(&mut self, mut keep: impl FnMut(Tag) -> bool) {
        self.0.retain(|tag, _| keep(*tag));
    }

    /// Values in schema column order (nulls included).
    pub fn values(&self, schema: &Schema) -> Vec<Value> {
        schema.columns().iter().map(|c| self.get(c.tag).clone()).collect()
    }

    /// (name, value) pairs in schema column order.
    pub fn named(&self, schema: &Schema) -> Vec<(String, Value)> {
        schema
            .columns()
            .iter()
            .map(|c| (c.name.clone(), self.get(c.tag).clone()))
            .collect()
    }
}

impl FromIterator<(Tag, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (Tag, Value)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (tag, value) in iter {
            row.set(tag, value);
        }
        row
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (tag, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", tag, value)?;
        }
        write!(f, "}}")
    }
}

/// Render key values the way error messages and conflicts show them.
pub fn format_key(key: &[Value]) -> String {
    let parts: Vec<String> = key.iter().map(|v| v.to_string()).collect();
    format!("({})", parts.join(", "))
}
