//! Table schemas: ordered column sets with stable tags.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::row::Row;
use super::types::{Column, DataType, KeyFamily, KeyRole, Tag};
use super::value::Value;

/// Table schema definition.
///
/// Invariants: tags are unique, names are unique, primary key ordinals are
/// `0..n` without gaps and primary key columns are not nullable. A schema
/// without primary key columns describes a key-less table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    /// Create a schema, validating its invariants.
    pub fn new(columns: Vec<Column>) -> Result<Self, SchemaError> {
        let schema = Self { columns };
        schema.validate()?;
        Ok(schema)
    }

    /// The schema with no columns.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Get a column definition by tag.
    pub fn column(&self, tag: Tag) -> Option<&Column> {
        self.columns.iter().find(|c| c.tag == tag)
    }

    /// Get a column definition by name.
    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn contains_tag(&self, tag: Tag) -> bool {
        self.column(tag).is_some()
    }

    pub fn tags(&self) -> impl Iterator<Item = Tag> + '_ {
        self.columns.iter().map(|c| c.tag)
    }

    /// Get column names.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Primary key columns in key order.
    pub fn primary_key(&self) -> Vec<&Column> {
        let mut pk: Vec<(u16, &Column)> = self
            .columns
            .iter()
            .filter_map(|c| match c.key {
                KeyRole::Primary(ordinal) => Some((ordinal, c)),
                KeyRole::Value => None,
            })
            .collect();
        pk.sort_by_key(|(ordinal, _)| *ordinal);
        pk.into_iter().map(|(_, c)| c).collect()
    }

    /// Primary key tags in key order.
    pub fn primary_key_tags(&self) -> Vec<Tag> {
        self.primary_key().iter().map(|c| c.tag).collect()
    }

    /// Non-key columns, in schema order.
    pub fn value_columns(&self) -> impl Iterator<Item = &Column> + '_ {
        self.columns.iter().filter(|c| !c.is_primary_key())
    }

    /// True when rows are identified by content instead of a primary key.
    pub fn is_keyless(&self) -> bool {
        !self.columns.iter().any(|c| c.is_primary_key())
    }

    /// Shape of the row index key: ordered key tags with their key encoding.
    /// Two schemas with different shapes cannot be compared key by key;
    /// widening a key column keeps the shape.
    pub fn key_shape(&self) -> Vec<(Tag, KeyFamily)> {
        self.primary_key().iter().map(|c| (c.tag, c.data_type.key_family())).collect()
    }

    /// Validate the schema itself.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut names = HashSet::new();
        let mut tags = HashSet::new();
        let mut ordinals = Vec::new();

        for col in &self.columns {
            if col.name.is_empty() {
                return Err(SchemaError::InvalidColumnName(col.name.clone()));
            }
            if !names.insert(col.name.as_str()) {
                return Err(SchemaError::DuplicateColumn(col.name.clone()));
            }
            if !tags.insert(col.tag) {
                return Err(SchemaError::DuplicateTag(col.tag));
            }
            if let KeyRole::Primary(ordinal) = col.key {
                if col.nullable {
                    return Err(SchemaError::InvalidPrimaryKey(format!(
                        "primary key column '{}' must not be nullable",
                        col.name
                    )));
                }
                ordinals.push(ordinal);
            }
            if let Some(default) = &col.default {
                col.data_type
                    .conform(default.clone())
                    .map_err(|e| SchemaError::InvalidDefault(format!("{}: {}", col.name, e)))?;
            }
        }

        ordinals.sort_unstable();
        if ordinals.iter().enumerate().any(|(i, o)| *o as usize != i) {
            return Err(SchemaError::InvalidPrimaryKey(format!(
                "primary key positions must be 0..{}, got {:?}",
                ordinals.len(),
                ordinals
            )));
        }

        Ok(())
    }

    /// A tag not used by any column of this schema.
    pub fn fresh_tag(&self) -> Tag {
        loop {
            let tag = Tag::generate();
            if !self.contains_tag(tag) {
                return tag;
            }
        }
    }

    // ==================== Alterations ====================
    //
    // Every alteration returns a new schema; the receiver is never changed.

    /// Add a column. A fresh tag is assigned unless the column's tag is
    /// unused in this schema already.
    pub fn add_column(&self, mut column: Column) -> Result<Schema, SchemaError> {
        if self.column_by_name(&column.name).is_some() {
            return Err(SchemaError::DuplicateColumn(column.name));
        }
        if self.contains_tag(column.tag) {
            column.tag = self.fresh_tag();
        }
        if column.is_primary_key() {
            return Err(SchemaError::InvalidPrimaryKey(
                "use with_primary_key to change the key".to_string(),
            ));
        }
        if !column.nullable && column.default.is_none() {
            return Err(SchemaError::InvalidDefault(format!(
                "new NOT NULL column '{}' needs a default",
                column.name
            )));
        }
        let mut columns = self.columns.clone();
        columns.push(column);
        Schema::new(columns)
    }

    /// Remove a column. Primary key columns can't be dropped.
    pub fn drop_column(&self, name: &str) -> Result<Schema, SchemaError> {
        let col = self
            .column_by_name(name)
            .ok_or_else(|| SchemaError::ColumnNotFound(name.to_string()))?;
        if col.is_primary_key() {
            return Err(SchemaError::CannotRemovePrimaryKey(name.to_string()));
        }
        let tag = col.tag;
        Schema::new(self.columns.iter().filter(|c| c.tag != tag).cloned().collect())
    }

    /// Rename a column, keeping its tag.
    pub fn rename_column(&self, from: &str, to: &str) -> Result<Schema, SchemaError> {
        if self.column_by_name(to).is_some() {
            return Err(SchemaError::DuplicateColumn(to.to_string()));
        }
        self.map_column(from, |c| c.name = to.to_string())
    }

    /// Change a column's type and nullability, keeping its tag.
    pub fn modify_column(&self, name: &str, data_type: DataType, nullable: bool) -> Result<Schema, SchemaError> {
        self.map_column(name, |c| {
            c.data_type = data_type;
            c.nullable = nullable;
            if let Some(default) = c.default.take() {
                c.default = super::value::coerce(&default, &data_type).ok().filter(|v| !v.is_null());
            }
        })
    }

    /// Redefine the primary key. An empty list makes the table key-less.
    pub fn with_primary_key(&self, names: &[&str]) -> Result<Schema, SchemaError> {
        for name in names {
            if self.column_by_name(name).is_none() {
                return Err(SchemaError::InvalidPrimaryKey(name.to_string()));
            }
        }
        let columns = self
            .columns
            .iter()
            .cloned()
            .map(|mut c| {
                match names.iter().position(|n| *n == c.name) {
                    Some(pos) => {
                        c.key = KeyRole::Primary(pos as u16);
                        c.nullable = false;
                    }
                    None => c.key = KeyRole::Value,
                }
                c
            })
            .collect();
        Schema::new(columns)
    }

    fn map_column(&self, name: &str, f: impl FnOnce(&mut Column)) -> Result<Schema, SchemaError> {
        let pos = self
            .columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| SchemaError::ColumnNotFound(name.to_string()))?;
        let mut columns = self.columns.clone();
        f(&mut columns[pos]);
        Schema::new(columns)
    }

    // ==================== Rows ====================

    /// Validate a row against this schema, filling defaults and normalizing
    /// values to their column types.
    pub fn conform_row(&self, row: &Row) -> Result<Row, SchemaError> {
        for (tag, _) in row.iter() {
            if !self.contains_tag(tag) {
                return Err(SchemaError::InvalidRow(format!("unknown column tag {}", tag)));
            }
        }
        let mut out = Row::new();
        for col in &self.columns {
            let value = col
                .validate(row.try_get(col.tag).cloned())
                .map_err(SchemaError::InvalidRow)?;
            out.set(col.tag, value);
        }
        Ok(out)
    }

    /// Build a row from column names.
    pub fn row<'a, V: Into<Value>>(
        &self,
        values: impl IntoIterator<Item = (&'a str, V)>,
    ) -> Result<Row, SchemaError> {
        let mut row = Row::new();
        for (name, value) in values {
            let col = self
                .column_by_name(name)
                .ok_or_else(|| SchemaError::ColumnNotFound(name.to_string()))?;
            row.set(col.tag, value.into());
        }
        Ok(row)
    }

    /// Primary key values of a row, in key order.
    pub fn key_of(&self, row: &Row) -> Vec<Value> {
        self.primary_key().iter().map(|c| row.get(c.tag).clone()).collect()
    }
}

/// Schema-related errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("duplicate column tag: {0}")]
    DuplicateTag(Tag),

    #[error("invalid column name: '{0}'")]
    InvalidColumnName(String),

    #[error("invalid primary key: {0}")]
    InvalidPrimaryKey(String),

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("cannot remove primary key column: {0}")]
    CannotRemovePrimaryKey(String),

    #[error("invalid default: {0}")]
    InvalidDefault(String),

    #[error("invalid row: {0}")]
    InvalidRow(String),
}

/// Builder for creating table schemas.
#[derive(Default)]
pub struct SchemaBuilder {
    columns: Vec<Column>,
    primary_key: Vec<String>,
}

impl SchemaBuilder {
    /// Start building a new schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column.
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Add a nullable column with just name and type.
    pub fn add_column(self, name: impl Into<String>, data_type: DataType) -> Self {
        self.column(Column::new(name, data_type))
    }

    /// Add a non-nullable column.
    pub fn add_required_column(self, name: impl Into<String>, data_type: DataType) -> Self {
        self.column(Column::new(name, data_type).not_null())
    }

    /// Append a column to the primary key.
    pub fn primary_key(mut self, column_name: impl Into<String>) -> Self {
        self.primary_key.push(column_name.into());
        self
    }

    /// Build the schema.
    pub fn build(self) -> Result<Schema, SchemaError> {
        let mut columns = self.columns;
        for (pos, name) in self.primary_key.iter().enumerate() {
            let col = columns
                .iter_mut()
                .find(|c| &c.name == name)
                .ok_or_else(|| SchemaError::InvalidPrimaryKey(name.clone()))?;
            col.key = KeyRole::Primary(pos as u16);
            col.nullable = false;
        }
        Schema::new(columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        SchemaBuilder::new()
            .add_required_column("id", DataType::BigInt)
            .add_required_column("name", DataType::Text)
            .add_column("email", DataType::Text)
            .add_column("age", DataType::Int)
            .primary_key("id")
            .build()
            .unwrap()
    }

    #[test]
    fn test_schema_validation() {
        let schema = sample_schema();
        assert!(schema.validate().is_ok());
        assert_eq!(schema.primary_key().len(), 1);
        assert_eq!(schema.primary_key()[0].name, "id");
        assert!(!schema.is_keyless());
    }

    #[test]
    fn test_schema_duplicate_column() {
        let result = SchemaBuilder::new()
            .add_column("name", DataType::Text)
            .add_column("name", DataType::Int)
            .build();
        assert!(matches!(result, Err(SchemaError::DuplicateColumn(_))));
    }

    #[test]
    fn test_schema_duplicate_tag() {
        let tag = Tag::new(7);
        let result = Schema::new(vec![
            Column::with_tag(tag, "a", DataType::Int),
            Column::with_tag(tag, "b", DataType::Int),
        ]);
        assert!(matches!(result, Err(SchemaError::DuplicateTag(_))));
    }

    #[test]
    fn test_schema_invalid_primary_key() {
        let result = SchemaBuilder::new()
            .add_column("name", DataType::Text)
            .primary_key("id")
            .build();
        assert!(matches!(result, Err(SchemaError::InvalidPrimaryKey(_))));
    }

    #[test]
    fn test_composite_key_order() {
        let schema = SchemaBuilder::new()
            .add_column("a", DataType::Int)
            .add_column("b", DataType::Text)
            .primary_key("b")
            .primary_key("a")
            .build()
            .unwrap();
        let names: Vec<_> = schema.primary_key().iter().map(|c| c.name.clone()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_rename_keeps_tag() {
        let schema = sample_schema();
        let tag = schema.column_by_name("email").unwrap().tag;
        let renamed = schema.rename_column("email", "mail").unwrap();
        assert_eq!(renamed.column_by_name("mail").unwrap().tag, tag);
        assert!(renamed.column_by_name("email").is_none());
    }

    #[test]
    fn test_drop_then_add_gets_new_tag() {
        let schema = sample_schema();
        let old_tag = schema.column_by_name("age").unwrap().tag;
        let dropped = schema.drop_column("age").unwrap();
        let readded = dropped.add_column(Column::new("age", DataType::Int)).unwrap();
        assert_ne!(readded.column_by_name("age").unwrap().tag, old_tag);
    }

    #[test]
    fn test_cannot_drop_primary_key() {
        let schema = sample_schema();
        assert!(matches!(
            schema.drop_column("id"),
            Err(SchemaError::CannotRemovePrimaryKey(_))
        ));
    }

    #[test]
    fn test_add_not_null_requires_default() {
        let schema = sample_schema();
        assert!(schema.add_column(Column::new("x", DataType::Int).not_null()).is_err());
        assert!(schema
            .add_column(Column::new("x", DataType::Int).not_null().with_default(0))
            .is_ok());
    }

    #[test]
    fn test_conform_row() {
        let schema = sample_schema();
        let row = schema.row([("id", Value::Int(1)), ("name", Value::text("Alice"))]).unwrap();
        let conformed = schema.conform_row(&row).unwrap();
        assert_eq!(schema.key_of(&conformed), vec![Value::Int(1)]);

        let missing_name = schema.row([("id", Value::Int(2))]).unwrap();
        assert!(schema.conform_row(&missing_name).is_err());

        let wrong_type = schema
            .row([("id", Value::Int(3)), ("name", Value::text("Bob")), ("age", Value::text("x"))])
            .unwrap();
        assert!(schema.conform_row(&wrong_type).is_err());
    }

    #[test]
    fn test_redefine_primary_key() {
        let schema = sample_schema();
        let rekeyed = schema.with_primary_key(&["name", "id"]).unwrap();
        let names: Vec<_> = rekeyed.primary_key().iter().map(|c| c.name.clone()).collect();
        assert_eq!(names, vec!["name", "id"]);
        assert_ne!(rekeyed.key_shape(), schema.key_shape());
        // integer widths share a key encoding
        let narrowed = schema.modify_column("id", DataType::Int, false).unwrap();
        assert_eq!(narrowed.key_shape(), schema.key_shape());
        let retyped = schema.modify_column("id", DataType::Text, false).unwrap();
        assert_ne!(retyped.key_shape(), schema.key_shape());
        let keyless = schema.with_primary_key(&[]).unwrap();
        assert!(keyless.is_keyless());
    }

    #[test]
    fn test_schema_serialization() {
        let schema = sample_schema();
        let json = serde_json::to_string(&schema).unwrap();
        let back: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, back);
    }
}
