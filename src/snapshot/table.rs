//! Table snapshots: a schema plus a row index.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{format_key, reconcile, DataType, Row, Schema, Tag, Value};
use crate::index::{self, codec, IndexIter, IndexMutator, RowIndex};
use crate::storage::{ObjectId, StorageError, StorageResult, Store};
use crate::warnings::Warnings;

/// Stored form of a table: ids of its schema and row index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct TableObject {
    schema: ObjectId,
    rows: ObjectId,
}

/// One version of a table.
#[derive(Debug, Clone)]
pub struct Table {
    schema: Schema,
    rows: RowIndex,
}

impl Table {
    /// An empty table with the given schema.
    pub fn create(store: &Store, schema: Schema) -> StorageResult<Self> {
        Ok(Self {
            schema,
            rows: RowIndex::empty(store)?,
        })
    }

    pub fn load(store: &Store, id: &ObjectId) -> StorageResult<Self> {
        let object: TableObject = store.read_json(id)?;
        let schema: Schema = store.read_json(&object.schema)?;
        Ok(Self {
            schema,
            rows: RowIndex::load(store, object.rows),
        })
    }

    /// Persist the table object and return its id. Unchanged tables always
    /// get the same id.
    pub fn write(&self) -> StorageResult<ObjectId> {
        let store = self.rows.store();
        let object = TableObject {
            schema: store.write_json(&self.schema)?,
            rows: self.rows.root(),
        };
        store.write_json(&object)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &RowIndex {
        &self.rows
    }

    pub fn store(&self) -> &Store {
        self.rows.store()
    }

    /// Number of rows (key-less duplicates included).
    pub fn row_count(&self) -> StorageResult<u64> {
        if !self.schema.is_keyless() {
            return self.rows.count();
        }
        let mut total = 0;
        for entry in self.rows.iter() {
            let (_, value) = entry?;
            total += codec::decode_keyless(&value)?.0;
        }
        Ok(total)
    }

    /// Look up a row by primary key values.
    pub fn get(&self, key: &[Value]) -> StorageResult<Option<Row>> {
        if self.schema.is_keyless() {
            return Err(StorageError::SchemaViolation(
                "key-less tables have no primary key to look up".to_string(),
            ));
        }
        let key = index::encode_key(key);
        match self.rows.get(&key)? {
            Some(value) => Ok(Some(decode_entry(&self.schema, &key, &value)?.0)),
            None => Ok(None),
        }
    }

    /// All rows in index order. Duplicate key-less rows are repeated.
    pub fn scan(&self) -> TableScan {
        TableScan {
            schema: self.schema.clone(),
            entries: self.rows.iter(),
            repeat: None,
        }
    }

    /// Start a batch of row writes.
    pub fn edit(&self) -> TableEditor {
        TableEditor {
            schema: self.schema.clone(),
            rows: self.rows.edit(),
        }
    }

    /// Swap the row index, keeping the schema.
    pub(crate) fn with_rows(&self, rows: RowIndex) -> Table {
        Table {
            schema: self.schema.clone(),
            rows,
        }
    }

    /// Change the schema, rewriting rows when their stored form changes.
    ///
    /// Dropped columns are stripped, retyped columns are coerced (failures
    /// become null and are reported), added columns with a default are
    /// backfilled, and a new primary key re-keys every row.
    pub fn alter(&self, schema: Schema, warnings: &mut Warnings) -> StorageResult<Table> {
        let mapping = reconcile(&self.schema, &schema);
        let rekey = self.schema.key_shape() != schema.key_shape();
        let backfill = mapping
            .to_only()
            .any(|c| c.to.as_ref().is_some_and(|col| col.default.is_some()));
        let rewrite = rekey || backfill || mapping.from_only().next().is_some() || mapping.matched().any(|c| c.needs_coercion());

        if !rewrite {
            return Ok(Table {
                schema,
                rows: self.rows.clone(),
            });
        }

        let mut entries: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        let mut counts: BTreeMap<Vec<u8>, (u64, Vec<u8>)> = BTreeMap::new();
        for row in self.scan() {
            let converted = mapping.convert_row(&row?, warnings);
            let conformed = schema
                .conform_row(&converted)
                .map_err(|e| StorageError::SchemaViolation(e.to_string()))?;
            if schema.is_keyless() {
                let bytes = codec::encode_values(&stored_columns(&schema), &conformed);
                counts
                    .entry(codec::keyless_key(&bytes))
                    .or_insert((0, bytes))
                    .0 += 1;
            } else {
                let (key, value) = encode_keyed(&schema, &conformed);
                if entries.insert(key, value).is_some() {
                    return Err(StorageError::RowAlreadyExists {
                        key: format_key(&schema.key_of(&conformed)),
                    });
                }
            }
        }
        let all = entries
            .into_iter()
            .chain(counts.into_iter().map(|(k, (n, bytes))| (k, codec::encode_keyless(n, &bytes))));
        let rows = RowIndex::from_entries(self.store(), all)?;
        debug!(rekey, rows = rows.count()?, "table rows rewritten for new schema");
        Ok(Table { schema, rows })
    }
}

/// Columns stored in the index value: every non-key column, or every column
/// of a key-less table.
pub(crate) fn stored_columns(schema: &Schema) -> Vec<(Tag, DataType)> {
    schema
        .columns()
        .iter()
        .filter(|c| !c.is_primary_key())
        .map(|c| (c.tag, c.data_type))
        .collect()
}

fn encode_keyed(schema: &Schema, row: &Row) -> (Vec<u8>, Vec<u8>) {
    let key = index::encode_key(&schema.key_of(row));
    let value = codec::encode_values(&stored_columns(schema), row);
    (key, value)
}

/// Decode one index entry into a row and its cardinality (always 1 for
/// keyed tables).
pub(crate) fn decode_entry(schema: &Schema, key: &[u8], value: &[u8]) -> StorageResult<(Row, u64)> {
    if schema.is_keyless() {
        let (count, bytes) = codec::decode_keyless(value)?;
        return Ok((codec::decode_values(bytes)?, count));
    }
    let key_values = index::decode_key(key)?;
    let pk = schema.primary_key_tags();
    if key_values.len() != pk.len() {
        return Err(StorageError::corrupted(
            "row key",
            format!("expected {} key values, found {}", pk.len(), key_values.len()),
        ));
    }
    let mut row = Row::new();
    for (tag, value) in pk.into_iter().zip(key_values) {
        row.set(tag, value);
    }
    codec::decode_values_into(value, &mut row)?;
    Ok((row, 1))
}

/// Iterator over the rows of a table.
pub struct TableScan {
    schema: Schema,
    entries: IndexIter,
    repeat: Option<(Row, u64)>,
}

impl Iterator for TableScan {
    type Item = StorageResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some((row, left)) = &mut self.repeat {
            if *left > 0 {
                *left -= 1;
                return Some(Ok(row.clone()));
            }
            self.repeat = None;
        }
        let entry = match self.entries.next()? {
            Ok(entry) => entry,
            Err(e) => return Some(Err(e)),
        };
        match decode_entry(&self.schema, &entry.0, &entry.1) {
            Ok((row, count)) => {
                if count > 1 {
                    self.repeat = Some((row.clone(), count - 1));
                }
                Some(Ok(row))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

/// Buffered row writes against one table version.
pub struct TableEditor {
    schema: Schema,
    rows: IndexMutator,
}

impl TableEditor {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    fn conform(&self, row: &Row) -> StorageResult<Row> {
        self.schema
            .conform_row(row)
            .map_err(|e| StorageError::SchemaViolation(e.to_string()))
    }

    fn keyless_entry(&self, row: &Row) -> StorageResult<(Vec<u8>, Vec<u8>, u64)> {
        let bytes = codec::encode_values(&stored_columns(&self.schema), row);
        let key = codec::keyless_key(&bytes);
        let count = match self.rows.get(&key)? {
            Some(existing) => codec::decode_keyless(&existing)?.0,
            None => 0,
        };
        Ok((key, bytes, count))
    }

    /// Insert a new row. Keyed tables reject an existing key; key-less
    /// tables add one more copy.
    pub fn insert(&mut self, row: &Row) -> StorageResult<()> {
        let row = self.conform(row)?;
        if self.schema.is_keyless() {
            let (key, bytes, count) = self.keyless_entry(&row)?;
            self.rows.put(key, codec::encode_keyless(count + 1, &bytes));
            return Ok(());
        }
        let (key, value) = encode_keyed(&self.schema, &row);
        if self.rows.get(&key)?.is_some() {
            return Err(StorageError::RowAlreadyExists {
                key: format_key(&self.schema.key_of(&row)),
            });
        }
        self.rows.put(key, value);
        Ok(())
    }

    /// Replace the row with the same primary key, which must exist.
    pub fn update(&mut self, row: &Row) -> StorageResult<()> {
        if self.schema.is_keyless() {
            return Err(StorageError::SchemaViolation(
                "key-less rows are updated by deleting and inserting".to_string(),
            ));
        }
        let row = self.conform(row)?;
        let (key, value) = encode_keyed(&self.schema, &row);
        if self.rows.get(&key)?.is_none() {
            return Err(StorageError::RowNotFound {
                key: format_key(&self.schema.key_of(&row)),
            });
        }
        self.rows.put(key, value);
        Ok(())
    }

    /// Insert or replace by primary key.
    pub fn upsert(&mut self, row: &Row) -> StorageResult<()> {
        if self.schema.is_keyless() {
            return self.insert(row);
        }
        let row = self.conform(row)?;
        let (key, value) = encode_keyed(&self.schema, &row);
        self.rows.put(key, value);
        Ok(())
    }

    /// Delete a row by primary key. Returns whether it existed.
    pub fn delete_key(&mut self, key: &[Value]) -> StorageResult<bool> {
        let key = index::encode_key(key);
        let existed = self.rows.get(&key)?.is_some();
        self.rows.delete(key);
        Ok(existed)
    }

    /// Delete a row. Keyed tables delete by the row's key; key-less tables
    /// remove one copy of an identical row.
    pub fn delete(&mut self, row: &Row) -> StorageResult<bool> {
        if !self.schema.is_keyless() {
            let key = self.schema.key_of(row);
            return self.delete_key(&key);
        }
        let row = self.conform(row)?;
        let (key, bytes, count) = self.keyless_entry(&row)?;
        match count {
            0 => Ok(false),
            1 => {
                self.rows.delete(key);
                Ok(true)
            }
            n => {
                self.rows.put(key, codec::encode_keyless(n - 1, &bytes));
                Ok(true)
            }
        }
    }

    /// Write the edits and return the new table version.
    pub fn finish(self) -> StorageResult<Table> {
        Ok(Table {
            schema: self.schema,
            rows: self.rows.write()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, SchemaBuilder};

    fn people() -> Schema {
        SchemaBuilder::new()
            .add_required_column("id", DataType::Int)
            .add_column("name", DataType::Text)
            .add_column("age", DataType::SmallInt)
            .primary_key("id")
            .build()
            .unwrap()
    }

    fn person(schema: &Schema, id: i64, name: &str, age: i64) -> Row {
        schema
            .row([("id", Value::Int(id)), ("name", Value::text(name)), ("age", Value::Int(age))])
            .unwrap()
    }

    fn rows(table: &Table) -> Vec<Row> {
        table.scan().collect::<StorageResult<Vec<_>>>().unwrap()
    }

    #[test]
    fn test_insert_get_write_load() {
        let store = Store::in_memory();
        let schema = people();
        let mut edit = Table::create(&store, schema.clone()).unwrap().edit();
        edit.insert(&person(&schema, 2, "bob", 40)).unwrap();
        edit.insert(&person(&schema, 1, "alice", 30)).unwrap();
        let table = edit.finish().unwrap();

        let id = table.write().unwrap();
        let loaded = Table::load(&store, &id).unwrap();
        assert_eq!(loaded.schema(), &schema);
        assert_eq!(loaded.row_count().unwrap(), 2);
        let alice = loaded.get(&[Value::Int(1)]).unwrap().unwrap();
        assert_eq!(alice.get_by_name(&schema, "name"), &Value::text("alice"));
        // scan is in key order
        assert_eq!(rows(&loaded)[0], person(&schema, 1, "alice", 30));
        assert_eq!(table.write().unwrap(), id);
    }

    #[test]
    fn test_duplicate_and_missing_keys() {
        let store = Store::in_memory();
        let schema = people();
        let mut edit = Table::create(&store, schema.clone()).unwrap().edit();
        edit.insert(&person(&schema, 1, "a", 1)).unwrap();
        let err = edit.insert(&person(&schema, 1, "b", 2)).unwrap_err();
        assert!(matches!(err, StorageError::RowAlreadyExists { .. }));
        let err = edit.update(&person(&schema, 9, "x", 1)).unwrap_err();
        assert!(err.is_not_found());
        assert!(edit.delete_key(&[Value::Int(1)]).unwrap());
        assert!(!edit.delete_key(&[Value::Int(1)]).unwrap());
    }

    #[test]
    fn test_rows_are_validated() {
        let store = Store::in_memory();
        let schema = people();
        let mut edit = Table::create(&store, schema.clone()).unwrap().edit();
        let too_old = person(&schema, 1, "a", 100_000);
        assert!(matches!(edit.insert(&too_old), Err(StorageError::SchemaViolation(_))));
    }

    #[test]
    fn test_keyless_duplicates_are_counted() {
        let store = Store::in_memory();
        let schema = people().with_primary_key(&[]).unwrap();
        let row = person(&schema, 1, "a", 1);
        let mut edit = Table::create(&store, schema.clone()).unwrap().edit();
        edit.insert(&row).unwrap();
        edit.insert(&row).unwrap();
        edit.insert(&person(&schema, 2, "b", 2)).unwrap();
        let table = edit.finish().unwrap();
        assert_eq!(table.rows().count().unwrap(), 2);
        assert_eq!(table.row_count().unwrap(), 3);
        assert_eq!(rows(&table).iter().filter(|r| **r == row).count(), 2);

        let mut edit = table.edit();
        assert!(edit.delete(&row).unwrap());
        let table = edit.finish().unwrap();
        assert_eq!(table.row_count().unwrap(), 2);
    }

    #[test]
    fn test_rename_column_keeps_rows() {
        let store = Store::in_memory();
        let schema = people();
        let mut edit = Table::create(&store, schema.clone()).unwrap().edit();
        edit.insert(&person(&schema, 1, "a", 1)).unwrap();
        let table = edit.finish().unwrap();

        let mut warnings = Warnings::new();
        let renamed = table
            .alter(schema.rename_column("name", "full_name").unwrap(), &mut warnings)
            .unwrap();
        assert_eq!(renamed.rows(), table.rows());
        let added = renamed
            .alter(renamed.schema().add_column(Column::new("note", DataType::Text)).unwrap(), &mut warnings)
            .unwrap();
        assert_eq!(added.rows(), table.rows());
    }

    #[test]
    fn test_alter_rewrites_rows() {
        let store = Store::in_memory();
        let schema = people();
        let mut edit = Table::create(&store, schema.clone()).unwrap().edit();
        edit.insert(&person(&schema, 1, "12", 1)).unwrap();
        edit.insert(&person(&schema, 2, "twelve", 2)).unwrap();
        let table = edit.finish().unwrap();

        let mut warnings = Warnings::new();
        let retyped = table
            .alter(schema.modify_column("name", DataType::Int, true).unwrap(), &mut warnings)
            .unwrap();
        assert_eq!(warnings.total(), 1);
        let first = retyped.get(&[Value::Int(1)]).unwrap().unwrap();
        assert_eq!(first.get_by_name(retyped.schema(), "name"), &Value::Int(12));

        let with_default = retyped
            .alter(
                retyped
                    .schema()
                    .add_column(Column::new("active", DataType::Boolean).not_null().with_default(true))
                    .unwrap(),
                &mut warnings,
            )
            .unwrap();
        let second = with_default.get(&[Value::Int(2)]).unwrap().unwrap();
        assert_eq!(second.get_by_name(with_default.schema(), "active"), &Value::Bool(true));
        assert_eq!(second.get_by_name(with_default.schema(), "name"), &Value::Null);

        let dropped = with_default
            .alter(with_default.schema().drop_column("age").unwrap(), &mut warnings)
            .unwrap();
        let age_tag = schema.column_by_name("age").unwrap().tag;
        assert!(rows(&dropped).iter().all(|r| r.try_get(age_tag).is_none()));
    }

    #[test]
    fn test_rekey_detects_collisions() {
        let store = Store::in_memory();
        let schema = people();
        let mut edit = Table::create(&store, schema.clone()).unwrap().edit();
        edit.insert(&person(&schema, 1, "same", 1)).unwrap();
        edit.insert(&person(&schema, 2, "same", 2)).unwrap();
        let table = edit.finish().unwrap();

        let mut warnings = Warnings::new();
        let by_age = table.alter(schema.with_primary_key(&["age"]).unwrap(), &mut warnings).unwrap();
        assert!(by_age.get(&[Value::Int(2)]).unwrap().is_some());
        let err = table.alter(schema.with_primary_key(&["name"]).unwrap(), &mut warnings);
        assert!(matches!(err, Err(StorageError::RowAlreadyExists { .. })));
    }
}
