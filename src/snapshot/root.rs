//! Database roots: the set of tables at one point in history.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::table::Table;
use crate::storage::{ObjectId, StorageError, StorageResult, Store, TableId, TableName};

/// A table as recorded in a root: its stable identity and current version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootEntry {
    pub id: TableId,
    pub table: ObjectId,
}

/// Table name -> table mapping for one snapshot.
///
/// A root may also point at the conflict set of an unfinished merge; conflicts
/// therefore travel with the data they describe.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Root {
    tables: BTreeMap<TableName, RootEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    conflicts: Option<ObjectId>,
}

impl Root {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(store: &Store, id: &ObjectId) -> StorageResult<Self> {
        store.read_json(id)
    }

    pub fn write(&self, store: &Store) -> StorageResult<ObjectId> {
        store.write_json(self)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn contains(&self, name: &TableName) -> bool {
        self.tables.contains_key(name)
    }

    pub fn entry(&self, name: &TableName) -> Option<&RootEntry> {
        self.tables.get(name)
    }

    /// Entries sorted by table name.
    pub fn entries(&self) -> impl Iterator<Item = (&TableName, &RootEntry)> + '_ {
        self.tables.iter()
    }

    pub fn table_names(&self) -> Vec<TableName> {
        self.tables.keys().cloned().collect()
    }

    /// Find a table by identity, whatever it's called here.
    pub fn find_by_id(&self, id: &TableId) -> Option<(&TableName, &RootEntry)> {
        self.tables.iter().find(|(_, entry)| &entry.id == id)
    }

    /// Load a table if present.
    pub fn table(&self, store: &Store, name: &TableName) -> StorageResult<Option<Table>> {
        self.tables
            .get(name)
            .map(|entry| Table::load(store, &entry.table))
            .transpose()
    }

    /// Load a table that must exist.
    pub fn require_table(&self, store: &Store, name: &TableName) -> StorageResult<Table> {
        self.table(store, name)?
            .ok_or_else(|| StorageError::TableNotFound(name.clone()))
    }

    /// Record a table version under `name`.
    pub fn put(&mut self, name: TableName, entry: RootEntry) {
        self.tables.insert(name, entry);
    }

    /// Write `table` and record it under `name`, keeping the identity it
    /// already has (or the given one for a new table).
    pub fn put_table(&mut self, name: TableName, id: TableId, table: &Table) -> StorageResult<()> {
        let table = table.write()?;
        self.tables.insert(name, RootEntry { id, table });
        Ok(())
    }

    pub fn remove(&mut self, name: &TableName) -> Option<RootEntry> {
        self.tables.remove(name)
    }

    /// Rename a table, keeping its identity.
    pub fn rename(&mut self, from: &TableName, to: TableName) -> StorageResult<()> {
        if self.tables.contains_key(&to) {
            return Err(StorageError::TableAlreadyExists(to));
        }
        let entry = self
            .tables
            .remove(from)
            .ok_or_else(|| StorageError::TableNotFound(from.clone()))?;
        self.tables.insert(to, entry);
        Ok(())
    }

    /// conflict set of an in-progress merge
    pub fn conflicts(&self) -> Option<ObjectId> {
        self.conflicts
    }

    pub fn set_conflicts(&mut self, conflicts: Option<ObjectId>) {
        self.conflicts = conflicts;
    }

    /// Same tables, ignoring any recorded conflicts.
    pub fn same_tables(&self, other: &Root) -> bool {
        self.tables == other.tables
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DataType, SchemaBuilder};

    fn name(s: &str) -> TableName {
        TableName::new(s).unwrap()
    }

    fn empty_table(store: &Store) -> Table {
        let schema = SchemaBuilder::new()
            .add_required_column("id", DataType::Int)
            .primary_key("id")
            .build()
            .unwrap();
        Table::create(store, schema).unwrap()
    }

    #[test]
    fn test_round_trip_and_stable_id() {
        let store = Store::in_memory();
        let mut root = Root::empty();
        root.put_table(name("users"), TableId::generate(), &empty_table(&store))
            .unwrap();
        let id = root.write(&store).unwrap();
        let loaded = Root::load(&store, &id).unwrap();
        assert_eq!(loaded, root);
        assert_eq!(loaded.write(&store).unwrap(), id);
        assert!(loaded.require_table(&store, &name("users")).is_ok());
        assert!(loaded.require_table(&store, &name("other")).unwrap_err().is_not_found());
    }

    #[test]
    fn test_rename_keeps_identity() {
        let store = Store::in_memory();
        let mut root = Root::empty();
        let table_id = TableId::generate();
        root.put_table(name("a"), table_id.clone(), &empty_table(&store)).unwrap();
        root.put_table(name("b"), TableId::generate(), &empty_table(&store)).unwrap();

        assert!(root.rename(&name("a"), name("b")).unwrap_err().is_conflict());
        root.rename(&name("a"), name("c")).unwrap();
        let (found, _) = root.find_by_id(&table_id).unwrap();
        assert_eq!(found, &name("c"));
    }

    #[test]
    fn test_conflicts_do_not_change_tables() {
        let mut root = Root::empty();
        let before = root.clone();
        root.set_conflicts(Some(ObjectId::hash_bytes(b"conflicts").unwrap()));
        assert!(root.same_tables(&before));
        assert_ne!(root, before);
    }
}
