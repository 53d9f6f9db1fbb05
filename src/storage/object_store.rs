//! Content-addressed object store and mutable ref store ports.
//!
//! Everything above the storage layer talks to a [`Store`], which bundles one
//! [`ObjectStore`] (immutable hash -> bytes) and one [`RefStore`] (mutable
//! name -> hash with compare-and-swap). Backends implement the two traits;
//! [`MemoryStore`] implements both in process memory.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::ObjectId;

/// Immutable hash -> bytes mapping.
///
/// `put` of the same bytes always returns the same id; existing values are
/// never overwritten.
pub trait ObjectStore: Send + Sync {
    /// fetch the bytes stored under `id`, if any
    fn get(&self, id: &ObjectId) -> StorageResult<Option<Vec<u8>>>;

    /// store `bytes` and return their id
    fn put(&self, bytes: &[u8]) -> StorageResult<ObjectId>;

    /// check whether `id` is present
    fn contains(&self, id: &ObjectId) -> StorageResult<bool> {
        Ok(self.get(id)?.is_some())
    }
}

/// Mutable name -> object id mapping (branch pointers, working sets).
pub trait RefStore: Send + Sync {
    /// read the current target of `name`
    fn read_ref(&self, name: &str) -> StorageResult<Option<ObjectId>>;

    /// Compare-and-swap update of `name`.
    ///
    /// `expected` is the target the caller last observed (`None` = the ref must
    /// not exist). `new` is the new target (`None` = delete the ref). Fails with
    /// `ConcurrentModification` if the ref no longer matches `expected`.
    fn update_ref(&self, name: &str, expected: Option<ObjectId>, new: Option<ObjectId>) -> StorageResult<()>;

    /// list refs whose name starts with `prefix`, sorted by name
    fn list_refs(&self, prefix: &str) -> StorageResult<Vec<(String, ObjectId)>>;
}

/// In-process store backend.
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<ObjectId, Arc<[u8]>>>,
    refs: Mutex<BTreeMap<String, ObjectId>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// number of distinct objects held
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }
}

impl ObjectStore for MemoryStore {
    fn get(&self, id: &ObjectId) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.objects.read().get(id).map(|bytes| bytes.to_vec()))
    }

    fn put(&self, bytes: &[u8]) -> StorageResult<ObjectId> {
        let id = ObjectId::hash_bytes(bytes)?;
        self.objects.write().entry(id).or_insert_with(|| Arc::from(bytes));
        Ok(id)
    }

    fn contains(&self, id: &ObjectId) -> StorageResult<bool> {
        Ok(self.objects.read().contains_key(id))
    }
}

impl RefStore for MemoryStore {
    fn read_ref(&self, name: &str) -> StorageResult<Option<ObjectId>> {
        Ok(self.refs.lock().get(name).copied())
    }

    fn update_ref(&self, name: &str, expected: Option<ObjectId>, new: Option<ObjectId>) -> StorageResult<()> {
        let mut refs = self.refs.lock();
        if refs.get(name).copied() != expected {
            return Err(StorageError::ConcurrentModification {
                ref_name: name.to_string(),
            });
        }
        match new {
            Some(target) => refs.insert(name.to_string(), target),
            None => refs.remove(name),
        };
        Ok(())
    }

    fn list_refs(&self, prefix: &str) -> StorageResult<Vec<(String, ObjectId)>> {
        Ok(self
            .refs
            .lock()
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, id)| (name.clone(), *id))
            .collect())
    }
}

/// Cheaply clonable handle over an object store and a ref store.
#[derive(Clone)]
pub struct Store {
    objects: Arc<dyn ObjectStore>,
    refs: Arc<dyn RefStore>,
}

impl Store {
    /// combine an object store and a ref store
    pub fn new(objects: Arc<dyn ObjectStore>, refs: Arc<dyn RefStore>) -> Self {
        Self { objects, refs }
    }

    /// a fresh in-memory store
    pub fn in_memory() -> Self {
        let backend = Arc::new(MemoryStore::new());
        Self::new(backend.clone(), backend)
    }

    /// fetch an object that must exist
    pub fn get(&self, id: &ObjectId) -> StorageResult<Vec<u8>> {
        self.objects.get(id)?.ok_or(StorageError::ObjectNotFound(*id))
    }

    /// fetch an object that may be absent
    pub fn try_get(&self, id: &ObjectId) -> StorageResult<Option<Vec<u8>>> {
        self.objects.get(id)
    }

    pub fn put(&self, bytes: &[u8]) -> StorageResult<ObjectId> {
        self.objects.put(bytes)
    }

    pub fn contains(&self, id: &ObjectId) -> StorageResult<bool> {
        self.objects.contains(id)
    }

    /// deserialize a JSON object
    pub fn read_json<T: DeserializeOwned>(&self, id: &ObjectId) -> StorageResult<T> {
        let bytes = self.get(id)?;
        serde_json::from_slice(&bytes).map_err(|e| StorageError::corrupted(id, e.to_string()))
    }

    /// serialize and store a JSON object
    pub fn write_json<T: Serialize>(&self, value: &T) -> StorageResult<ObjectId> {
        let bytes = serde_json::to_vec(value)?;
        self.put(&bytes)
    }

    /// the ref store
    pub fn refs(&self) -> &dyn RefStore {
        self.refs.as_ref()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_is_content_addressed() {
        let store = MemoryStore::new();
        let a = store.put(b"row data").unwrap();
        let b = store.put(b"row data").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.object_count(), 1);
        assert_eq!(store.get(&a).unwrap().as_deref(), Some(&b"row data"[..]));
        assert_eq!(a, ObjectId::hash_bytes(b"row data").unwrap());
    }

    #[test]
    fn test_missing_object() {
        let store = Store::in_memory();
        let id = ObjectId::hash_bytes(b"never stored").unwrap();
        assert!(store.try_get(&id).unwrap().is_none());
        assert!(matches!(store.get(&id), Err(StorageError::ObjectNotFound(_))));
    }

    #[test]
    fn test_ref_compare_and_swap() {
        let store = MemoryStore::new();
        let a = store.put(b"a").unwrap();
        let b = store.put(b"b").unwrap();

        store.update_ref("refs/heads/main", None, Some(a)).unwrap();
        // creating again must fail
        let err = store.update_ref("refs/heads/main", None, Some(b)).unwrap_err();
        assert!(err.is_retriable());

        // stale expectation
        assert!(store.update_ref("refs/heads/main", Some(b), Some(a)).is_err());

        store.update_ref("refs/heads/main", Some(a), Some(b)).unwrap();
        assert_eq!(store.read_ref("refs/heads/main").unwrap(), Some(b));

        store.update_ref("refs/heads/main", Some(b), None).unwrap();
        assert_eq!(store.read_ref("refs/heads/main").unwrap(), None);
    }

    #[test]
    fn test_list_refs_by_prefix() {
        let store = MemoryStore::new();
        let a = store.put(b"a").unwrap();
        store.update_ref("refs/heads/main", None, Some(a)).unwrap();
        store.update_ref("refs/heads/dev", None, Some(a)).unwrap();
        store.update_ref("refs/workingSets/heads/main", None, Some(a)).unwrap();

        let heads = store.list_refs("refs/heads/").unwrap();
        let names: Vec<_> = heads.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["refs/heads/dev", "refs/heads/main"]);
    }

    #[test]
    fn test_json_round_trip() {
        let store = Store::in_memory();
        let mut map = BTreeMap::new();
        map.insert("b".to_string(), 2);
        map.insert("a".to_string(), 1);
        let id = store.write_json(&map).unwrap();
        let back: BTreeMap<String, i32> = store.read_json(&id).unwrap();
        assert_eq!(back, map);
    }
}
