//! Git-backed store.
//!
//! Objects are stored as git blobs in a bare repository, so their ids are the
//! same ids [`ObjectId::hash_bytes`] computes. Refs are ordinary git references
//! pointing at those blobs; compare-and-swap goes through libgit2's
//! `reference_matching`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::{ErrorCode, Repository};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::object_store::{ObjectStore, RefStore, Store};
use crate::storage::types::ObjectId;

/// Object and ref store on top of a bare git repository.
pub struct GitStore {
    repo: Mutex<Repository>,
    path: PathBuf,
}

impl GitStore {
    /// Open an existing repository.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let repo = Repository::open_bare(&path).map_err(|e| {
            if e.code() == ErrorCode::NotFound {
                StorageError::NotInitialized(path.clone())
            } else {
                StorageError::Git(e)
            }
        })?;
        debug!(path = %path.display(), "opened git store");
        Ok(Self {
            repo: Mutex::new(repo),
            path,
        })
    }

    /// Initialize a new bare repository at `path`.
    pub fn init(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;
        let repo = Repository::init_bare(&path)?;
        info!(path = %path.display(), "initialized git store");
        Ok(Self {
            repo: Mutex::new(repo),
            path,
        })
    }

    /// Open if the repository exists, otherwise initialize it.
    pub fn open_or_init(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if path.join("HEAD").exists() {
            Self::open(path)
        } else {
            Self::init(path)
        }
    }

    /// Path of the repository.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// wrap this backend in a [`Store`] handle
    pub fn into_store(self) -> Store {
        let backend = Arc::new(self);
        Store::new(backend.clone(), backend)
    }

    fn check_ref_name(name: &str) -> StorageResult<()> {
        if git2::Reference::is_valid_name(name) {
            Ok(())
        } else {
            Err(StorageError::RefNotFound(format!("invalid ref name: {}", name)))
        }
    }

    fn moved(name: &str) -> StorageError {
        StorageError::ConcurrentModification {
            ref_name: name.to_string(),
        }
    }
}

impl ObjectStore for GitStore {
    fn get(&self, id: &ObjectId) -> StorageResult<Option<Vec<u8>>> {
        let repo = self.repo.lock();
        let result = match repo.find_blob(id.raw()) {
            Ok(blob) => Ok(Some(blob.content().to_vec())),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(StorageError::Git(e)),
        };
        result
    }

    fn put(&self, bytes: &[u8]) -> StorageResult<ObjectId> {
        let oid = self.repo.lock().blob(bytes)?;
        Ok(ObjectId::new(oid))
    }

    fn contains(&self, id: &ObjectId) -> StorageResult<bool> {
        let repo = self.repo.lock();
        let odb = repo.odb()?;
        Ok(odb.exists(id.raw()))
    }
}

impl RefStore for GitStore {
    fn read_ref(&self, name: &str) -> StorageResult<Option<ObjectId>> {
        Self::check_ref_name(name)?;
        let repo = self.repo.lock();
        let result = match repo.find_reference(name) {
            Ok(reference) => Ok(reference.target().map(ObjectId::new)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(StorageError::Git(e)),
        };
        result
    }

    fn update_ref(&self, name: &str, expected: Option<ObjectId>, new: Option<ObjectId>) -> StorageResult<()> {
        Self::check_ref_name(name)?;
        let repo = self.repo.lock();
        let log_message = match new {
            Some(target) => format!("tablevc: move to {}", target.short()),
            None => "tablevc: delete".to_string(),
        };

        let outcome = match (expected, new) {
            (None, None) => match repo.find_reference(name) {
                Ok(_) => Err(Self::moved(name)),
                Err(e) if e.code() == ErrorCode::NotFound => Ok(()),
                Err(e) => Err(StorageError::Git(e)),
            },
            (None, Some(target)) => match repo.reference(name, target.raw(), false, &log_message) {
                Ok(_) => Ok(()),
                Err(e) if e.code() == ErrorCode::Exists => Err(Self::moved(name)),
                Err(e) => Err(StorageError::Git(e)),
            },
            (Some(current), Some(target)) => {
                match repo.reference_matching(name, target.raw(), true, current.raw(), &log_message) {
                    Ok(_) => Ok(()),
                    Err(e) if matches!(e.code(), ErrorCode::Modified | ErrorCode::NotFound) => {
                        Err(Self::moved(name))
                    }
                    Err(e) => Err(StorageError::Git(e)),
                }
            }
            (Some(current), None) => {
                let mut reference = match repo.find_reference(name) {
                    Ok(reference) => reference,
                    Err(e) if e.code() == ErrorCode::NotFound => return Err(Self::moved(name)),
                    Err(e) => return Err(StorageError::Git(e)),
                };
                if reference.target() != Some(current.raw()) {
                    return Err(Self::moved(name));
                }
                reference.delete()?;
                Ok(())
            }
        };
        outcome
    }

    fn list_refs(&self, prefix: &str) -> StorageResult<Vec<(String, ObjectId)>> {
        let repo = self.repo.lock();
        let mut refs = Vec::new();
        for reference in repo.references()? {
            let reference = reference?;
            let (Some(name), Some(target)) = (reference.name(), reference.target()) else {
                continue;
            };
            if name.starts_with(prefix) {
                refs.push((name.to_string(), ObjectId::new(target)));
            }
        }
        refs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(refs)
    }
}
