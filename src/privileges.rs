//! Privilege persistence port.
//!
//! Users, roles and grants are loaded and saved through a [`PrivilegeStore`]
//! handed to the repository in its configuration. Nothing in the diff or
//! merge engine reads them.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum PrivilegeError {
    #[error("privilege file io error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed privilege file: {0}")]
    Format(#[from] serde_json::Error),
}

pub type PrivilegeResult<T> = Result<T, PrivilegeError>;

/// A user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

/// Privileges granted on one object (`*` for everything).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// user or role name
    pub grantee: String,
    pub database: String,
    pub table: String,
    pub privileges: BTreeSet<String>,
}

/// The whole persisted privilege document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PrivilegeData {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub roles: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub grants: Vec<Grant>,
}

impl PrivilegeData {
    pub fn user(&self, name: &str) -> Option<&User> {
        self.users.iter().find(|u| u.name == name)
    }

    /// Privileges of `grantee` on a table, including those granted to its
    /// roles and wildcard grants.
    pub fn privileges_of(&self, grantee: &str, database: &str, table: &str) -> BTreeSet<String> {
        let mut names: BTreeSet<&str> = BTreeSet::from([grantee]);
        if let Some(user) = self.user(grantee) {
            names.extend(user.roles.iter().map(String::as_str));
        }
        self.grants
            .iter()
            .filter(|g| names.contains(g.grantee.as_str()))
            .filter(|g| (g.database == "*" || g.database == database) && (g.table == "*" || g.table == table))
            .flat_map(|g| g.privileges.iter().cloned())
            .collect()
    }
}

/// Load/save port for privilege data.
pub trait PrivilegeStore: Send + Sync {
    fn load(&self) -> PrivilegeResult<PrivilegeData>;
    fn save(&self, data: &PrivilegeData) -> PrivilegeResult<()>;
}

/// Privileges kept in a JSON file. A missing file is created empty on first
/// load; saves replace the file atomically.
#[derive(Debug, Clone)]
pub struct JsonFilePrivileges {
    path: PathBuf,
}

impl JsonFilePrivileges {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PrivilegeStore for JsonFilePrivileges {
    fn load(&self) -> PrivilegeResult<PrivilegeData> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(PrivilegeData::default()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let data = PrivilegeData::default();
                self.save(&data)?;
                debug!(path = %self.path.display(), "created privilege file");
                Ok(data)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, data: &PrivilegeData) -> PrivilegeResult<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let mut file = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut file, data)?;
        file.write_all(b"\n")?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

/// Privileges held in memory only.
#[derive(Debug, Default)]
pub struct MemoryPrivileges {
    data: Mutex<PrivilegeData>,
}

impl MemoryPrivileges {
    pub fn new(data: PrivilegeData) -> Self {
        Self {
            data: Mutex::new(data),
        }
    }
}

impl PrivilegeStore for MemoryPrivileges {
    fn load(&self) -> PrivilegeResult<PrivilegeData> {
        Ok(self.data.lock().clone())
    }

    fn save(&self, data: &PrivilegeData) -> PrivilegeResult<()> {
        *self.data.lock() = data.clone();
        Ok(())
    }
}
