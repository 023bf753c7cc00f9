//! Scoped key-value persistence for channel identities.
//!
//! Key material and relay sessions are persisted through an injected
//! [`Storage`] backend. [`ScopedStorage`] namespaces every key so several
//! independent channel identities can share one backend without collisions.
//!
//! # Key layout
//!
//! ```text
//! -{scope}:{module}:{key}     e.g. -CBWSDK:KeyAgreement:ownPrivateKey
//! -{scope}:{key}              e.g. -walletlink:session:id
//! ```

use std::collections::BTreeMap;
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::error::ChannelError;

/// Backend contract for persisted channel state.
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Read a value.
    fn get(&self, key: &str) -> Result<Option<String>, ChannelError>;
    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: &str) -> Result<(), ChannelError>;
    /// Delete a value. Deleting a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), ChannelError>;
    /// All keys currently stored.
    fn keys(&self) -> Result<Vec<String>, ChannelError>;
}

/// In-memory backend. State is lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, ChannelError> {
        let entries = self.entries.read().expect("storage lock poisoned");
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ChannelError> {
        let mut entries = self.entries.write().expect("storage lock poisoned");
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), ChannelError> {
        let mut entries = self.entries.write().expect("storage lock poisoned");
        entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, ChannelError> {
        let entries = self.entries.read().expect("storage lock poisoned");
        Ok(entries.keys().cloned().collect())
    }
}

/// JSON-file backend.
///
/// The whole map is rewritten on every mutation (write to a temp file, then
/// rename), and the file is restricted to the owner on unix.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Open (or lazily create) a store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ChannelError> {
        let path = path.into();
        let entries = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|e| {
                ChannelError::Storage(format!("failed to read {}: {e}", path.display()))
            })?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content).map_err(|e| {
                    ChannelError::Storage(format!("failed to parse {}: {e}", path.display()))
                })?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), ChannelError> {
        let storage_err =
            |e: std::io::Error| ChannelError::Storage(format!("{}: {e}", self.path.display()));

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(storage_err)?;
        }

        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| ChannelError::Storage(format!("failed to serialize storage: {e}")))?;

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, json).map_err(storage_err)?;

        #[cfg(unix)]
        fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600)).map_err(storage_err)?;

        fs::rename(&tmp_path, &self.path).map_err(storage_err)
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, ChannelError> {
        let entries = self.entries.read().expect("storage lock poisoned");
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ChannelError> {
        let mut entries = self.entries.write().expect("storage lock poisoned");
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), ChannelError> {
        let mut entries = self.entries.write().expect("storage lock poisoned");
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, ChannelError> {
        let entries = self.entries.read().expect("storage lock poisoned");
        Ok(entries.keys().cloned().collect())
    }
}

/// A namespaced view over a shared [`Storage`] backend.
#[derive(Debug, Clone)]
pub struct ScopedStorage {
    scope: String,
    module: Option<String>,
    base: Arc<dyn Storage>,
}

impl ScopedStorage {
    /// Create a view for `scope` and an optional `module` within it.
    pub fn new(scope: impl Into<String>, module: Option<&str>, base: Arc<dyn Storage>) -> Self {
        Self {
            scope: scope.into(),
            module: module.map(str::to_string),
            base,
        }
    }

    /// Fully-qualified backend key for `key`.
    #[must_use]
    pub fn scoped_key(&self, key: &str) -> String {
        match &self.module {
            Some(module) => format!("-{}:{}:{}", self.scope, module, key),
            None => format!("-{}:{}", self.scope, key),
        }
    }

    /// Read a value in this scope.
    pub fn get_item(&self, key: &str) -> Result<Option<String>, ChannelError> {
        self.base.get(&self.scoped_key(key))
    }

    /// Write a value in this scope.
    pub fn set_item(&self, key: &str, value: &str) -> Result<(), ChannelError> {
        self.base.set(&self.scoped_key(key), value)
    }

    /// Delete a value in this scope.
    pub fn remove_item(&self, key: &str) -> Result<(), ChannelError> {
        self.base.remove(&self.scoped_key(key))
    }

    /// Delete every value under this scope's prefix, leaving other scopes intact.
    pub fn clear(&self) -> Result<(), ChannelError> {
        let prefix = self.scoped_key("");
        for key in self.base.keys()? {
            if key.starts_with(&prefix) {
                self.base.remove(&key)?;
            }
        }
        Ok(())
    }
}
