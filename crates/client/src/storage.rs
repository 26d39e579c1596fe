//! Persistent key-value storage.
//!
//! Values are JSON strings under a small set of well-known keys. On disk every
//! key is one `<key>.json` file in the data directory:
//!   - Linux: `~/.config/portcall/`
//!   - macOS: `~/Library/Application Support/portcall/`
//!   - Windows: `%APPDATA%\portcall\`
//!
//! Storage never fails loudly. A read error is a cache miss, a write error
//! is reported and dropped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use portcall_shared::{Session, SyncError};
use serde::{de::DeserializeOwned, Serialize};

use crate::capabilities::ErrorReporter;

pub const USER_INFO_KEY: &str = "userInfo";
pub const USER_LANGUAGE_KEY: &str = "userLanguage";
pub const NAMESPACE_KEY: &str = "namespace";
pub const DISABLE_VIBRATION_KEY: &str = "disable_vibration";

/// Raw string storage.
pub trait StorageBackend: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, SyncError>;
    fn write(&self, key: &str, value: &str) -> Result<(), SyncError>;
    fn delete(&self, key: &str) -> Result<(), SyncError>;
}

/// JSON files in a directory, created on first write.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, key: &str) -> PathBuf {
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.dir.join(format!("{}.json", safe_key))
    }
}

impl StorageBackend for FileBackend {
    fn read(&self, key: &str) -> Result<Option<String>, SyncError> {
        match std::fs::read_to_string(self.file_path(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::storage(e)),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), SyncError> {
        std::fs::create_dir_all(&self.dir).map_err(SyncError::storage)?;
        std::fs::write(self.file_path(key), value).map_err(SyncError::storage)
    }

    fn delete(&self, key: &str) -> Result<(), SyncError> {
        match std::fs::remove_file(self.file_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::storage(e)),
        }
    }
}

/// In-process storage for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    values: Mutex<HashMap<String, String>>,
}

impl StorageBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<String>, SyncError> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), SyncError> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), SyncError> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.remove(key);
        Ok(())
    }
}

#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn StorageBackend>,
    reporter: Arc<dyn ErrorReporter>,
}

impl Storage {
    pub fn new(backend: Arc<dyn StorageBackend>, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self { backend, reporter }
    }

    pub fn in_memory(reporter: Arc<dyn ErrorReporter>) -> Self {
        Self::new(Arc::new(MemoryBackend::default()), reporter)
    }

    fn report(&self, key: &str, error: SyncError) {
        tracing::warn!(key, error = %error, "storage operation failed");
        self.reporter.capture_error(&error);
    }

    /// Save a value as JSON. Returns `true` if it was written.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> bool {
        let result = serde_json::to_string(value)
            .map_err(SyncError::storage)
            .and_then(|json| self.backend.write(key, &json));
        match result {
            Ok(()) => true,
            Err(e) => {
                self.report(key, e);
                false
            }
        }
    }

    /// Load a value. Missing keys, unreadable storage and undecodable values
    /// are all `None`.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let result = self.backend.read(key).and_then(|raw| match raw {
            Some(json) => serde_json::from_str(&json).map(Some).map_err(SyncError::storage),
            None => Ok(None),
        });
        match result {
            Ok(value) => value,
            Err(e) => {
                self.report(key, e);
                None
            }
        }
    }

    pub fn remove(&self, key: &str) {
        if let Err(e) = self.backend.delete(key) {
            self.report(key, e);
        }
    }

    pub fn exists(&self, key: &str) -> bool {
        matches!(self.backend.read(key), Ok(Some(_)))
    }

    pub fn load_session(&self) -> Option<Session> {
        self.load(USER_INFO_KEY)
    }

    pub fn save_session(&self, session: &Session) -> bool {
        self.save(USER_INFO_KEY, session)
    }

    pub fn load_namespace(&self) -> Option<String> {
        self.load(NAMESPACE_KEY)
    }

    pub fn load_disable_vibration(&self) -> bool {
        self.load(DISABLE_VIBRATION_KEY).unwrap_or(false)
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}
