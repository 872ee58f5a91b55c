//! Durable key/value storage used to survive page reloads and app restarts.
//!
//! The pipeline depends only on the [`StorageBackend`] capability. Host platforms provide the
//! implementation matching their medium: browsers back it with cookies or localStorage, native
//! apps with a file in the app's data directory. Identity and queue state are stored under
//! separate keys, so the two writers never race on the same record.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::Result;

/// Capability interface for persisted key/value records.
///
/// Values are opaque strings (the pipeline stores JSON). Implementations must be safe to share
/// between the tracker and the delivery thread.
pub trait StorageBackend: Send + Sync {
    /// Read the value stored under `key`. Absence is `Ok(None)`, not an error.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove the value stored under `key`, if any.
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory storage. State survives for the process lifetime only.
///
/// This is the default backend when no platform storage is supplied, and the workhorse of the
/// test suite.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    /// Create an empty in-memory store.
    pub fn new() -> MemoryStorage {
        MemoryStorage::default()
    }
}

impl StorageBackend for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().expect("thread holding storage lock should not panic");
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().expect("thread holding storage lock should not panic");
        entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().expect("thread holding storage lock should not panic");
        entries.remove(key);
        Ok(())
    }
}

/// File-backed storage: one JSON file per key inside a directory.
///
/// Stands in for `localstorage` persistence on native platforms. The directory is created on
/// first write.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Create a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> FileStorage {
        FileStorage { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys come from configuration (storage key names), not user data, but keep them from
        // escaping the storage directory.
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

impl StorageBackend for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.path_for(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Storage that remembers nothing. Used when persistence is disabled.
#[derive(Debug, Default)]
pub struct NoopStorage;

impl StorageBackend for NoopStorage {
    fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    fn remove(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}
