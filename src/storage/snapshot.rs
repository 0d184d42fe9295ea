//! Persisted store snapshots.
//!
//! Each store serializes its non-transient state to JSON and writes it under
//! its own key after every change. The default backend is the OS keyring.

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use super::config::{PersistenceBackend, PersistenceSettings};

/// Key of the workouts/exercises snapshot.
pub const WORKOUTS_KEY: &str = "workouts-state";
/// Key of the profile snapshot.
pub const PROFILE_KEY: &str = "profile-state";

/// Persistence errors.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Keyring error: {0}")]
    Keyring(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PersistError {
    fn from(err: serde_json::Error) -> Self {
        PersistError::Serialization(err.to_string())
    }
}

/// Key-value storage for serialized snapshots.
pub trait SnapshotStore: Send + Sync {
    /// Read the blob stored under `key`.
    fn load(&self, key: &str) -> Result<Option<String>, PersistError>;

    /// Write `value` under `key`, replacing any previous blob.
    fn save(&self, key: &str, value: &str) -> Result<(), PersistError>;

    /// Delete the blob under `key`. Missing keys are not an error.
    fn remove(&self, key: &str) -> Result<(), PersistError>;
}

/// Read and decode a snapshot.
pub fn load_json<T: DeserializeOwned>(
    store: &dyn SnapshotStore,
    key: &str,
) -> Result<Option<T>, PersistError> {
    match store.load(key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Encode and write a snapshot.
pub fn save_json<T: Serialize>(
    store: &dyn SnapshotStore,
    key: &str,
    value: &T,
) -> Result<(), PersistError> {
    let raw = serde_json::to_string(value)?;
    store.save(key, &raw)
}

/// Build the snapshot store selected in the configuration.
pub fn open_snapshot_store(
    settings: &PersistenceSettings,
    data_dir: PathBuf,
) -> Arc<dyn SnapshotStore> {
    match settings.backend {
        PersistenceBackend::Keyring => {
            Arc::new(KeyringSnapshotStore::new(settings.service_name.clone()))
        }
        PersistenceBackend::File => Arc::new(FileSnapshotStore::new(data_dir.join("state"))),
        PersistenceBackend::Disabled => Arc::new(DisabledSnapshotStore),
    }
}

/// Keyring-based snapshot store.
pub struct KeyringSnapshotStore {
    service_name: String,
}

impl KeyringSnapshotStore {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, PersistError> {
        keyring::Entry::new(&self.service_name, key)
            .map_err(|e| PersistError::Keyring(e.to_string()))
    }
}

impl SnapshotStore for KeyringSnapshotStore {
    fn load(&self, key: &str) -> Result<Option<String>, PersistError> {
        match self.entry(key)?.get_password() {
            Ok(raw) => Ok(Some(raw)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(PersistError::Keyring(e.to_string())),
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<(), PersistError> {
        self.entry(key)?
            .set_password(value)
            .map_err(|e| PersistError::Keyring(e.to_string()))?;
        tracing::debug!("Stored snapshot {} in keyring", key);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistError> {
        match self.entry(key)?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(PersistError::Keyring(e.to_string())),
        }
    }
}

/// Snapshot store writing one JSON file per key.
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self, key: &str) -> Result<Option<String>, PersistError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        std::fs::read_to_string(&path)
            .map(Some)
            .map_err(|e| PersistError::Io(e.to_string()))
    }

    fn save(&self, key: &str, value: &str) -> Result<(), PersistError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| PersistError::Io(e.to_string()))?;

        // Replace atomically: write a sibling file, then rename over the target.
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value).map_err(|e| PersistError::Io(e.to_string()))?;
        std::fs::rename(&tmp, &path).map_err(|e| PersistError::Io(e.to_string()))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistError::Io(e.to_string())),
        }
    }
}

/// In-memory snapshot store.
#[derive(Default)]
pub struct MemorySnapshotStore {
    entries: Mutex<HashMap<String, String>>,
    writes: Mutex<usize>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw blob under `key`, for inspection.
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    /// Number of `save` calls so far.
    pub fn write_count(&self) -> usize {
        *self.writes.lock()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self, key: &str) -> Result<Option<String>, PersistError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<(), PersistError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        *self.writes.lock() += 1;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Snapshot store that keeps nothing.
pub struct DisabledSnapshotStore;

impl SnapshotStore for DisabledSnapshotStore {
    fn load(&self, _key: &str) -> Result<Option<String>, PersistError> {
        Ok(None)
    }

    fn save(&self, _key: &str, _value: &str) -> Result<(), PersistError> {
        Ok(())
    }

    fn remove(&self, _key: &str) -> Result<(), PersistError> {
        Ok(())
    }
}
