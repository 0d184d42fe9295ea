//! Configuration and persisted store snapshots.

pub mod config;
pub mod snapshot;

pub use config::{AppConfig, BackendSettings, ConfigError, PersistenceBackend, SyncSettings};
pub use snapshot::{open_snapshot_store, PersistError, SnapshotStore};
