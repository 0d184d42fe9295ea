//! Application configuration.
//!
//! Loaded from `config.toml` in the platform data directory. Backend
//! credentials can be overridden from the environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the backend URL.
pub const ENV_URL: &str = "FITSYNC_URL";
/// Environment variable overriding the anonymous API key.
pub const ENV_ANON_KEY: &str = "FITSYNC_ANON_KEY";
/// Environment variable carrying a signed-in user's access token.
pub const ENV_ACCESS_TOKEN: &str = "FITSYNC_ACCESS_TOKEN";

/// Where store snapshots are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceBackend {
    /// OS keyring (device-secured storage)
    #[default]
    Keyring,
    /// JSON files in the data directory
    File,
    /// Nothing is persisted
    Disabled,
}

impl std::fmt::Display for PersistenceBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistenceBackend::Keyring => write!(f, "Keyring"),
            PersistenceBackend::File => write!(f, "File"),
            PersistenceBackend::Disabled => write!(f, "Disabled"),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Data directory path
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// Hosted backend
    #[serde(default)]
    pub backend: BackendSettings,
    /// Store behaviour
    #[serde(default)]
    pub sync: SyncSettings,
    /// Snapshot persistence
    #[serde(default)]
    pub persistence: PersistenceSettings,
}

/// Hosted backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Base URL of the backend (REST, storage and functions share it)
    pub url: String,
    /// Public anonymous API key
    pub anon_key: String,
    /// Websocket endpoint for realtime; derived from `url` when absent
    #[serde(default)]
    pub realtime_url: Option<String>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:54321".to_string(),
            anon_key: String::new(),
            realtime_url: None,
        }
    }
}

/// Store behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Upper bound for any single backend call
    pub request_timeout_secs: u64,
    /// Messages fetched by the initial chat page
    pub chat_page_size: usize,
    /// Realtime heartbeat interval
    pub realtime_heartbeat_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            chat_page_size: 100,
            realtime_heartbeat_secs: 30,
        }
    }
}

impl SyncSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.realtime_heartbeat_secs.max(1))
    }
}

/// Snapshot persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceSettings {
    pub backend: PersistenceBackend,
    /// Keyring service name
    pub service_name: String,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            backend: PersistenceBackend::Keyring,
            service_name: "fitsync".to_string(),
        }
    }
}

/// Get the application data directory.
pub fn get_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "fitsync", "FitSync")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the configuration file path.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

/// Load application configuration from the default location.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let mut config = load_config_from(&get_config_path())?;
    config.data_dir = get_data_dir();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Load configuration from a specific file. A missing file yields defaults.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let data_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    if !path.exists() {
        return Ok(AppConfig {
            data_dir,
            ..Default::default()
        });
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

    let mut config: AppConfig =
        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.data_dir = data_dir;

    Ok(config)
}

/// Apply backend overrides from an environment lookup.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup(ENV_URL).filter(|v| !v.is_empty()) {
        config.backend.url = url;
    }
    if let Some(key) = lookup(ENV_ANON_KEY).filter(|v| !v.is_empty()) {
        config.backend.anon_key = key;
    }
}

/// Save application configuration to the default location.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &get_config_path())
}

/// Save application configuration to a specific file.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    Ok(())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}
