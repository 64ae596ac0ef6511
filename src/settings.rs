//! Settings storage module
//!
//! This module provides the key-value store that holds user configuration:
//! enabled subtitle sources, API credentials, the preferred language and the
//! metadata cache. Values are JSON; the default backend keeps them in a single
//! JSON object file in the system's standard config directory.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Key holding the JSON-encoded list of `{id, enabled}` subtitle sources
pub const KEY_SUBTITLE_SOURCES: &str = "subtitle_sources";
/// Key holding the preferred subtitle language code
pub const KEY_PREFERRED_LANGUAGE: &str = "preferred_language";
/// Key holding the cached metadata entries
pub const KEY_METADATA_CACHE: &str = "metadata_cache";

pub const KEY_OPENSUBTITLES_API_KEY: &str = "opensubtitles_api_key";
pub const KEY_OPENSUBTITLES_USERNAME: &str = "opensubtitles_username";
pub const KEY_OPENSUBTITLES_PASSWORD: &str = "opensubtitles_password";
pub const KEY_SUBDL_API_KEY: &str = "subdl_api_key";
pub const KEY_SUBSOURCE_API_KEY: &str = "subsource_api_key";
pub const KEY_TMDB_API_KEY: &str = "tmdb_api_key";
pub const KEY_OMDB_API_KEY: &str = "omdb_api_key";

/// Language used when nothing is configured
pub const DEFAULT_LANGUAGE: &str = "en";

/// Errors that can occur while reading or writing settings
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Failed to determine config directory location
    #[error("Failed to determine config directory location")]
    ConfigDirectoryNotFound,

    /// Failed to create or access config directory
    #[error("Failed to create config directory at {path}: {source}")]
    DirectoryCreationFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to read the settings file
    #[error("Failed to read settings file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write the settings file
    #[error("Failed to write settings file {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The settings file is not a JSON object
    #[error("Failed to deserialize settings file {path}: {source}")]
    DeserializationFailed {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Failed to serialize settings
    #[error("Failed to serialize settings: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

/// A generic key-value store for JSON settings
///
/// Implementations must be safe to share between concurrently running
/// searches; every call is a short synchronous critical section.
pub trait SettingsStore: Send + Sync {
    /// Returns the value stored under `key`, if any
    fn get(&self, key: &str) -> Result<Option<Value>, SettingsError>;

    /// Stores `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: Value) -> Result<(), SettingsError>;

    /// Returns all stored keys
    fn keys(&self) -> Result<Vec<String>, SettingsError>;
}

fn lock(map: &Mutex<Map<String, Value>>) -> MutexGuard<'_, Map<String, Value>> {
    // A panic while holding the lock cannot leave the map half-written
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Settings stored as one JSON object file on disk
#[derive(Debug)]
pub struct JsonFileSettings {
    /// Location of the settings file
    path: PathBuf,
    /// In-memory copy of the file contents
    values: Mutex<Map<String, Value>>,
}

impl JsonFileSettings {
    /// Opens the settings file in the system's standard config directory
    ///
    /// The directory is created if needed. A missing file is treated as
    /// empty settings.
    pub fn open_default() -> Result<Self, SettingsError> {
        let proj_dirs = directories::ProjectDirs::from("de", "westhoffswelt", "subtitlescout")
            .ok_or(SettingsError::ConfigDirectoryNotFound)?;

        Self::open(proj_dirs.config_dir().join("settings.json"))
    }

    /// Opens (or prepares to create) a settings file at the given path
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| SettingsError::DirectoryCreationFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let values = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|e| SettingsError::ReadFailed {
                path: path.clone(),
                source: e,
            })?;

            if content.trim().is_empty() {
                Map::new()
            } else {
                serde_json::from_str(&content).map_err(|e| {
                    SettingsError::DeserializationFailed {
                        path: path.clone(),
                        source: e,
                    }
                })?
            }
        } else {
            Map::new()
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Returns the path of the settings file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &Map<String, Value>) -> Result<(), SettingsError> {
        let content = serde_json::to_string_pretty(values)?;

        // Write next to the target first so a crash never leaves a truncated file
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, content).map_err(|e| SettingsError::WriteFailed {
            path: temp_path.clone(),
            source: e,
        })?;
        fs::rename(&temp_path, &self.path).map_err(|e| SettingsError::WriteFailed {
            path: self.path.clone(),
            source: e,
        })
    }
}

impl SettingsStore for JsonFileSettings {
    fn get(&self, key: &str) -> Result<Option<Value>, SettingsError> {
        Ok(lock(&self.values).get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), SettingsError> {
        let mut values = lock(&self.values);
        values.insert(key.to_string(), value);
        self.persist(&values)
    }

    fn keys(&self) -> Result<Vec<String>, SettingsError> {
        Ok(lock(&self.values).keys().cloned().collect())
    }
}

/// Settings held only in memory
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: Mutex<Map<String, Value>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Result<Option<Value>, SettingsError> {
        Ok(lock(&self.values).get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), SettingsError> {
        lock(&self.values).insert(key.to_string(), value);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, SettingsError> {
        Ok(lock(&self.values).keys().cloned().collect())
    }
}

/// One entry of the persisted subtitle source list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceToggle {
    /// Provider id
    pub id: String,
    /// Whether the provider takes part in searches
    pub enabled: bool,
}

/// Typed accessors on top of a [`SettingsStore`]
///
/// Reads never fail: an unreadable or malformed value is logged and treated
/// as absent, so a broken setting degrades to the built-in default.
#[derive(Clone)]
pub struct Settings {
    store: Arc<dyn SettingsStore>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings").finish_non_exhaustive()
    }
}

impl Settings {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    /// Settings backed by a fresh in-memory store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySettings::new()))
    }

    /// The underlying raw store
    pub fn store(&self) -> &Arc<dyn SettingsStore> {
        &self.store
    }

    /// Returns a raw value
    pub fn value(&self, key: &str) -> Option<Value> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to read setting");
                None
            }
        }
    }

    /// Returns a non-empty string setting
    ///
    /// Numbers and booleans are rendered as strings; empty strings count as unset.
    pub fn string(&self, key: &str) -> Option<String> {
        let value = match self.value(key)? {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => return None,
        };

        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    /// Stores a raw value
    pub fn set(&self, key: &str, value: Value) -> Result<(), SettingsError> {
        self.store.set(key, value)
    }

    /// Stores a string value
    pub fn set_string(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        self.store.set(key, Value::String(value.to_string()))
    }

    /// The configured subtitle language, falling back to English
    pub fn preferred_language(&self) -> String {
        self.string(KEY_PREFERRED_LANGUAGE)
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string())
    }

    /// The persisted subtitle source list
    ///
    /// The list is stored as a JSON-encoded string; a plain JSON array is
    /// accepted as well.
    pub fn subtitle_sources(&self) -> Option<Vec<SourceToggle>> {
        let parsed = match self.value(KEY_SUBTITLE_SOURCES)? {
            Value::String(encoded) => serde_json::from_str::<Vec<SourceToggle>>(&encoded),
            other @ Value::Array(_) => serde_json::from_value::<Vec<SourceToggle>>(other),
            _ => return None,
        };

        match parsed {
            Ok(sources) => Some(sources),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to parse subtitle sources from settings");
                None
            }
        }
    }

    /// Ids of the persisted sources that are enabled
    pub fn enabled_source_ids(&self) -> Vec<String> {
        self.subtitle_sources()
            .unwrap_or_default()
            .into_iter()
            .filter(|source| source.enabled)
            .map(|source| source.id)
            .collect()
    }

    /// Persists the subtitle source list
    pub fn set_subtitle_sources(&self, sources: &[SourceToggle]) -> Result<(), SettingsError> {
        let encoded = serde_json::to_string(sources)?;
        self.store.set(KEY_SUBTITLE_SOURCES, Value::String(encoded))
    }
}
