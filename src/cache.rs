//! Metadata cache module
//!
//! This module provides persistent caching of resolved media identities. The
//! entries live as a JSON list under a single key of the settings store, so
//! the cache travels with the rest of the user configuration. Entries expire
//! after 30 days and the list is capped at 1000 entries.

use crate::metadata_retrieval::{MediaIdentity, MediaType};
use crate::settings::{KEY_METADATA_CACHE, Settings, SettingsError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use thiserror::Error;

/// How long an entry stays valid
pub const CACHE_TTL_DAYS: i64 = 30;

/// Maximum number of entries kept; the oldest are dropped first
pub const MAX_ENTRIES: usize = 1000;

/// Errors that can occur during cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// The settings store could not be read or written
    #[error("Cache storage failed: {0}")]
    Storage(#[from] SettingsError),

    /// The stored entry list is not valid
    #[error("Failed to deserialize cache entries: {0}")]
    DeserializationFailed(#[source] serde_json::Error),

    /// Failed to serialize entries for storage
    #[error("Failed to serialize cache entries: {0}")]
    SerializationFailed(#[source] serde_json::Error),
}

/// A cached identity together with its lookup key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Normalized `title|year|type` key
    pub key: String,
    /// The cached identity
    pub metadata: MediaIdentity,
    /// When the entry was written
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// Entry counts reported by [`MetadataCache::stats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub total: usize,
    pub expired: usize,
}

/// Time-boxed cache of media identities on top of the settings store
///
/// Writes are read-modify-write cycles of the whole entry list; they are
/// serialized by an internal lock so concurrent lookups do not drop each
/// other's entries.
pub struct MetadataCache {
    settings: Settings,
    write_lock: Mutex<()>,
}

impl MetadataCache {
    /// Creates a cache stored in the given settings
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            write_lock: Mutex::new(()),
        }
    }

    /// Builds the normalized cache key for a lookup
    ///
    /// # Examples
    ///
    /// ```
    /// use subtitle_scout::cache::MetadataCache;
    /// use subtitle_scout::metadata_retrieval::MediaType;
    ///
    /// assert_eq!(
    ///     MetadataCache::key("  The Office ", Some(2005), Some(MediaType::Tv)),
    ///     "the office|2005|tv"
    /// );
    /// assert_eq!(MetadataCache::key("Heat", None, None), "heat|any|any");
    /// ```
    pub fn key(title: &str, year: Option<u16>, media_type: Option<MediaType>) -> String {
        let year = year.map_or_else(|| "any".to_string(), |y| y.to_string());
        let media_type = media_type.map_or("any", MediaType::as_str);
        format!("{}|{}|{}", title.trim().to_lowercase(), year, media_type)
    }

    /// Looks up a cached identity
    ///
    /// # Returns
    ///
    /// The cached identity, or None if there is no entry or the entry is
    /// older than the TTL. Stale entries are removed on the way.
    pub fn get(
        &self,
        title: &str,
        year: Option<u16>,
        media_type: Option<MediaType>,
    ) -> Result<Option<MediaIdentity>, CacheError> {
        self.get_at(title, year, media_type, Utc::now())
    }

    /// Looks up a cached identity as of `now`
    pub fn get_at(
        &self,
        title: &str,
        year: Option<u16>,
        media_type: Option<MediaType>,
        now: DateTime<Utc>,
    ) -> Result<Option<MediaIdentity>, CacheError> {
        let key = Self::key(title, year, media_type);
        let entries = self.load()?;

        let Some(entry) = entries.into_iter().find(|e| e.key == key) else {
            return Ok(None);
        };

        if is_expired(&entry, now) {
            tracing::debug!(key = %key, "Cache entry expired");
            self.remove(title, year, media_type)?;
            return Ok(None);
        }

        tracing::debug!(key = %key, "Cache hit");
        Ok(Some(entry.metadata.normalized()))
    }

    /// Stores an identity, replacing an existing entry with the same key
    pub fn set(
        &self,
        title: &str,
        year: Option<u16>,
        media_type: Option<MediaType>,
        metadata: &MediaIdentity,
    ) -> Result<(), CacheError> {
        self.set_at(title, year, media_type, metadata, Utc::now())
    }

    /// Stores an identity with the given write time
    pub fn set_at(
        &self,
        title: &str,
        year: Option<u16>,
        media_type: Option<MediaType>,
        metadata: &MediaIdentity,
        now: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let key = Self::key(title, year, media_type);
        let _guard = self.lock();

        let mut entries = self.load()?;
        entries.retain(|e| e.key != key);
        entries.push(CacheEntry {
            key: key.clone(),
            metadata: metadata.clone(),
            timestamp: now,
        });

        if entries.len() > MAX_ENTRIES {
            // Newest first, then drop the tail
            entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            entries.truncate(MAX_ENTRIES);
        }

        self.store(&entries)?;
        tracing::debug!(key = %key, "Cached metadata");
        Ok(())
    }

    /// Removes the entry for a lookup, if present
    pub fn remove(
        &self,
        title: &str,
        year: Option<u16>,
        media_type: Option<MediaType>,
    ) -> Result<(), CacheError> {
        let key = Self::key(title, year, media_type);
        let _guard = self.lock();

        let mut entries = self.load()?;
        let before = entries.len();
        entries.retain(|e| e.key != key);
        if entries.len() != before {
            self.store(&entries)?;
        }
        Ok(())
    }

    /// Removes all entries
    pub fn clear(&self) -> Result<(), CacheError> {
        let _guard = self.lock();
        self.store(&[])?;
        tracing::info!("Metadata cache cleared");
        Ok(())
    }

    /// Counts all and expired entries
    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let now = Utc::now();
        let entries = self.load()?;
        Ok(CacheStats {
            total: entries.len(),
            expired: entries.iter().filter(|e| is_expired(e, now)).count(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load(&self) -> Result<Vec<CacheEntry>, CacheError> {
        match self.settings.store().get(KEY_METADATA_CACHE)? {
            None | Some(serde_json::Value::Null) => Ok(Vec::new()),
            Some(value) => serde_json::from_value(value).map_err(CacheError::DeserializationFailed),
        }
    }

    fn store(&self, entries: &[CacheEntry]) -> Result<(), CacheError> {
        let value = serde_json::to_value(entries).map_err(CacheError::SerializationFailed)?;
        self.settings.set(KEY_METADATA_CACHE, value)?;
        Ok(())
    }
}

fn is_expired(entry: &CacheEntry, now: DateTime<Utc>) -> bool {
    now - entry.timestamp > Duration::days(CACHE_TTL_DAYS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heat() -> MediaIdentity {
        let mut identity = MediaIdentity::new("Heat", Some(1995), MediaType::Movie);
        identity.imdb_id = Some("tt0113277".to_string());
        identity.tmdb_id = Some(949);
        identity
    }

    #[test]
    fn test_round_trip() {
        let cache = MetadataCache::new(Settings::in_memory());
        cache
            .set("Heat", Some(1995), Some(MediaType::Movie), &heat())
            .unwrap();

        let cached = cache.get("heat ", Some(1995), Some(MediaType::Movie)).unwrap();
        assert_eq!(cached, Some(heat()));

        // Different year or type is a different key
        assert_eq!(cache.get("Heat", None, Some(MediaType::Movie)).unwrap(), None);
        assert_eq!(cache.get("Heat", Some(1995), None).unwrap(), None);
    }

    #[test]
    fn test_expired_entry_is_evicted() {
        let cache = MetadataCache::new(Settings::in_memory());
        let written = Utc::now();
        cache
            .set_at("Heat", Some(1995), None, &heat(), written)
            .unwrap();

        let within = written + Duration::days(29);
        assert!(cache.get_at("Heat", Some(1995), None, within).unwrap().is_some());

        let after = written + Duration::days(31);
        assert_eq!(cache.get_at("Heat", Some(1995), None, after).unwrap(), None);
        assert_eq!(cache.stats().unwrap().total, 0);
    }

    #[test]
    fn test_overwrite_keeps_single_entry() {
        let cache = MetadataCache::new(Settings::in_memory());
        cache.set("Heat", None, None, &heat()).unwrap();

        let mut updated = heat();
        updated.title = "Heat (1995)".to_string();
        cache.set("Heat", None, None, &updated).unwrap();

        assert_eq!(cache.stats().unwrap().total, 1);
        assert_eq!(cache.get("Heat", None, None).unwrap(), Some(updated));
    }

    #[test]
    fn test_cap_drops_oldest() {
        let cache = MetadataCache::new(Settings::in_memory());
        let start = Utc::now() - Duration::days(1);

        let entries: Vec<CacheEntry> = (0..MAX_ENTRIES)
            .map(|i| CacheEntry {
                key: MetadataCache::key(&format!("title {i}"), None, None),
                metadata: heat(),
                timestamp: start + Duration::seconds(i as i64),
            })
            .collect();
        cache.store(&entries).unwrap();

        cache
            .set(&format!("title {MAX_ENTRIES}"), None, None, &heat())
            .unwrap();

        assert_eq!(cache.stats().unwrap().total, MAX_ENTRIES);
        assert_eq!(cache.get("title 0", None, None).unwrap(), None);
        assert!(cache.get(&format!("title {MAX_ENTRIES}"), None, None).unwrap().is_some());
    }

    #[test]
    fn test_clear_and_stats() {
        let cache = MetadataCache::new(Settings::in_memory());
        let old = Utc::now() - Duration::days(45);
        cache.set_at("Old", None, None, &heat(), old).unwrap();
        cache.set("New", None, None, &heat()).unwrap();

        assert_eq!(cache.stats().unwrap(), CacheStats { total: 2, expired: 1 });

        cache.clear().unwrap();
        assert_eq!(cache.stats().unwrap().total, 0);
    }

    #[test]
    fn test_legacy_entry_is_normalized() {
        let settings = Settings::in_memory();
        settings
            .set(
                KEY_METADATA_CACHE,
                serde_json::json!([{
                    "key": "frieren|any|any",
                    "metadata": {"title": "Sousou no Frieren", "type": "tv", "malId": 52991, "isAnime": false},
                    "timestamp": Utc::now().timestamp_millis()
                }]),
            )
            .unwrap();

        let cache = MetadataCache::new(settings);
        let identity = cache.get("Frieren", None, None).unwrap().unwrap();
        assert!(identity.is_anime);
    }
}
