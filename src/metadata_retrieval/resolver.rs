//! Metadata resolution across anime and general sources
//!
//! The resolver asks the anime source first and only falls back to the general
//! movie/TV sources when that finds nothing. Lookups never fail: every error
//! is logged and the resolver moves on, ending with "no identity" at worst.

use super::{
    AniListProvider, CachedMetadataProvider, MediaIdentity, MediaType, MetadataProvider,
    MetadataRetrievalError, OmdbProvider, TmdbProvider,
};
use crate::cache::MetadataCache;
use crate::settings::Settings;
use std::sync::Arc;

/// Resolves titles to canonical identities
pub struct MetadataResolver {
    /// Source consulted first; a hit marks the title as anime
    anime: Option<Arc<dyn MetadataProvider>>,
    /// Sources consulted in order when the anime source has no match
    general: Vec<Arc<dyn MetadataProvider>>,
}

impl MetadataResolver {
    /// Creates a resolver from explicit sources
    pub fn new(
        anime: Option<Arc<dyn MetadataProvider>>,
        general: Vec<Arc<dyn MetadataProvider>>,
    ) -> Self {
        Self { anime, general }
    }

    /// Creates the standard resolver: cached AniList, then cached TMDb and OMDb
    pub fn with_default_sources(
        client: reqwest::Client,
        settings: Settings,
        cache: Arc<MetadataCache>,
    ) -> Self {
        let anime: Arc<dyn MetadataProvider> = Arc::new(CachedMetadataProvider::new(
            AniListProvider::new(client.clone()),
            cache.clone(),
        ));
        let tmdb: Arc<dyn MetadataProvider> = Arc::new(CachedMetadataProvider::new(
            TmdbProvider::new(client.clone(), settings.clone()),
            cache.clone(),
        ));
        let omdb: Arc<dyn MetadataProvider> = Arc::new(CachedMetadataProvider::new(
            OmdbProvider::new(client, settings),
            cache,
        ));

        Self::new(Some(anime), vec![tmdb, omdb])
    }

    /// Resolves a title to its canonical identity.
    ///
    /// # Arguments
    ///
    /// * `title` - The title as parsed from a filename or typed by the user
    /// * `year` - Optional release year
    /// * `media_type` - Optional kind of title; passed to the general sources
    /// * `is_anime_hint` - Whether the filename looked like an anime release;
    ///   carried over onto identities from general sources
    ///
    /// # Returns
    ///
    /// The identity from the anime source if it knows the title, otherwise the
    /// first identity a general source returns, otherwise None.
    pub async fn resolve(
        &self,
        title: &str,
        year: Option<u16>,
        media_type: Option<MediaType>,
        is_anime_hint: bool,
    ) -> Option<MediaIdentity> {
        let title = title.trim();
        if title.is_empty() {
            return None;
        }

        if let Some(anime) = &self.anime
            && let Some(mut identity) = lookup(anime.as_ref(), title, year, None).await
        {
            identity.is_anime = true;
            return Some(identity.normalized());
        }

        for source in &self.general {
            if let Some(mut identity) = lookup(source.as_ref(), title, year, media_type).await {
                identity.is_anime = identity.is_anime || is_anime_hint;
                return Some(identity.normalized());
            }
        }

        tracing::info!(title, ?year, "No metadata found");
        None
    }
}

/// Runs one lookup, absorbing its error
async fn lookup(
    source: &dyn MetadataProvider,
    title: &str,
    year: Option<u16>,
    media_type: Option<MediaType>,
) -> Option<MediaIdentity> {
    match source.fetch_identity(title, year, media_type).await {
        Ok(identity) => identity,
        Err(MetadataRetrievalError::MissingCredential { setting, .. }) => {
            tracing::debug!(
                source = source.name(),
                setting,
                "Skipping unconfigured metadata source"
            );
            None
        }
        Err(e) => {
            tracing::warn!(source = source.name(), error = %e, "Metadata lookup failed");
            None
        }
    }
}
