/// Data structures and traits for movie, TV and anime metadata retrieval.
///
/// This module provides the canonical identity of a title (names, year and
/// cross-service ids) together with the providers that resolve it, a caching
/// wrapper and the resolver that combines them.
mod anilist;
mod anilist_types;
mod cached;
mod omdb;
mod omdb_types;
mod rate_limit;
mod resolver;
mod tmdb;
mod tmdb_types;

pub use anilist::AniListProvider;
pub use cached::CachedMetadataProvider;
pub use omdb::OmdbProvider;
pub use rate_limit::RateLimiter;
pub use resolver::MetadataResolver;
pub use tmdb::TmdbProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Timeout applied to every metadata HTTP request
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur during metadata retrieval operations.
#[derive(Debug, Error)]
pub enum MetadataRetrievalError {
    /// Request to the metadata provider failed
    #[error("Request failed: {0}")]
    RequestError(String),

    /// Failed to parse the provider's JSON response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// The provider needs a credential that is not configured
    #[error("{provider} requires the '{setting}' setting")]
    MissingCredential {
        provider: &'static str,
        setting: &'static str,
    },

    /// The provider refused the request because of its rate limit
    #[error("Rate limit exceeded at {0}")]
    RateLimited(&'static str),

    /// The API returned invalid or unexpected data
    #[error("API returned invalid data: {0}")]
    InvalidData(String),
}

impl From<reqwest::Error> for MetadataRetrievalError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            MetadataRetrievalError::ParseError(e.to_string())
        } else {
            MetadataRetrievalError::RequestError(e.to_string())
        }
    }
}

/// Kind of title
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Tv,
}

impl MediaType {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Tv => "tv",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The resolved canonical record of a movie or show
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaIdentity {
    /// Canonical title
    pub title: String,
    /// Release or premiere year
    #[serde(default)]
    pub year: Option<u16>,
    /// Movie or TV
    #[serde(rename = "type")]
    pub media_type: MediaType,
    /// IMDb id including the `tt` prefix
    #[serde(default)]
    pub imdb_id: Option<String>,
    /// TMDb numeric id
    #[serde(default)]
    pub tmdb_id: Option<u64>,
    /// AniList numeric id
    #[serde(default)]
    pub anilist_id: Option<u64>,
    /// MyAnimeList numeric id
    #[serde(default)]
    pub mal_id: Option<u64>,
    /// Whether the title is anime
    #[serde(default)]
    pub is_anime: bool,
}

impl MediaIdentity {
    /// Creates an identity with no external ids
    pub fn new(title: impl Into<String>, year: Option<u16>, media_type: MediaType) -> Self {
        Self {
            title: title.into(),
            year,
            media_type,
            imdb_id: None,
            tmdb_id: None,
            anilist_id: None,
            mal_id: None,
            is_anime: false,
        }
    }

    /// Whether the identity was established through an anime database
    pub fn has_anime_ids(&self) -> bool {
        self.anilist_id.is_some() || self.mal_id.is_some()
    }

    /// Restores the invariant that anime ids imply `is_anime`
    ///
    /// Applied to everything coming out of a provider or the cache, so old
    /// cache entries with a contrary flag are corrected on read.
    pub fn normalized(mut self) -> Self {
        if self.has_anime_ids() {
            self.is_anime = true;
        }
        self
    }
}

/// Trait for metadata providers that can identify a title.
///
/// Implementors of this trait can look up titles in various sources such as
/// AniList, TMDb or OMDb.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Short name used for logging and cache namespacing
    fn name(&self) -> &'static str;

    /// Looks up the canonical identity of a title.
    ///
    /// # Arguments
    ///
    /// * `title` - The title to look up
    /// * `year` - Optional release year to narrow the search
    /// * `media_type` - Optional kind of title to narrow the search
    ///
    /// # Returns
    ///
    /// `Ok(None)` if the provider knows no such title, the identity if it does,
    /// or a MetadataRetrievalError if the lookup itself failed
    async fn fetch_identity(
        &self,
        title: &str,
        year: Option<u16>,
        media_type: Option<MediaType>,
    ) -> Result<Option<MediaIdentity>, MetadataRetrievalError>;
}

/// Parses the year prefix of a `YYYY-MM-DD` or `YYYY–YYYY` date string
pub(crate) fn year_from_date(date: &str) -> Option<u16> {
    let prefix: String = date.chars().take_while(|c| c.is_ascii_digit()).collect();
    if prefix.len() == 4 {
        prefix.parse().ok()
    } else {
        None
    }
}
