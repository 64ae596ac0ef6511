/// TMDb API response types for deserialization.
///
/// These structures mirror the JSON response format of the TMDb v3 API.
use serde::Deserialize;

/// Response of the `/search/*` endpoints
#[derive(Debug, Deserialize)]
pub(super) struct TmdbSearchResponse {
    #[serde(default)]
    pub results: Vec<TmdbSearchResult>,
}

/// A single search hit
///
/// Movie hits carry `title`/`release_date`, TV hits `name`/`first_air_date`.
#[derive(Debug, Deserialize)]
pub(super) struct TmdbSearchResult {
    pub id: u64,
    /// Only present on `/search/multi` results ("movie", "tv" or "person")
    pub media_type: Option<String>,
}

/// Response of `/movie/{id}`
#[derive(Debug, Deserialize)]
pub(super) struct TmdbMovieDetails {
    pub id: u64,
    pub imdb_id: Option<String>,
    pub title: String,
    pub release_date: Option<String>,
}

/// Response of `/tv/{id}`
#[derive(Debug, Deserialize)]
pub(super) struct TmdbTvDetails {
    pub id: u64,
    pub name: String,
    pub first_air_date: Option<String>,
}

/// Response of `/tv/{id}/external_ids`
#[derive(Debug, Deserialize)]
pub(super) struct TmdbExternalIds {
    pub imdb_id: Option<String>,
}
