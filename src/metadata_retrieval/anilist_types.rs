/// AniList GraphQL response types for deserialization.
///
/// These structures mirror the JSON response format of the AniList API.
use serde::Deserialize;

/// Envelope of every GraphQL response
#[derive(Debug, Deserialize)]
pub(super) struct GraphQlResponse<T> {
    /// Query result, null when the query failed
    pub data: Option<T>,
    /// Errors reported by the server
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

/// A single GraphQL error entry
#[derive(Debug, Deserialize)]
pub(super) struct GraphQlError {
    pub message: String,
    /// HTTP-like status AniList attaches to errors (404 for no match)
    #[serde(default)]
    pub status: Option<u16>,
}

/// The `data` object of a `Media` query
#[derive(Debug, Deserialize)]
pub(super) struct MediaData {
    #[serde(rename = "Media")]
    pub media: Option<AniListMedia>,
}

/// A single anime entry
#[derive(Debug, Deserialize)]
pub(super) struct AniListMedia {
    /// AniList id
    pub id: u64,
    /// MyAnimeList id, if AniList knows it
    #[serde(rename = "idMal")]
    pub id_mal: Option<u64>,
    pub title: AniListTitle,
    /// TV, MOVIE, OVA, ONA, SPECIAL, ...
    pub format: Option<String>,
    #[serde(rename = "startDate")]
    pub start_date: Option<FuzzyDate>,
}

/// Title variants of an anime
#[derive(Debug, Deserialize)]
pub(super) struct AniListTitle {
    pub romaji: Option<String>,
    pub english: Option<String>,
    pub native: Option<String>,
}

/// A partially known date
#[derive(Debug, Deserialize)]
pub(super) struct FuzzyDate {
    pub year: Option<u16>,
}
