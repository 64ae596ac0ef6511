/// SubDL API response types for deserialization.
///
/// SubDL answers a search either with subtitle files (`subtitles`) or, for
/// an ambiguous free-text query, with the titles it matched (`results`).
use super::{lenient_count, lenient_id};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(super) struct SubdlResponse {
    /// `false` on API errors
    pub status: Option<bool>,
    /// Present on API errors, e.g. 429 for the daily limit
    #[serde(rename = "statusCode")]
    pub status_code: Option<u16>,
    pub message: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub subtitles: Vec<SubdlSubtitle>,
    #[serde(default)]
    pub results: Vec<SubdlResult>,
}

/// A downloadable subtitle archive
#[derive(Debug, Deserialize)]
pub(super) struct SubdlSubtitle {
    #[serde(default, deserialize_with = "lenient_id")]
    pub sd_id: Option<String>,
    pub release_name: Option<String>,
    pub name: Option<String>,
    /// Language name, e.g. "english"
    pub lang: Option<String>,
    /// Language code, e.g. "EN"
    pub language: Option<String>,
    /// Usually relative to `https://dl.subdl.com`
    pub url: Option<String>,
    pub download_url: Option<String>,
    pub author: Option<String>,
    pub comment: Option<String>,
    pub hi: Option<bool>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub download_count: u64,
}

/// A title match, or occasionally a subtitle in the same list
#[derive(Debug, Deserialize)]
pub(super) struct SubdlResult {
    #[serde(default, deserialize_with = "lenient_id")]
    pub sd_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub tmdb_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub imdb_id: Option<String>,
    pub name: Option<String>,
    /// "movie" or "tv"
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub release_name: Option<String>,
    pub language: Option<String>,
    pub url: Option<String>,
    pub download_url: Option<String>,
}
