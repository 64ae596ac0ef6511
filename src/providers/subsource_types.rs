/// SubSource API response types for deserialization.
///
/// The subtitle listing is loosely typed: several fields exist under more
/// than one name, so each spelling gets its own optional field.
use super::{lenient_count, lenient_id};
use serde::Deserialize;

/// Response of `GET /movies/search`
#[derive(Debug, Deserialize)]
pub(super) struct SsMoviesResponse {
    #[serde(default)]
    pub data: Vec<SsMovie>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SsMovie {
    #[serde(default, deserialize_with = "lenient_id")]
    pub movie_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub imdb_id: Option<String>,
    pub title: Option<String>,
}

/// Response of `GET /subtitles`
#[derive(Debug, Deserialize)]
pub(super) struct SsSubtitlesResponse {
    #[serde(default)]
    pub data: Vec<SsSubtitle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SsSubtitle {
    #[serde(default, deserialize_with = "lenient_id")]
    pub subtitle_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    pub link: Option<String>,
    pub url: Option<String>,
    pub download_url: Option<String>,
    pub release_info: Option<OneOrMany>,
    pub release_name: Option<String>,
    pub language: Option<String>,
    pub lang: Option<String>,
    pub format: Option<String>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub downloads: u64,
    pub rating: Option<SsRating>,
    #[serde(default)]
    pub contributors: Vec<SsContributor>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub uploader_id: Option<String>,
    /// Boolean or 0/1
    pub hearing_impaired: Option<serde_json::Value>,
    pub hi: Option<serde_json::Value>,
    /// HTML
    pub commentary: Option<String>,
    pub comment: Option<String>,
}

/// A value sent either alone or as a list
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn first(&self) -> Option<&str> {
        match self {
            OneOrMany::One(value) => Some(value.as_str()),
            OneOrMany::Many(values) => values.first().map(String::as_str),
        }
    }
}

/// Either a plain score or vote counts
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum SsRating {
    Score(f32),
    Votes {
        #[serde(default)]
        good: f32,
        #[serde(default)]
        total: f32,
    },
}

#[derive(Debug, Deserialize)]
pub(super) struct SsContributor {
    pub displayname: Option<String>,
    pub name: Option<String>,
}
