/// OMDb API response types for deserialization.
use serde::Deserialize;

/// Response of a title lookup (`?t=`)
///
/// OMDb reports failures in-band: `Response` is `"False"` and `Error` holds
/// the reason, all other fields are missing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct OmdbTitleResponse {
    pub response: String,
    pub error: Option<String>,
    pub title: Option<String>,
    /// "1995", "2008–2013" or "2019–"
    pub year: Option<String>,
    #[serde(rename = "imdbID")]
    pub imdb_id: Option<String>,
    /// "movie", "series" or "episode"
    #[serde(rename = "Type")]
    pub kind: Option<String>,
}
