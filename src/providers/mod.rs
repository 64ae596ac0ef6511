/// Subtitle providers and the registry that fans searches out to them.
///
/// Every subtitle database is wrapped in an adapter implementing
/// [`SubtitleProvider`]. Adapters translate a [`SearchQuery`] into the
/// database's own request shape and map its results into
/// [`SubtitleCandidate`]s. Searches never fail: adapter errors are logged and
/// end up as an empty result list.
mod opensubtitles;
mod opensubtitles_types;
mod registry;
mod subdl;
mod subdl_ladder;
mod subdl_types;
mod subsource;
mod subsource_types;

pub use opensubtitles::OpenSubtitlesProvider;
pub use registry::{
    DEFAULT_HASH_PROVIDERS, DEFAULT_TEXT_PROVIDERS, PROVIDER_TIMEOUT, ProviderRegistry,
};
pub use subdl::SubdlProvider;
pub use subsource::SubSourceProvider;

use crate::metadata_retrieval::{MediaIdentity, MediaType};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Timeout applied to every provider HTTP request
pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// User agent sent to subtitle APIs that require one
pub(crate) const USER_AGENT: &str = concat!("SubtitleScout v", env!("CARGO_PKG_VERSION"));

/// Errors that can occur inside a provider adapter
#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP request failed
    #[error("Request failed: {0}")]
    RequestError(String),

    /// Failed to parse the provider's response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// The provider reported an error in its response
    #[error("{provider} API error: {message}")]
    Api {
        provider: &'static str,
        message: String,
    },

    /// The provider refused the request because of its rate limit
    #[error("{provider} rate limit exceeded: {message}")]
    RateLimited {
        provider: &'static str,
        message: String,
    },

    /// A required credential is not configured
    #[error("{provider} requires the '{setting}' setting")]
    MissingCredential {
        provider: &'static str,
        setting: &'static str,
    },

    /// The follow-up call producing the final download link failed
    #[error("{provider} could not resolve the download link: {message}")]
    DownloadResolution {
        provider: &'static str,
        message: String,
    },

    /// A candidate reference this provider does not understand
    #[error("Invalid subtitle reference: {0}")]
    InvalidReference(String),
}

impl ProviderError {
    /// Whether the user can fix this error in the settings
    pub fn is_configuration(&self) -> bool {
        matches!(self, ProviderError::MissingCredential { .. })
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ProviderError::ParseError(e.to_string())
        } else {
            ProviderError::RequestError(e.to_string())
        }
    }
}

/// One subtitle file offered by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleCandidate {
    /// Provider-specific id
    pub id: String,
    /// Provider reference to the file; unique within one search result
    pub url: String,
    /// Display name of the provider
    pub source: String,
    /// Registry id of the provider, used to resolve the download
    pub provider_id: String,
    /// Language as reported by the provider
    pub language: String,
    /// Subtitle format, e.g. `srt` or `ass`
    pub format: String,
    /// Release name
    pub filename: String,
    pub downloads: u64,
    /// Rating normalized to 0-5
    pub rating: f32,
    pub is_anime: bool,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub hearing_impaired: bool,
    #[serde(default)]
    pub caption: Option<String>,
}

/// What to search subtitles for
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchQuery {
    /// Free-text title
    pub text: String,
    /// Resolved identity, if metadata resolution succeeded
    pub identity: Option<MediaIdentity>,
    /// Parsed year, used when there is no identity
    pub year: Option<u16>,
    /// Parsed media type, used when there is no identity
    pub media_type: Option<MediaType>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    /// Whether the filename looked like an anime release
    pub is_anime: bool,
}

impl SearchQuery {
    /// A plain text query without any metadata
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// The canonical title if known, otherwise the query text
    pub fn title(&self) -> &str {
        match &self.identity {
            Some(identity) if !identity.title.trim().is_empty() => &identity.title,
            _ => &self.text,
        }
    }

    pub fn year(&self) -> Option<u16> {
        self.identity
            .as_ref()
            .and_then(|identity| identity.year)
            .or(self.year)
    }

    pub fn media_type(&self) -> Option<MediaType> {
        self.identity
            .as_ref()
            .map(|identity| identity.media_type)
            .or(self.media_type)
    }

    pub fn imdb_id(&self) -> Option<&str> {
        self.identity
            .as_ref()
            .and_then(|identity| identity.imdb_id.as_deref())
            .filter(|id| !id.is_empty())
    }

    pub fn tmdb_id(&self) -> Option<u64> {
        self.identity.as_ref().and_then(|identity| identity.tmdb_id)
    }

    pub fn is_anime(&self) -> bool {
        self.is_anime || self.identity.as_ref().is_some_and(|identity| identity.is_anime)
    }
}

/// Capability contract of a subtitle database adapter.
///
/// Implementors of this trait wrap one remote subtitle source. The registry
/// holds them as `Arc<dyn SubtitleProvider>` keyed by [`id`](Self::id).
#[async_trait]
pub trait SubtitleProvider: Send + Sync {
    /// Stable registry key, e.g. `opensubtitles`
    fn id(&self) -> &'static str;

    /// Display name, e.g. `OpenSubtitles`
    fn name(&self) -> &'static str;

    /// Whether [`search_by_hash`](Self::search_by_hash) is implemented
    fn supports_hash_search(&self) -> bool {
        false
    }

    /// Reports missing configuration that makes searches come back empty
    fn check_configuration(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Searches subtitles by title and metadata.
    ///
    /// Never fails; errors are logged and yield an empty list.
    async fn search(&self, query: &SearchQuery, language: &str) -> Vec<SubtitleCandidate>;

    /// Searches subtitles by movie hash.
    ///
    /// Never fails; errors are logged and yield an empty list.
    async fn search_by_hash(&self, _hash: &str, _language: &str) -> Vec<SubtitleCandidate> {
        Vec::new()
    }

    /// Turns a candidate's `url` into a directly downloadable URL.
    ///
    /// # Arguments
    ///
    /// * `reference` - The `url` field of a candidate from this provider
    ///
    /// # Returns
    ///
    /// The final URL, or a ProviderError if an authenticated follow-up call
    /// is required and fails
    async fn resolve_download_url(&self, reference: &str) -> Result<String, ProviderError>;

    /// Extra headers required when fetching a resolved URL
    fn download_headers(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }
}

/// Logs a failed search and turns it into an empty result
pub(crate) fn absorb(
    provider: &'static str,
    result: Result<Vec<SubtitleCandidate>, ProviderError>,
) -> Vec<SubtitleCandidate> {
    match result {
        Ok(candidates) => {
            tracing::info!(provider, count = candidates.len(), "Provider search finished");
            candidates
        }
        Err(e) if e.is_configuration() => {
            tracing::info!(provider, error = %e, "Provider not configured, skipping");
            Vec::new()
        }
        Err(e) => {
            tracing::warn!(provider, error = %e, "Provider search failed");
            Vec::new()
        }
    }
}

/// Checks a status code and extracts a readable error from the body
pub(crate) async fn error_for_status(
    provider: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = format!("HTTP {}: {}", status.as_u16(), body.trim());

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        Err(ProviderError::RateLimited { provider, message })
    } else {
        Err(ProviderError::Api { provider, message })
    }
}

/// Maps a two-letter language code to its lowercase English name
///
/// Unknown codes are returned lowercased.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(language_name("FR"), "french");
/// assert_eq!(language_name("nl"), "nl");
/// ```
pub(crate) fn language_name(code: &str) -> String {
    let code = code.trim().to_lowercase();
    let name = match code.as_str() {
        "ar" => "arabic",
        "en" => "english",
        "es" => "spanish",
        "fr" => "french",
        "de" => "german",
        "it" => "italian",
        "pt" => "portuguese",
        "ru" => "russian",
        "tr" => "turkish",
        "ja" => "japanese",
        "ko" => "korean",
        "zh" => "chinese",
        "fa" => "farsi",
        "vi" => "vietnamese",
        "id" => "indonesian",
        _ => return code,
    };
    name.to_string()
}

/// Deserializes an id that some APIs send as a number and others as a string
pub(crate) fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Deserializes a count that may arrive as a number, a numeric string or null
pub(crate) fn lenient_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().map(|f| f.max(0.0) as u64))
            .unwrap_or(0),
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Ids {
        #[serde(default, deserialize_with = "lenient_id")]
        id: Option<String>,
        #[serde(default, deserialize_with = "lenient_count")]
        count: u64,
    }

    #[test]
    fn test_lenient_fields() {
        let ids: Ids = serde_json::from_str(r#"{"id": 42, "count": "17"}"#).unwrap();
        assert_eq!(ids.id.as_deref(), Some("42"));
        assert_eq!(ids.count, 17);

        let ids: Ids = serde_json::from_str(r#"{"id": " abc ", "count": null}"#).unwrap();
        assert_eq!(ids.id.as_deref(), Some("abc"));
        assert_eq!(ids.count, 0);

        let ids: Ids = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(ids.id, None);
    }

    #[test]
    fn test_query_prefers_identity() {
        let mut query = SearchQuery::text("one piece");
        query.media_type = Some(MediaType::Tv);
        query.year = Some(2000);
        assert_eq!(query.title(), "one piece");
        assert_eq!(query.year(), Some(2000));
        assert!(!query.is_anime());

        let mut identity = MediaIdentity::new("ONE PIECE", Some(1999), MediaType::Tv);
        identity.is_anime = true;
        identity.imdb_id = Some("tt0388629".to_string());
        query.identity = Some(identity);

        assert_eq!(query.title(), "ONE PIECE");
        assert_eq!(query.year(), Some(1999));
        assert_eq!(query.imdb_id(), Some("tt0388629"));
        assert!(query.is_anime());
    }

    #[test]
    fn test_configuration_errors_are_distinguishable() {
        let missing = ProviderError::MissingCredential {
            provider: "SubDL",
            setting: "subdl_api_key",
        };
        assert!(missing.is_configuration());
        assert!(!ProviderError::RequestError("timeout".to_string()).is_configuration());
    }
}
