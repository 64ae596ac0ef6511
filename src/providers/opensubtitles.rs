//! OpenSubtitles provider implementation
//!
//! Talks to the OpenSubtitles REST API v1. Searching only needs the API key;
//! resolving a download link needs a logged-in account. The bearer token is
//! kept until the API rejects it, then the provider logs in again.

use super::opensubtitles_types::{
    OsDownloadRequest, OsDownloadResponse, OsLoginRequest, OsLoginResponse, OsSearchResponse,
    OsSubtitle,
};
use super::{
    HTTP_TIMEOUT, ProviderError, SearchQuery, SubtitleCandidate, SubtitleProvider, USER_AGENT,
    absorb, error_for_status,
};
use crate::metadata_retrieval::MediaType;
use crate::settings::{
    KEY_OPENSUBTITLES_API_KEY, KEY_OPENSUBTITLES_PASSWORD, KEY_OPENSUBTITLES_USERNAME, Settings,
};
use async_trait::async_trait;
use std::future::Future;
use tokio::sync::Mutex;

const API_BASE: &str = "https://api.opensubtitles.com/api/v1";

/// Scheme of the references this provider hands out as candidate urls
const REFERENCE_SCHEME: &str = "opensubtitles://";

const PROVIDER_NAME: &str = "OpenSubtitles";

/// Adapter for OpenSubtitles
pub struct OpenSubtitlesProvider {
    client: reqwest::Client,
    settings: Settings,
    base_url: String,
    token: Mutex<Option<String>>,
}

impl OpenSubtitlesProvider {
    pub fn new(client: reqwest::Client, settings: Settings) -> Self {
        Self {
            client,
            settings,
            base_url: API_BASE.to_string(),
            token: Mutex::new(None),
        }
    }

    fn api_key(&self) -> Result<String, ProviderError> {
        self.settings
            .string(KEY_OPENSUBTITLES_API_KEY)
            .ok_or(ProviderError::MissingCredential {
                provider: PROVIDER_NAME,
                setting: KEY_OPENSUBTITLES_API_KEY,
            })
    }

    /// Returns the bearer token, logging in first if credentials are configured
    ///
    /// `Ok(None)` means no credentials are configured; searches then run
    /// anonymously.
    async fn token(&self, api_key: &str) -> Result<Option<String>, ProviderError> {
        let mut token = self.token.lock().await;
        if token.is_some() {
            return Ok(token.clone());
        }

        let (Some(username), Some(password)) = (
            self.settings.string(KEY_OPENSUBTITLES_USERNAME),
            self.settings.string(KEY_OPENSUBTITLES_PASSWORD),
        ) else {
            return Ok(None);
        };

        tracing::debug!("Logging in to OpenSubtitles");
        let response = self
            .client
            .post(format!("{}/login", self.base_url))
            .timeout(HTTP_TIMEOUT)
            .header("Api-Key", api_key)
            .header("User-Agent", USER_AGENT)
            .json(&OsLoginRequest {
                username: &username,
                password: &password,
            })
            .send()
            .await?;

        let login: OsLoginResponse = error_for_status(PROVIDER_NAME, response)
            .await?
            .json()
            .await?;
        *token = login.token;
        if token.is_some() {
            tracing::info!("OpenSubtitles login successful");
        }
        Ok(token.clone())
    }

    /// Runs a `/subtitles` search with the given parameters
    async fn query_subtitles(
        &self,
        params: Vec<(&'static str, String)>,
        is_anime: bool,
    ) -> Result<Vec<SubtitleCandidate>, ProviderError> {
        let api_key = self.api_key()?;

        // A failed login only costs the download capability
        let token = match self.token(&api_key).await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(error = %e, "OpenSubtitles login failed, searching anonymously");
                None
            }
        };

        let mut request = self
            .client
            .get(format!("{}/subtitles", self.base_url))
            .timeout(HTTP_TIMEOUT)
            .header("Api-Key", &api_key)
            .header("User-Agent", USER_AGENT)
            .query(&params);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = error_for_status(PROVIDER_NAME, request.send().await?).await?;
        let body: OsSearchResponse = response.json().await?;

        Ok(body
            .data
            .into_iter()
            .filter_map(|item| convert_subtitle(item, is_anime))
            .collect())
    }

    /// Builds the search parameters of a text query
    ///
    /// A known IMDb id replaces the free text; episodes of a show are looked
    /// up through the show's id.
    fn search_params(query: &SearchQuery, language: &str) -> Vec<(&'static str, String)> {
        let mut params = vec![("languages", language.to_lowercase())];

        match query.imdb_id() {
            Some(imdb_id) => {
                let numeric = imdb_id.trim_start_matches("tt").to_string();
                if query.media_type() == Some(MediaType::Tv) {
                    params.push(("parent_imdb_id", numeric));
                } else {
                    params.push(("imdb_id", numeric));
                }
            }
            None => params.push(("query", query.title().to_string())),
        }

        if query.media_type() == Some(MediaType::Tv) {
            if let Some(season) = query.season {
                params.push(("season_number", season.to_string()));
            }
            if let Some(episode) = query.episode {
                params.push(("episode_number", episode.to_string()));
            }
        }

        params
    }
}

/// Maps a search hit; entries without a downloadable file are dropped
fn convert_subtitle(item: OsSubtitle, is_anime: bool) -> Option<SubtitleCandidate> {
    let attributes = item.attributes;
    let file = attributes.files.first()?;

    let filename = attributes
        .release
        .clone()
        .filter(|r| !r.trim().is_empty())
        .or_else(|| file.file_name.clone())
        .unwrap_or_else(|| "Unknown".to_string());

    Some(SubtitleCandidate {
        id: item.id,
        url: format!("{REFERENCE_SCHEME}{}", file.file_id),
        source: PROVIDER_NAME.to_string(),
        provider_id: "opensubtitles".to_string(),
        language: attributes.language.unwrap_or_default(),
        format: attributes.format.unwrap_or_else(|| "srt".to_string()),
        filename,
        downloads: attributes.download_count,
        rating: (attributes.ratings.unwrap_or(0.0) / 2.0).clamp(0.0, 5.0),
        is_anime,
        owner: attributes.uploader.and_then(|u| u.name),
        hearing_impaired: attributes.hearing_impaired.unwrap_or(false),
        caption: attributes.comments.filter(|c| !c.trim().is_empty()),
    })
}

/// Extracts the file id from an `opensubtitles://<file_id>` reference
fn parse_reference(reference: &str) -> Result<u64, ProviderError> {
    reference
        .strip_prefix(REFERENCE_SCHEME)
        .and_then(|id| id.trim().parse().ok())
        .ok_or_else(|| ProviderError::InvalidReference(reference.to_string()))
}

#[async_trait]
impl SubtitleProvider for OpenSubtitlesProvider {
    fn id(&self) -> &'static str {
        "opensubtitles"
    }

    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn supports_hash_search(&self) -> bool {
        true
    }

    fn check_configuration(&self) -> Result<(), ProviderError> {
        self.api_key().map(|_| ())
    }

    async fn search(&self, query: &SearchQuery, language: &str) -> Vec<SubtitleCandidate> {
        let params = Self::search_params(query, language);
        tracing::debug!(?params, "Searching OpenSubtitles");
        absorb(self.id(), self.query_subtitles(params, query.is_anime()).await)
    }

    async fn search_by_hash(&self, hash: &str, language: &str) -> Vec<SubtitleCandidate> {
        let params = vec![
            ("moviehash", hash.to_string()),
            ("languages", language.to_lowercase()),
        ];
        tracing::debug!(hash, "Searching OpenSubtitles by hash");
        absorb(self.id(), self.query_subtitles(params, false).await)
    }

    async fn resolve_download_url(&self, reference: &str) -> Result<String, ProviderError> {
        let file_id = parse_reference(reference)?;
        let api_key = self.api_key()?;
        let api_key = api_key.as_str();

        self.with_session(api_key, move |token| {
            self.request_download(api_key, token, file_id)
        })
        .await
    }
}

impl OpenSubtitlesProvider {
    /// Drops the cached bearer token so the next call logs in again
    async fn forget_token(&self) {
        *self.token.lock().await = None;
    }

    /// Runs an authenticated request, logging in again once if the token
    /// was rejected
    async fn with_session<T, F, Fut>(&self, api_key: &str, mut attempt: F) -> Result<T, ProviderError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<Session<T>, ProviderError>>,
    {
        for _ in 0..2 {
            let token = self
                .token(api_key)
                .await
                .map_err(|e| ProviderError::DownloadResolution {
                    provider: PROVIDER_NAME,
                    message: format!("login failed: {e}"),
                })?
                .ok_or(ProviderError::MissingCredential {
                    provider: PROVIDER_NAME,
                    setting: KEY_OPENSUBTITLES_USERNAME,
                })?;

            match attempt(token).await? {
                Session::Done(value) => return Ok(value),
                Session::Expired => {
                    tracing::info!("OpenSubtitles token rejected, logging in again");
                    self.forget_token().await;
                }
            }
        }

        Err(ProviderError::DownloadResolution {
            provider: PROVIDER_NAME,
            message: "token rejected after a fresh login".to_string(),
        })
    }

    /// Asks `/download` for the link of a file
    async fn request_download(
        &self,
        api_key: &str,
        token: String,
        file_id: u64,
    ) -> Result<Session<String>, ProviderError> {
        let resolution_failed = |message: String| ProviderError::DownloadResolution {
            provider: PROVIDER_NAME,
            message,
        };

        let response = self
            .client
            .post(format!("{}/download", self.base_url))
            .timeout(HTTP_TIMEOUT)
            .header("Api-Key", api_key)
            .header("User-Agent", USER_AGENT)
            .bearer_auth(token)
            .json(&OsDownloadRequest { file_id })
            .send()
            .await
            .map_err(|e| resolution_failed(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(Session::Expired);
        }

        let response = error_for_status(PROVIDER_NAME, response)
            .await
            .map_err(|e| resolution_failed(e.to_string()))?;
        let body: OsDownloadResponse = response
            .json()
            .await
            .map_err(|e| resolution_failed(e.to_string()))?;

        tracing::debug!(file_id, remaining = ?body.remaining, "Resolved OpenSubtitles download");

        body.link
            .filter(|link| !link.is_empty())
            .map(Session::Done)
            .ok_or_else(|| {
                resolution_failed(
                    body.message
                        .unwrap_or_else(|| "response contained no link".to_string()),
                )
            })
    }
}

/// Result of a request made with a bearer token
enum Session<T> {
    Done(T),
    /// The server answered 401; the token is no longer valid
    Expired,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata_retrieval::MediaIdentity;

    fn fixture() -> OsSearchResponse {
        serde_json::from_value(serde_json::json!({
            "total_count": 2,
            "data": [
                {
                    "id": "7319850",
                    "type": "subtitle",
                    "attributes": {
                        "language": "en",
                        "download_count": 48211,
                        "ratings": 8.0,
                        "release": "Heat.1995.1080p.BluRay.x264",
                        "format": null,
                        "hearing_impaired": true,
                        "comments": "",
                        "uploader": {"name": "admin"},
                        "files": [{"file_id": 8174352, "file_name": "heat.srt"}]
                    }
                },
                {
                    "id": "111",
                    "type": "subtitle",
                    "attributes": {"language": "en", "files": []}
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_convert_subtitle() {
        let mut items = fixture().data.into_iter();
        let candidate = convert_subtitle(items.next().unwrap(), false).unwrap();

        assert_eq!(candidate.id, "7319850");
        assert_eq!(candidate.url, "opensubtitles://8174352");
        assert_eq!(candidate.filename, "Heat.1995.1080p.BluRay.x264");
        assert_eq!(candidate.format, "srt");
        assert_eq!(candidate.downloads, 48211);
        assert_eq!(candidate.rating, 4.0);
        assert_eq!(candidate.owner.as_deref(), Some("admin"));
        assert!(candidate.hearing_impaired);
        assert_eq!(candidate.caption, None);

        // No files, no candidate
        assert!(convert_subtitle(items.next().unwrap(), false).is_none());
    }

    #[test]
    fn test_search_params_prefer_imdb_id() {
        let mut query = SearchQuery::text("heat");
        let params = OpenSubtitlesProvider::search_params(&query, "EN");
        assert!(params.contains(&("query", "heat".to_string())));
        assert!(params.contains(&("languages", "en".to_string())));

        let mut identity = MediaIdentity::new("Heat", Some(1995), MediaType::Movie);
        identity.imdb_id = Some("tt0113277".to_string());
        query.identity = Some(identity);

        let params = OpenSubtitlesProvider::search_params(&query, "en");
        assert!(params.contains(&("imdb_id", "0113277".to_string())));
        assert!(!params.iter().any(|(key, _)| *key == "query"));
    }

    #[test]
    fn test_search_params_for_episodes() {
        let mut identity = MediaIdentity::new("Breaking Bad", Some(2008), MediaType::Tv);
        identity.imdb_id = Some("tt0903747".to_string());
        let query = SearchQuery {
            text: "breaking bad".to_string(),
            identity: Some(identity),
            season: Some(2),
            episode: Some(5),
            ..SearchQuery::default()
        };

        let params = OpenSubtitlesProvider::search_params(&query, "en");
        assert!(params.contains(&("parent_imdb_id", "0903747".to_string())));
        assert!(params.contains(&("season_number", "2".to_string())));
        assert!(params.contains(&("episode_number", "5".to_string())));
    }

    #[test]
    fn test_parse_reference() {
        assert_eq!(parse_reference("opensubtitles://8174352").unwrap(), 8174352);
        assert!(matches!(
            parse_reference("https://example.com/sub.zip"),
            Err(ProviderError::InvalidReference(_))
        ));
    }

    #[tokio::test]
    async fn test_download_without_login_is_configuration_error() {
        let settings = Settings::in_memory();
        settings
            .set_string(KEY_OPENSUBTITLES_API_KEY, "key")
            .unwrap();
        let provider = OpenSubtitlesProvider::new(reqwest::Client::new(), settings);

        let error = provider
            .resolve_download_url("opensubtitles://1")
            .await
            .unwrap_err();
        assert!(error.is_configuration());
    }

    #[tokio::test]
    async fn test_valid_token_is_reused() {
        let provider = OpenSubtitlesProvider::new(reqwest::Client::new(), Settings::in_memory());
        *provider.token.lock().await = Some("valid".to_string());

        let link = provider
            .with_session("key", |token| async move {
                Ok::<_, ProviderError>(Session::Done(format!("https://dl.example/{token}")))
            })
            .await
            .unwrap();

        assert_eq!(link, "https://dl.example/valid");
        assert_eq!(provider.token.lock().await.as_deref(), Some("valid"));
    }

    #[tokio::test]
    async fn test_rejected_token_is_dropped_before_logging_in_again() {
        let provider = OpenSubtitlesProvider::new(reqwest::Client::new(), Settings::in_memory());
        *provider.token.lock().await = Some("stale".to_string());

        let mut seen = Vec::new();
        let error = provider
            .with_session("key", |token| {
                seen.push(token);
                async { Ok::<Session<String>, ProviderError>(Session::Expired) }
            })
            .await
            .unwrap_err();

        // Without stored credentials the second login has nothing to log in with
        assert!(error.is_configuration());
        assert_eq!(seen, vec!["stale".to_string()]);
        assert_eq!(*provider.token.lock().await, None);
    }

    #[tokio::test]
    async fn test_search_without_key_is_empty() {
        let provider = OpenSubtitlesProvider::new(reqwest::Client::new(), Settings::in_memory());
        assert!(provider.check_configuration().is_err());
        assert!(provider.search(&SearchQuery::text("heat"), "en").await.is_empty());
    }
}
