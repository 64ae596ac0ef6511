//! SubDL provider implementation

use super::subdl_ladder::{self, SubdlPage, SubdlRequest, TitleMatch};
use super::subdl_types::{SubdlResponse, SubdlResult, SubdlSubtitle};
use super::{
    HTTP_TIMEOUT, ProviderError, SearchQuery, SubtitleCandidate, SubtitleProvider, absorb,
    error_for_status,
};
use crate::metadata_retrieval::MediaType;
use crate::settings::{KEY_SUBDL_API_KEY, Settings};
use async_trait::async_trait;

const API_URL: &str = "https://api.subdl.com/api/v1/subtitles";

/// Host serving the archives behind relative download urls
const DOWNLOAD_HOST: &str = "https://dl.subdl.com";

const PROVIDER_NAME: &str = "SubDL";

/// Adapter for SubDL
///
/// Search results link directly to zip archives, so resolving a download is
/// the identity.
pub struct SubdlProvider {
    client: reqwest::Client,
    settings: Settings,
}

impl SubdlProvider {
    pub fn new(client: reqwest::Client, settings: Settings) -> Self {
        Self { client, settings }
    }

    fn api_key(&self) -> Result<String, ProviderError> {
        self.settings
            .string(KEY_SUBDL_API_KEY)
            .ok_or(ProviderError::MissingCredential {
                provider: PROVIDER_NAME,
                setting: KEY_SUBDL_API_KEY,
            })
    }

    /// Builds the first request of a search
    fn primary_request(query: &SearchQuery, language: &str) -> SubdlRequest {
        let media_type = match query.media_type() {
            Some(MediaType::Tv) => "tv",
            _ => "movie",
        };

        SubdlRequest {
            film_name: Some(query.title().to_string()).filter(|t| !t.trim().is_empty()),
            sd_id: None,
            tmdb_id: query.tmdb_id().map(|id| id.to_string()),
            imdb_id: query.imdb_id().map(str::to_string),
            season: query.season,
            episode: query.episode,
            full_season: false,
            media_type: Some(media_type),
            language: Some(language.to_string()).filter(|l| !l.is_empty()),
        }
    }

    /// Performs one request and decodes its page
    async fn fetch_page(
        &self,
        api_key: &str,
        request: SubdlRequest,
        is_anime: bool,
    ) -> Result<SubdlPage, ProviderError> {
        let Some(params) = request.query_params() else {
            tracing::warn!("SubDL search without any search key");
            return Ok(SubdlPage::default());
        };

        tracing::debug!(?params, "SubDL request");

        let response = self
            .client
            .get(API_URL)
            .timeout(HTTP_TIMEOUT)
            .query(&[("api_key", api_key)])
            .query(&params)
            .send()
            .await?;
        let body: SubdlResponse = error_for_status(PROVIDER_NAME, response)
            .await?
            .json()
            .await?;

        decode_page(body, is_anime)
    }
}

/// Turns a response into candidates and title matches
///
/// Subtitle files are taken from `subtitles`; only if that yields nothing are
/// the `results` considered, where entries with a url are files and entries
/// without one are titles.
fn decode_page(body: SubdlResponse, is_anime: bool) -> Result<SubdlPage, ProviderError> {
    if body.status == Some(false) || body.status_code.is_some() {
        let message = body
            .message
            .or(body.error)
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(match body.status_code {
            Some(429) => ProviderError::RateLimited {
                provider: PROVIDER_NAME,
                message: format!("daily limit exceeded: {message}"),
            },
            _ => ProviderError::Api {
                provider: PROVIDER_NAME,
                message,
            },
        });
    }

    let candidates: Vec<_> = body
        .subtitles
        .into_iter()
        .filter_map(|subtitle| convert_subtitle(subtitle, is_anime))
        .collect();
    if !candidates.is_empty() {
        return Ok(SubdlPage {
            candidates,
            titles: Vec::new(),
        });
    }

    let mut page = SubdlPage::default();
    for result in body.results {
        match absolute_url(result.download_url.as_deref().or(result.url.as_deref())) {
            Some(url) => page.candidates.push(convert_result(result, url, is_anime)),
            None => page.titles.push(title_match(result)),
        }
    }
    Ok(page)
}

/// Makes a download url absolute; empty urls yield None
fn absolute_url(url: Option<&str>) -> Option<String> {
    let url = url?.trim();
    if url.is_empty() {
        None
    } else if url.starts_with('/') {
        Some(format!("{DOWNLOAD_HOST}{url}"))
    } else {
        Some(url.to_string())
    }
}

fn convert_subtitle(subtitle: SubdlSubtitle, is_anime: bool) -> Option<SubtitleCandidate> {
    let url = absolute_url(subtitle.download_url.as_deref().or(subtitle.url.as_deref()))?;

    Some(SubtitleCandidate {
        id: subtitle.sd_id.unwrap_or_else(|| url.clone()),
        filename: subtitle
            .release_name
            .or(subtitle.name)
            .unwrap_or_else(|| "Unknown".to_string()),
        url,
        source: PROVIDER_NAME.to_string(),
        provider_id: "subdl".to_string(),
        language: subtitle.language.or(subtitle.lang).unwrap_or_default(),
        format: "srt".to_string(),
        downloads: subtitle.download_count,
        rating: 0.0,
        is_anime,
        owner: subtitle.author.filter(|a| !a.trim().is_empty()),
        hearing_impaired: subtitle.hi.unwrap_or(false),
        caption: subtitle.comment.filter(|c| !c.trim().is_empty()),
    })
}

fn convert_result(result: SubdlResult, url: String, is_anime: bool) -> SubtitleCandidate {
    SubtitleCandidate {
        id: result.sd_id.unwrap_or_else(|| url.clone()),
        filename: result
            .release_name
            .or(result.name)
            .unwrap_or_else(|| "Unknown".to_string()),
        url,
        source: PROVIDER_NAME.to_string(),
        provider_id: "subdl".to_string(),
        language: result.language.unwrap_or_default(),
        format: "srt".to_string(),
        downloads: 0,
        rating: 0.0,
        is_anime,
        owner: None,
        hearing_impaired: false,
        caption: None,
    }
}

fn title_match(result: SubdlResult) -> TitleMatch {
    TitleMatch {
        name: result.name.unwrap_or_default(),
        sd_id: result.sd_id,
        tmdb_id: result.tmdb_id,
        imdb_id: result.imdb_id,
        is_tv: result
            .kind
            .is_some_and(|kind| kind.eq_ignore_ascii_case("tv")),
    }
}

#[async_trait]
impl SubtitleProvider for SubdlProvider {
    fn id(&self) -> &'static str {
        "subdl"
    }

    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn check_configuration(&self) -> Result<(), ProviderError> {
        self.api_key().map(|_| ())
    }

    async fn search(&self, query: &SearchQuery, language: &str) -> Vec<SubtitleCandidate> {
        let api_key = match self.api_key() {
            Ok(key) => key,
            Err(e) => return absorb(self.id(), Err(e)),
        };
        let is_anime = query.is_anime();
        let primary = Self::primary_request(query, language);

        let result = subdl_ladder::run(primary, |request| {
            self.fetch_page(&api_key, request, is_anime)
        })
        .await;

        absorb(self.id(), result)
    }

    async fn resolve_download_url(&self, reference: &str) -> Result<String, ProviderError> {
        absolute_url(Some(reference))
            .ok_or_else(|| ProviderError::InvalidReference(reference.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata_retrieval::MediaIdentity;

    fn response(json: serde_json::Value) -> SubdlResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_decode_subtitles() {
        let page = decode_page(
            response(serde_json::json!({
                "status": true,
                "results": [{"sd_id": 3100, "type": "tv", "name": "Frieren", "tmdb_id": 209867}],
                "subtitles": [
                    {
                        "release_name": "Frieren.S01E03.1080p.WEB",
                        "name": "SUBDL::frieren.zip",
                        "lang": "english",
                        "language": "EN",
                        "author": "kuma",
                        "url": "/subtitle/3197651-3213944.zip",
                        "hi": true,
                        "comment": ""
                    },
                    {"release_name": "broken", "url": ""}
                ]
            })),
            true,
        )
        .unwrap();

        assert_eq!(page.candidates.len(), 1);
        assert!(page.titles.is_empty());

        let candidate = &page.candidates[0];
        assert_eq!(candidate.url, "https://dl.subdl.com/subtitle/3197651-3213944.zip");
        assert_eq!(candidate.id, candidate.url);
        assert_eq!(candidate.filename, "Frieren.S01E03.1080p.WEB");
        assert_eq!(candidate.language, "EN");
        assert_eq!(candidate.owner.as_deref(), Some("kuma"));
        assert!(candidate.hearing_impaired);
        assert!(candidate.is_anime);
        assert_eq!(candidate.caption, None);
    }

    #[test]
    fn test_decode_title_matches() {
        let page = decode_page(
            response(serde_json::json!({
                "status": true,
                "results": [
                    {"sd_id": 3100, "type": "tv", "name": "Frieren", "tmdb_id": 209867, "imdb_id": "tt22248376"}
                ],
                "subtitles": []
            })),
            false,
        )
        .unwrap();

        assert!(page.candidates.is_empty());
        assert_eq!(
            page.titles,
            vec![TitleMatch {
                name: "Frieren".to_string(),
                sd_id: Some("3100".to_string()),
                tmdb_id: Some("209867".to_string()),
                imdb_id: Some("tt22248376".to_string()),
                is_tv: true,
            }]
        );
    }

    #[test]
    fn test_api_errors() {
        let limited = decode_page(
            response(serde_json::json!({"status": false, "statusCode": 429, "message": "Too many"})),
            false,
        );
        assert!(matches!(limited, Err(ProviderError::RateLimited { .. })));

        let failed = decode_page(
            response(serde_json::json!({"status": false, "error": "invalid api key"})),
            false,
        );
        assert!(matches!(
            failed,
            Err(ProviderError::Api { message, .. }) if message == "invalid api key"
        ));
    }

    #[test]
    fn test_primary_request_from_identity() {
        let mut identity = MediaIdentity::new("Breaking Bad", Some(2008), MediaType::Tv);
        identity.tmdb_id = Some(1396);
        identity.imdb_id = Some("tt0903747".to_string());
        let query = SearchQuery {
            text: "breaking bad".to_string(),
            identity: Some(identity),
            season: Some(2),
            episode: Some(5),
            ..SearchQuery::default()
        };

        let request = SubdlProvider::primary_request(&query, "en");
        assert_eq!(request.film_name.as_deref(), Some("Breaking Bad"));
        assert_eq!(request.tmdb_id.as_deref(), Some("1396"));
        assert_eq!(request.media_type, Some("tv"));
        assert_eq!((request.season, request.episode), (Some(2), Some(5)));

        let params = request.query_params().unwrap();
        assert_eq!(params[0], ("tmdb_id", "1396".to_string()));
        assert!(params.contains(&("languages", "EN".to_string())));
    }

    #[test]
    fn test_untyped_query_searches_movies() {
        let request = SubdlProvider::primary_request(&SearchQuery::text("heat"), "");
        assert_eq!(request.media_type, Some("movie"));
        assert_eq!(request.language, None);
    }

    #[tokio::test]
    async fn test_resolve_download_url() {
        let provider = SubdlProvider::new(reqwest::Client::new(), Settings::in_memory());
        assert_eq!(
            provider
                .resolve_download_url("/subtitle/1-2.zip")
                .await
                .unwrap(),
            "https://dl.subdl.com/subtitle/1-2.zip"
        );
        assert!(provider.resolve_download_url("").await.is_err());
    }
}
