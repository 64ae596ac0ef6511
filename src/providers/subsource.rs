//! SubSource provider implementation
//!
//! SubSource searches in two steps: the query is matched against its title
//! catalogue, then the subtitles of the best few titles are listed. Language
//! filters take language names, not codes, and are not reliable, so results
//! are filtered again on our side.

use super::subsource_types::{
    SsMovie, SsMoviesResponse, SsRating, SsSubtitle, SsSubtitlesResponse,
};
use super::{
    HTTP_TIMEOUT, ProviderError, SearchQuery, SubtitleCandidate, SubtitleProvider, USER_AGENT,
    absorb, error_for_status, language_name,
};
use crate::metadata_retrieval::MediaType;
use crate::settings::{KEY_SUBSOURCE_API_KEY, Settings};
use async_trait::async_trait;
use serde::de::DeserializeOwned;

const API_BASE: &str = "https://api.subsource.net/api/v1";

const PROVIDER_NAME: &str = "SubSource";

/// Number of matched titles whose subtitles are listed
const MAX_TITLES: usize = 3;

/// Page size requested from the subtitle listing
const PAGE_LIMIT: u32 = 100;

/// Language filter applied to the listing
#[derive(Debug, Clone, PartialEq, Eq)]
struct LanguageFilter {
    code: String,
    name: String,
}

impl LanguageFilter {
    /// None for an empty language or `all`
    fn new(language: &str) -> Option<Self> {
        let code = language.trim().to_lowercase();
        if code.is_empty() || code == "all" {
            return None;
        }
        Some(Self {
            name: language_name(&code),
            code,
        })
    }

    fn matches(&self, language: &str) -> bool {
        let language = language.to_lowercase();
        language.contains(&self.name) || language == self.code
    }
}

/// Adapter for SubSource
pub struct SubSourceProvider {
    client: reqwest::Client,
    settings: Settings,
    base_url: String,
}

impl SubSourceProvider {
    pub fn new(client: reqwest::Client, settings: Settings) -> Self {
        Self {
            client,
            settings,
            base_url: API_BASE.to_string(),
        }
    }

    fn api_key(&self) -> Result<String, ProviderError> {
        self.settings
            .string(KEY_SUBSOURCE_API_KEY)
            .ok_or(ProviderError::MissingCredential {
                provider: PROVIDER_NAME,
                setting: KEY_SUBSOURCE_API_KEY,
            })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        api_key: &str,
        path: &str,
        params: &[(&'static str, String)],
    ) -> Result<T, ProviderError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .timeout(HTTP_TIMEOUT)
            .header("X-API-Key", api_key)
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT)
            .query(params)
            .send()
            .await?;

        Ok(error_for_status(PROVIDER_NAME, response)
            .await?
            .json()
            .await?)
    }

    /// Parameters of the title search
    fn title_params(query: &SearchQuery) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();

        match query.imdb_id().filter(|id| id.starts_with("tt")) {
            Some(imdb_id) => {
                params.push(("searchType", "imdb".to_string()));
                params.push(("imdb", imdb_id.to_string()));
            }
            None => {
                params.push(("searchType", "text".to_string()));
                params.push(("q", query.title().to_string()));
            }
        }

        if let Some(year) = query.year() {
            params.push(("year", year.to_string()));
        }
        if let Some(media_type) = query.media_type() {
            let kind = match media_type {
                MediaType::Tv => "series",
                MediaType::Movie => "movie",
            };
            params.push(("type", kind.to_string()));
        }
        if let Some(season) = query.season {
            params.push(("season", season.to_string()));
        }

        params
    }

    /// Parameters of the subtitle listing of one title
    fn listing_params(
        movie: &SsMovie,
        query: &SearchQuery,
        filter: Option<&LanguageFilter>,
    ) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(movie_id) = &movie.movie_id {
            params.push(("movieId", movie_id.clone()));
        }
        if let Some(imdb_id) = &movie.imdb_id {
            params.push(("imdbId", imdb_id.clone()));
        }
        if let Some(season) = query.season {
            params.push(("season", season.to_string()));
        }
        if let Some(episode) = query.episode {
            params.push(("episode", episode.to_string()));
        }
        if let Some(filter) = filter {
            params.push(("lang", filter.name.clone()));
            params.push(("language", filter.name.clone()));
        }
        params.push(("limit", PAGE_LIMIT.to_string()));
        params
    }

    /// Lists and filters the subtitles of one title
    async fn list_subtitles(
        &self,
        api_key: &str,
        movie: &SsMovie,
        query: &SearchQuery,
        language: &str,
    ) -> Result<Vec<SubtitleCandidate>, ProviderError> {
        let filter = LanguageFilter::new(language);
        let params = Self::listing_params(movie, query, filter.as_ref());

        tracing::debug!(title = ?movie.title, movie_id = ?movie.movie_id, "Listing SubSource subtitles");
        let listing: SsSubtitlesResponse = self.get_json(api_key, "/subtitles", &params).await?;

        let fallback_name = movie.title.as_deref().unwrap_or("Unknown");
        let candidates: Vec<_> = listing
            .data
            .into_iter()
            .map(|subtitle| convert_subtitle(subtitle, language, fallback_name, query.is_anime()))
            .collect();

        let total = candidates.len();
        let kept: Vec<_> = match &filter {
            Some(filter) => candidates
                .into_iter()
                .filter(|c| filter.matches(&c.language))
                .collect(),
            None => candidates,
        };

        if kept.len() < total {
            tracing::debug!(
                rejected = total - kept.len(),
                language,
                "Dropped SubSource subtitles in other languages"
            );
        }
        Ok(kept)
    }

    async fn search_titles(
        &self,
        query: &SearchQuery,
        language: &str,
    ) -> Result<Vec<SubtitleCandidate>, ProviderError> {
        let api_key = self.api_key()?;

        let params = Self::title_params(query);
        tracing::debug!(?params, "Searching SubSource titles");
        let movies: SsMoviesResponse = self.get_json(&api_key, "/movies/search", &params).await?;

        let movies: Vec<_> = movies
            .data
            .into_iter()
            .filter(|m| m.movie_id.is_some() || m.imdb_id.is_some())
            .take(MAX_TITLES)
            .collect();
        tracing::debug!(count = movies.len(), "SubSource matched titles");

        let listings = futures::future::join_all(
            movies
                .iter()
                .map(|movie| self.list_subtitles(&api_key, movie, query, language)),
        )
        .await;

        let mut candidates = Vec::new();
        for (movie, listing) in movies.iter().zip(listings) {
            match listing {
                Ok(found) => candidates.extend(found),
                Err(e) => tracing::warn!(
                    title = ?movie.title,
                    error = %e,
                    "Failed to list SubSource subtitles"
                ),
            }
        }
        Ok(candidates)
    }
}

/// Interprets a boolean that may arrive as a number
fn truthy(value: Option<&serde_json::Value>) -> bool {
    match value {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    }
}

/// Normalizes a rating to 0-5
fn normalize_rating(rating: Option<&SsRating>) -> f32 {
    let score = match rating {
        Some(SsRating::Score(score)) => *score,
        Some(SsRating::Votes { good, total }) if *total > 0.0 => good / total * 5.0,
        _ => 0.0,
    };
    score.clamp(0.0, 5.0)
}

fn convert_subtitle(
    subtitle: SsSubtitle,
    language: &str,
    fallback_name: &str,
    is_anime: bool,
) -> SubtitleCandidate {
    let id = subtitle
        .subtitle_id
        .or(subtitle.id)
        .unwrap_or_else(|| ulid::Ulid::new().to_string());

    // Several subtitles may share one link; the fragment keeps urls unique
    let base_url = subtitle
        .link
        .or(subtitle.url)
        .or(subtitle.download_url)
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| format!("subsource:{id}"));
    let url = if base_url.contains('#') {
        base_url
    } else {
        format!("{base_url}#{id}")
    };

    let filename = subtitle
        .release_info
        .as_ref()
        .and_then(|info| info.first().map(str::to_string))
        .or(subtitle.release_name)
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| fallback_name.to_string());

    let owner = subtitle
        .contributors
        .into_iter()
        .next()
        .and_then(|c| c.displayname.or(c.name))
        .or_else(|| subtitle.uploader_id.map(|id| format!("Uploader {id}")));

    let caption = subtitle
        .commentary
        .or(subtitle.comment)
        .map(|html| nanohtml2text::html2text(&html).trim().to_string())
        .filter(|text| !text.is_empty());

    SubtitleCandidate {
        id,
        url,
        source: PROVIDER_NAME.to_string(),
        provider_id: "subsource".to_string(),
        language: subtitle
            .language
            .or(subtitle.lang)
            .unwrap_or_else(|| language.to_string()),
        format: subtitle.format.unwrap_or_else(|| "srt".to_string()),
        filename,
        downloads: subtitle.downloads,
        rating: normalize_rating(subtitle.rating.as_ref()),
        is_anime,
        owner,
        hearing_impaired: truthy(subtitle.hearing_impaired.as_ref()) || truthy(subtitle.hi.as_ref()),
        caption,
    }
}

#[async_trait]
impl SubtitleProvider for SubSourceProvider {
    fn id(&self) -> &'static str {
        "subsource"
    }

    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn check_configuration(&self) -> Result<(), ProviderError> {
        self.api_key().map(|_| ())
    }

    async fn search(&self, query: &SearchQuery, language: &str) -> Vec<SubtitleCandidate> {
        absorb(self.id(), self.search_titles(query, language).await)
    }

    async fn resolve_download_url(&self, reference: &str) -> Result<String, ProviderError> {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return Ok(reference.to_string());
        }

        let id = reference
            .strip_prefix("subsource:")
            .and_then(|rest| rest.split('#').next())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ProviderError::InvalidReference(reference.to_string()))?;

        Ok(format!("{}/subtitles/{}/download", self.base_url, id))
    }

    fn download_headers(&self) -> Vec<(&'static str, String)> {
        self.api_key()
            .map(|key| vec![("X-API-Key", key)])
            .unwrap_or_default()
    }
}
