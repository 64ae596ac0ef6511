/// AniList metadata provider implementation.
use super::anilist_types::{AniListMedia, GraphQlResponse, MediaData};
use super::{
    MediaIdentity, MediaType, MetadataProvider, MetadataRetrievalError, RateLimiter,
    REQUEST_TIMEOUT,
};
use async_trait::async_trait;
use reqwest::StatusCode;

const API_URL: &str = "https://graphql.anilist.co";

/// AniList admits 90 requests per minute
const REQUESTS_PER_MINUTE: u32 = 90;

const SEARCH_QUERY: &str = r#"
query ($search: String, $year: Int) {
    Media(search: $search, seasonYear: $year, type: ANIME, sort: POPULARITY_DESC) {
        id
        idMal
        title { romaji english native }
        format
        startDate { year }
    }
}
"#;

/// Metadata provider for the AniList GraphQL API.
///
/// Only ever answers with anime, so a hit is proof that the title is anime.
/// Requests are throttled to the public rate limit; when the budget is
/// exhausted the lookup waits for the next window.
pub struct AniListProvider {
    client: reqwest::Client,
    endpoint: String,
    limiter: RateLimiter,
}

impl AniListProvider {
    /// Creates a new AniList provider instance.
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            endpoint: API_URL.to_string(),
            limiter: RateLimiter::per_minute(REQUESTS_PER_MINUTE),
        }
    }

    /// Points the provider at a different GraphQL endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Converts an AniList media entry to our internal MediaIdentity.
    fn convert_media(media: AniListMedia, searched_title: &str) -> MediaIdentity {
        let title = [media.title.romaji, media.title.english, media.title.native]
            .into_iter()
            .flatten()
            .find(|t| !t.trim().is_empty())
            .unwrap_or_else(|| searched_title.to_string());

        // Episodic numbering is what subtitle searches care about, so everything
        // except theatrical releases is treated as a show
        let media_type = match media.format.as_deref() {
            Some("MOVIE") => MediaType::Movie,
            _ => MediaType::Tv,
        };

        MediaIdentity {
            title,
            year: media.start_date.and_then(|d| d.year),
            media_type,
            imdb_id: None,
            tmdb_id: None,
            anilist_id: Some(media.id),
            mal_id: media.id_mal,
            is_anime: true,
        }
    }
}

#[async_trait]
impl MetadataProvider for AniListProvider {
    fn name(&self) -> &'static str {
        "anilist"
    }

    async fn fetch_identity(
        &self,
        title: &str,
        year: Option<u16>,
        _media_type: Option<MediaType>,
    ) -> Result<Option<MediaIdentity>, MetadataRetrievalError> {
        self.limiter.acquire().await;

        let mut variables = serde_json::json!({ "search": title });
        if let Some(year) = year {
            variables["year"] = serde_json::json!(year);
        }

        tracing::debug!(title, ?year, "Searching AniList");

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(REQUEST_TIMEOUT)
            .header("Accept", "application/json")
            .json(&serde_json::json!({ "query": SEARCH_QUERY, "variables": variables }))
            .send()
            .await?;

        match response.status() {
            // AniList answers a search without match with 404
            StatusCode::NOT_FOUND => return Ok(None),
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(MetadataRetrievalError::RateLimited("AniList"));
            }
            status if !status.is_success() => {
                return Err(MetadataRetrievalError::RequestError(format!(
                    "HTTP {} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown")
                )));
            }
            _ => {}
        }

        let body: GraphQlResponse<MediaData> = response.json().await?;

        if let Some(error) = body.errors.iter().find(|e| e.status != Some(404)) {
            return Err(MetadataRetrievalError::InvalidData(error.message.clone()));
        }

        let identity = body
            .data
            .and_then(|data| data.media)
            .map(|media| Self::convert_media(media, title));

        if let Some(identity) = &identity {
            tracing::info!(
                title = %identity.title,
                anilist_id = ?identity.anilist_id,
                mal_id = ?identity.mal_id,
                "Identified anime via AniList"
            );
        }

        Ok(identity)
    }
}
