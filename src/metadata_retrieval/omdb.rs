/// OMDb metadata provider implementation.
use super::omdb_types::OmdbTitleResponse;
use super::{
    MediaIdentity, MediaType, MetadataProvider, MetadataRetrievalError, REQUEST_TIMEOUT,
    year_from_date,
};
use crate::settings::{KEY_OMDB_API_KEY, Settings};
use async_trait::async_trait;

const API_URL: &str = "http://www.omdbapi.com/";

/// Metadata provider for the Open Movie Database.
pub struct OmdbProvider {
    client: reqwest::Client,
    settings: Settings,
}

impl OmdbProvider {
    /// Creates a new OMDb provider instance.
    pub fn new(client: reqwest::Client, settings: Settings) -> Self {
        Self { client, settings }
    }

    /// Converts a title response; `None` for in-band "not found" answers
    fn convert_response(response: OmdbTitleResponse) -> Option<MediaIdentity> {
        if response.response.eq_ignore_ascii_case("false") {
            tracing::debug!(error = ?response.error, "OMDb found nothing");
            return None;
        }

        let media_type = match response.kind.as_deref() {
            Some("series") => MediaType::Tv,
            _ => MediaType::Movie,
        };

        let mut identity = MediaIdentity::new(
            response.title?,
            response.year.as_deref().and_then(year_from_date),
            media_type,
        );
        identity.imdb_id = response.imdb_id.filter(|id| id.starts_with("tt"));
        Some(identity)
    }
}

#[async_trait]
impl MetadataProvider for OmdbProvider {
    fn name(&self) -> &'static str {
        "omdb"
    }

    async fn fetch_identity(
        &self,
        title: &str,
        year: Option<u16>,
        media_type: Option<MediaType>,
    ) -> Result<Option<MediaIdentity>, MetadataRetrievalError> {
        let api_key =
            self.settings
                .string(KEY_OMDB_API_KEY)
                .ok_or(MetadataRetrievalError::MissingCredential {
                    provider: "OMDb",
                    setting: KEY_OMDB_API_KEY,
                })?;

        let mut params = vec![("apikey", api_key), ("t", title.to_string())];
        if let Some(year) = year {
            params.push(("y", year.to_string()));
        }
        if let Some(media_type) = media_type {
            let kind = match media_type {
                MediaType::Movie => "movie",
                MediaType::Tv => "series",
            };
            params.push(("type", kind.to_string()));
        }

        tracing::debug!(title, ?year, ?media_type, "Searching OMDb");

        let response = self
            .client
            .get(API_URL)
            .timeout(REQUEST_TIMEOUT)
            .query(&params)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(MetadataRetrievalError::InvalidData(
                "OMDb rejected the API key".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(MetadataRetrievalError::RequestError(format!(
                "HTTP {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let identity = Self::convert_response(response.json().await?);
        if let Some(identity) = &identity {
            tracing::info!(
                title = %identity.title,
                imdb_id = ?identity.imdb_id,
                "Identified title via OMDb"
            );
        }

        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: serde_json::Value) -> OmdbTitleResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_series_maps_to_tv() {
        let identity = OmdbProvider::convert_response(parse(serde_json::json!({
            "Title": "Breaking Bad",
            "Year": "2008–2013",
            "imdbID": "tt0903747",
            "Type": "series",
            "Response": "True"
        })))
        .unwrap();

        assert_eq!(identity.title, "Breaking Bad");
        assert_eq!(identity.year, Some(2008));
        assert_eq!(identity.media_type, MediaType::Tv);
        assert_eq!(identity.imdb_id.as_deref(), Some("tt0903747"));
        assert!(!identity.is_anime);
    }

    #[test]
    fn test_not_found_is_none() {
        let identity = OmdbProvider::convert_response(parse(serde_json::json!({
            "Response": "False",
            "Error": "Movie not found!"
        })));

        assert!(identity.is_none());
    }

    #[tokio::test]
    async fn test_missing_key_is_reported() {
        let provider = OmdbProvider::new(reqwest::Client::new(), Settings::in_memory());
        let result = provider.fetch_identity("Heat", None, None).await;

        assert!(matches!(
            result,
            Err(MetadataRetrievalError::MissingCredential { setting, .. }) if setting == KEY_OMDB_API_KEY
        ));
    }
}
