/// TMDb metadata provider implementation.
use super::tmdb_types::{
    TmdbExternalIds, TmdbMovieDetails, TmdbSearchResponse, TmdbTvDetails,
};
use super::{
    MediaIdentity, MediaType, MetadataProvider, MetadataRetrievalError, REQUEST_TIMEOUT,
    year_from_date,
};
use crate::settings::{KEY_TMDB_API_KEY, Settings};
use async_trait::async_trait;
use serde::de::DeserializeOwned;

const API_BASE: &str = "https://api.themoviedb.org/3";

/// Metadata provider for The Movie Database.
///
/// The API key is read from the settings on every lookup, so a key entered
/// while the program runs takes effect immediately.
pub struct TmdbProvider {
    client: reqwest::Client,
    settings: Settings,
    base_url: String,
}

impl TmdbProvider {
    /// Creates a new TMDb provider instance.
    pub fn new(client: reqwest::Client, settings: Settings) -> Self {
        Self {
            client,
            settings,
            base_url: API_BASE.to_string(),
        }
    }

    fn api_key(&self) -> Result<String, MetadataRetrievalError> {
        self.settings
            .string(KEY_TMDB_API_KEY)
            .ok_or(MetadataRetrievalError::MissingCredential {
                provider: "TMDb",
                setting: KEY_TMDB_API_KEY,
            })
    }

    /// Issues a GET request against the API and decodes the JSON body.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        api_key: &str,
        params: &[(&str, String)],
    ) -> Result<T, MetadataRetrievalError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .query(&[("api_key", api_key)])
            .query(params)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(MetadataRetrievalError::RateLimited("TMDb"));
        }
        if !status.is_success() {
            return Err(MetadataRetrievalError::RequestError(format!(
                "HTTP {} {} for {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown"),
                path
            )));
        }

        Ok(response.json::<T>().await?)
    }

    /// Fetches details of a search hit, including its IMDb id.
    async fn fetch_details(
        &self,
        api_key: &str,
        tmdb_id: u64,
        media_type: MediaType,
    ) -> Result<MediaIdentity, MetadataRetrievalError> {
        match media_type {
            MediaType::Movie => {
                let details: TmdbMovieDetails = self
                    .get_json(&format!("/movie/{tmdb_id}"), api_key, &[])
                    .await?;
                Ok(movie_identity(details))
            }
            MediaType::Tv => {
                // Shows expose the IMDb id only through a second endpoint
                let details_path = format!("/tv/{tmdb_id}");
                let external_path = format!("/tv/{tmdb_id}/external_ids");
                let (details, external) = futures::try_join!(
                    self.get_json::<TmdbTvDetails>(&details_path, api_key, &[]),
                    self.get_json::<TmdbExternalIds>(&external_path, api_key, &[]),
                )?;
                Ok(tv_identity(details, external))
            }
        }
    }
}

fn movie_identity(details: TmdbMovieDetails) -> MediaIdentity {
    let mut identity = MediaIdentity::new(
        details.title,
        details.release_date.as_deref().and_then(year_from_date),
        MediaType::Movie,
    );
    identity.tmdb_id = Some(details.id);
    identity.imdb_id = details.imdb_id.filter(|id| !id.is_empty());
    identity
}

fn tv_identity(details: TmdbTvDetails, external: TmdbExternalIds) -> MediaIdentity {
    let mut identity = MediaIdentity::new(
        details.name,
        details.first_air_date.as_deref().and_then(year_from_date),
        MediaType::Tv,
    );
    identity.tmdb_id = Some(details.id);
    identity.imdb_id = external.imdb_id.filter(|id| !id.is_empty());
    identity
}

/// Maps a `/search/multi` media type to ours; people and unknowns yield None
fn parse_media_type(value: &str) -> Option<MediaType> {
    match value {
        "movie" => Some(MediaType::Movie),
        "tv" => Some(MediaType::Tv),
        _ => None,
    }
}

#[async_trait]
impl MetadataProvider for TmdbProvider {
    fn name(&self) -> &'static str {
        "tmdb"
    }

    async fn fetch_identity(
        &self,
        title: &str,
        year: Option<u16>,
        media_type: Option<MediaType>,
    ) -> Result<Option<MediaIdentity>, MetadataRetrievalError> {
        let api_key = self.api_key()?;

        let path = match media_type {
            Some(media_type) => format!("/search/{media_type}"),
            None => "/search/multi".to_string(),
        };

        let mut params = vec![
            ("query", title.to_string()),
            ("include_adult", "false".to_string()),
        ];
        if let Some(year) = year {
            let year_param = match media_type {
                Some(MediaType::Tv) => "first_air_date_year",
                _ => "year",
            };
            params.push((year_param, year.to_string()));
        }

        tracing::debug!(title, ?year, ?media_type, "Searching TMDb");

        let search: TmdbSearchResponse = self.get_json(&path, &api_key, &params).await?;

        // Typed endpoints only return their own type; multi search may return people
        let hit = search.results.into_iter().find_map(|result| {
            let kind = match media_type {
                Some(media_type) => Some(media_type),
                None => result.media_type.as_deref().and_then(parse_media_type),
            }?;
            Some((result.id, kind))
        });

        let Some((tmdb_id, kind)) = hit else {
            tracing::debug!(title, "No TMDb results found");
            return Ok(None);
        };

        let identity = self.fetch_details(&api_key, tmdb_id, kind).await?;
        tracing::info!(
            title = %identity.title,
            tmdb_id,
            imdb_id = ?identity.imdb_id,
            "Identified title via TMDb"
        );

        Ok(Some(identity))
    }
}
