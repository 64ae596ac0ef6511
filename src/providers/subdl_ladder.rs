//! Query relaxation for SubDL searches
//!
//! A free-text SubDL query often matches a title instead of subtitle files.
//! The ladder then re-queries by the matched title's id, adds the season
//! packs of a show, and finally walks a fixed list of ever looser text
//! queries. Every step is a single request built from the original request,
//! never from the output of another step, so the whole ladder issues at most
//! [`MAX_REQUESTS`] requests.

use super::{ProviderError, SubtitleCandidate};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Upper bound of requests for one search
pub(super) const MAX_REQUESTS: usize = 7;

/// One SubDL search request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(super) struct SubdlRequest {
    pub film_name: Option<String>,
    pub sd_id: Option<String>,
    pub tmdb_id: Option<String>,
    pub imdb_id: Option<String>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    /// Ask for whole-season packs
    pub full_season: bool,
    /// "movie" or "tv"
    pub media_type: Option<&'static str>,
    /// Language code; `None` searches all languages
    pub language: Option<String>,
}

impl SubdlRequest {
    /// Query parameters, except the API key
    ///
    /// Only the strongest key is sent: `sd_id`, then `tmdb_id`, then
    /// `imdb_id`, then `film_name`. Returns None if there is no key at all.
    pub fn query_params(&self) -> Option<Vec<(&'static str, String)>> {
        let key = if let Some(sd_id) = &self.sd_id {
            ("sd_id", sd_id.clone())
        } else if let Some(tmdb_id) = &self.tmdb_id {
            ("tmdb_id", tmdb_id.clone())
        } else if let Some(imdb_id) = &self.imdb_id {
            ("imdb_id", imdb_id.clone())
        } else if let Some(film_name) = self.film_name.as_ref().filter(|n| !n.trim().is_empty()) {
            ("film_name", film_name.clone())
        } else {
            return None;
        };

        let mut params = vec![key];
        if let Some(language) = self.language.as_ref().filter(|l| !l.is_empty()) {
            params.push(("languages", language.to_uppercase()));
        }
        if let Some(season) = self.season {
            params.push(("season_number", season.to_string()));
        }
        if let Some(episode) = self.episode {
            params.push(("episode_number", episode.to_string()));
        }
        if self.full_season {
            params.push(("full_season", "1".to_string()));
        }
        if let Some(media_type) = self.media_type {
            params.push(("type", media_type.to_string()));
        }
        Some(params)
    }

    fn has_title_id(&self) -> bool {
        self.sd_id.is_some() || self.tmdb_id.is_some() || self.imdb_id.is_some()
    }

    /// Same type and language, but no keys and no episode
    fn relaxed(&self) -> Self {
        Self {
            media_type: self.media_type,
            language: self.language.clone(),
            ..Self::default()
        }
    }
}

/// A title SubDL matched instead of returning subtitles
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(super) struct TitleMatch {
    pub name: String,
    pub sd_id: Option<String>,
    pub tmdb_id: Option<String>,
    pub imdb_id: Option<String>,
    pub is_tv: bool,
}

impl TitleMatch {
    fn has_ids(&self) -> bool {
        self.sd_id.is_some() || self.tmdb_id.is_some() || self.imdb_id.is_some()
    }
}

/// Decoded answer of one request
#[derive(Debug, Default)]
pub(super) struct SubdlPage {
    /// Subtitles with a download url
    pub candidates: Vec<SubtitleCandidate>,
    /// Titles matched by a free-text query
    pub titles: Vec<TitleMatch>,
}

/// Runs a search with fallbacks.
///
/// # Arguments
///
/// * `primary` - The request built from the user's query
/// * `fetch` - Performs one request
///
/// # Returns
///
/// The candidates of the first step that produced any. Errors of the primary
/// request propagate; errors of fallback steps count as empty results.
pub(super) async fn run<F, Fut>(
    primary: SubdlRequest,
    fetch: F,
) -> Result<Vec<SubtitleCandidate>, ProviderError>
where
    F: Fn(SubdlRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<SubdlPage, ProviderError>> + Send,
{
    let ladder = Ladder {
        fetch,
        requests: AtomicUsize::new(0),
    };
    ladder.run(primary).await
}

struct Ladder<F> {
    fetch: F,
    requests: AtomicUsize,
}

impl<F, Fut> Ladder<F>
where
    F: Fn(SubdlRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<SubdlPage, ProviderError>> + Send,
{
    async fn fetch(&self, request: SubdlRequest) -> Result<SubdlPage, ProviderError> {
        if self.requests.fetch_add(1, Ordering::SeqCst) >= MAX_REQUESTS {
            return Err(ProviderError::Api {
                provider: "SubDL",
                message: "request limit of one search reached".to_string(),
            });
        }
        (self.fetch)(request).await
    }

    async fn step(&self, tier: &'static str, request: SubdlRequest) -> Vec<SubtitleCandidate> {
        tracing::debug!(tier, ?request, "Trying SubDL fallback");
        match self.fetch(request).await {
            Ok(page) => page.candidates,
            Err(e) => {
                tracing::warn!(tier, error = %e, "SubDL fallback failed");
                Vec::new()
            }
        }
    }

    async fn run(&self, primary: SubdlRequest) -> Result<Vec<SubtitleCandidate>, ProviderError> {
        let page = self.fetch(primary.clone()).await?;
        if !page.candidates.is_empty() {
            return Ok(page.candidates);
        }

        // Only a free-text query comes back with titles worth following
        let Some(film_name) = primary.film_name.as_deref() else {
            return Ok(Vec::new());
        };
        if primary.has_title_id() {
            return Ok(Vec::new());
        }
        let Some(title) = best_title(&page.titles, film_name).filter(|t| t.has_ids()) else {
            return Ok(Vec::new());
        };

        tracing::debug!(title = %title.name, is_tv = title.is_tv, "SubDL matched a title");

        let by_id = if let Some(tmdb_id) = &title.tmdb_id {
            Some(SubdlRequest {
                film_name: None,
                tmdb_id: Some(tmdb_id.clone()),
                ..primary.clone()
            })
        } else {
            title.imdb_id.as_ref().map(|imdb_id| SubdlRequest {
                film_name: None,
                imdb_id: Some(imdb_id.clone()),
                ..primary.clone()
            })
        };

        let mut candidates = Vec::new();
        if let Some(by_id) = by_id {
            if title.is_tv {
                let season_packs = SubdlRequest {
                    full_season: true,
                    ..by_id.clone()
                };
                let (episodes, packs) = futures::join!(
                    self.step("title id", by_id),
                    self.step("season packs", season_packs)
                );
                candidates = episodes;
                candidates.extend(packs);
            } else {
                candidates = self.step("title id", by_id).await;
            }
        }

        if !title.is_tv || !candidates.is_empty() {
            return Ok(candidates);
        }

        if let Some(sd_id) = &title.sd_id {
            let candidates = self
                .step(
                    "sd id first episode",
                    SubdlRequest {
                        sd_id: Some(sd_id.clone()),
                        season: Some(1),
                        episode: Some(1),
                        ..primary.relaxed()
                    },
                )
                .await;
            if !candidates.is_empty() {
                return Ok(candidates);
            }
        }

        let text_tiers = [
            (
                "first episode text",
                format!("{} S01E01", title.name),
                primary.language.clone(),
            ),
            ("numbered any language", format!("{} 01", title.name), None),
            (
                "numbered",
                format!("{} 01", title.name),
                primary.language.clone(),
            ),
        ];

        for (tier, film_name, language) in text_tiers {
            let candidates = self
                .step(
                    tier,
                    SubdlRequest {
                        film_name: Some(film_name),
                        language,
                        ..primary.relaxed()
                    },
                )
                .await;
            if !candidates.is_empty() {
                return Ok(candidates);
            }
        }

        Ok(Vec::new())
    }
}

/// Picks the title whose name equals the query, or the first one
fn best_title<'a>(titles: &'a [TitleMatch], query: &str) -> Option<&'a TitleMatch> {
    titles
        .iter()
        .find(|t| t.name.eq_ignore_ascii_case(query.trim()))
        .or_else(|| titles.first())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn candidate(url: &str) -> SubtitleCandidate {
        SubtitleCandidate {
            id: url.to_string(),
            url: url.to_string(),
            source: "SubDL".to_string(),
            provider_id: "subdl".to_string(),
            language: "EN".to_string(),
            format: "srt".to_string(),
            filename: url.to_string(),
            downloads: 0,
            rating: 0.0,
            is_anime: false,
            owner: None,
            hearing_impaired: false,
            caption: None,
        }
    }

    fn show() -> TitleMatch {
        TitleMatch {
            name: "Frieren".to_string(),
            sd_id: Some("3100".to_string()),
            tmdb_id: Some("209867".to_string()),
            imdb_id: None,
            is_tv: true,
        }
    }

    fn text_request(name: &str) -> SubdlRequest {
        SubdlRequest {
            film_name: Some(name.to_string()),
            media_type: Some("tv"),
            language: Some("en".to_string()),
            season: Some(1),
            episode: Some(3),
            ..SubdlRequest::default()
        }
    }

    /// Runs the ladder against a scripted fetch and returns the requests made
    async fn run_scripted(
        primary: SubdlRequest,
        script: impl Fn(&SubdlRequest) -> Result<SubdlPage, ProviderError> + Send + Sync,
    ) -> (
        Result<Vec<SubtitleCandidate>, ProviderError>,
        Vec<SubdlRequest>,
    ) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let result = run(primary, |request: SubdlRequest| {
            log.lock().unwrap().push(request.clone());
            let page = script(&request);
            async move { page }
        })
        .await;
        let requests = log.lock().unwrap().clone();
        (result, requests)
    }

    #[test]
    fn test_query_params_priority() {
        let request = SubdlRequest {
            film_name: Some("Frieren".to_string()),
            imdb_id: Some("tt22248376".to_string()),
            tmdb_id: Some("209867".to_string()),
            language: Some("en".to_string()),
            full_season: true,
            ..SubdlRequest::default()
        };
        let params = request.query_params().unwrap();

        assert_eq!(params[0], ("tmdb_id", "209867".to_string()));
        assert!(params.contains(&("languages", "EN".to_string())));
        assert!(params.contains(&("full_season", "1".to_string())));
        assert!(!params.iter().any(|(k, _)| *k == "film_name" || *k == "imdb_id"));

        assert_eq!(SubdlRequest::default().query_params(), None);
    }

    #[tokio::test]
    async fn test_direct_hit_needs_one_request() {
        let (result, requests) = run_scripted(text_request("Frieren"), |_| {
            Ok(SubdlPage {
                candidates: vec![candidate("a")],
                titles: vec![show()],
            })
        })
        .await;

        assert_eq!(result.unwrap().len(), 1);
        assert_eq!(requests.len(), 1);
    }

    #[tokio::test]
    async fn test_movie_title_is_followed_by_id() {
        let movie = TitleMatch {
            name: "Heat".to_string(),
            tmdb_id: Some("949".to_string()),
            ..TitleMatch::default()
        };
        let primary = SubdlRequest {
            film_name: Some("heat".to_string()),
            media_type: Some("movie"),
            ..SubdlRequest::default()
        };

        let (result, requests) = run_scripted(primary, |request| {
            if request.tmdb_id.is_some() {
                Ok(SubdlPage {
                    candidates: vec![candidate("heat.zip")],
                    titles: Vec::new(),
                })
            } else {
                Ok(SubdlPage {
                    candidates: Vec::new(),
                    titles: vec![movie.clone()],
                })
            }
        })
        .await;

        assert_eq!(result.unwrap()[0].url, "heat.zip");
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].film_name, None);
        assert_eq!(requests[1].tmdb_id.as_deref(), Some("949"));
    }

    #[tokio::test]
    async fn test_show_merges_season_packs() {
        let (result, requests) = run_scripted(text_request("frieren"), |request| {
            let page = match (request.tmdb_id.is_some(), request.full_season) {
                (false, _) => SubdlPage {
                    candidates: Vec::new(),
                    titles: vec![show()],
                },
                (true, false) => SubdlPage {
                    candidates: vec![candidate("episode")],
                    titles: Vec::new(),
                },
                (true, true) => SubdlPage {
                    candidates: vec![candidate("pack")],
                    titles: Vec::new(),
                },
            };
            Ok(page)
        })
        .await;

        let urls: Vec<_> = result.unwrap().into_iter().map(|c| c.url).collect();
        assert_eq!(urls, vec!["episode", "pack"]);
        assert_eq!(requests.len(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_ladder_terminates() {
        let (result, requests) = run_scripted(text_request("Frieren"), |request| {
            // Every text query matches the title again, nothing has files
            let titles = if request.film_name.is_some() {
                vec![show()]
            } else {
                Vec::new()
            };
            Ok(SubdlPage {
                candidates: Vec::new(),
                titles,
            })
        })
        .await;

        assert!(result.unwrap().is_empty());
        assert_eq!(requests.len(), MAX_REQUESTS);

        let sd_step = &requests[3];
        assert_eq!(sd_step.sd_id.as_deref(), Some("3100"));
        assert_eq!((sd_step.season, sd_step.episode), (Some(1), Some(1)));

        let tail: Vec<_> = requests[4..]
            .iter()
            .map(|r| (r.film_name.clone().unwrap(), r.language.clone()))
            .collect();
        assert_eq!(
            tail,
            vec![
                ("Frieren S01E01".to_string(), Some("en".to_string())),
                ("Frieren 01".to_string(), None),
                ("Frieren 01".to_string(), Some("en".to_string())),
            ]
        );
        assert!(requests[4..].iter().all(|r| r.season.is_none() && !r.has_title_id()));
    }

    #[tokio::test]
    async fn test_fallback_stops_at_first_success() {
        let (result, requests) = run_scripted(text_request("Frieren"), |request| {
            let page = match request.film_name.as_deref() {
                Some("Frieren S01E01") => SubdlPage {
                    candidates: vec![candidate("s01e01")],
                    titles: Vec::new(),
                },
                Some(_) => SubdlPage {
                    candidates: Vec::new(),
                    titles: vec![show()],
                },
                None => SubdlPage::default(),
            };
            Ok(page)
        })
        .await;

        assert_eq!(result.unwrap()[0].url, "s01e01");
        assert_eq!(requests.len(), 5);
    }

    #[tokio::test]
    async fn test_id_query_is_not_followed() {
        let primary = SubdlRequest {
            tmdb_id: Some("209867".to_string()),
            film_name: Some("Frieren".to_string()),
            ..SubdlRequest::default()
        };

        let (result, requests) = run_scripted(primary, |_| {
            Ok(SubdlPage {
                candidates: Vec::new(),
                titles: vec![show()],
            })
        })
        .await;

        assert!(result.unwrap().is_empty());
        assert_eq!(requests.len(), 1);
    }

    #[tokio::test]
    async fn test_primary_error_propagates() {
        let (result, requests) = run_scripted(text_request("Frieren"), |_| {
            Err(ProviderError::RateLimited {
                provider: "SubDL",
                message: "daily limit".to_string(),
            })
        })
        .await;

        assert!(matches!(result, Err(ProviderError::RateLimited { .. })));
        assert_eq!(requests.len(), 1);
    }
}
