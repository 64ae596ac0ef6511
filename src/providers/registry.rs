//! Provider registry and concurrent search fan-out
//!
//! Searches run on every enabled provider at once. Each provider gets its own
//! task and its own deadline, so a slow or crashing provider only costs its
//! own results.

use super::{
    OpenSubtitlesProvider, ProviderError, SearchQuery, SubSourceProvider, SubdlProvider,
    SubtitleCandidate, SubtitleProvider,
};
use crate::settings::Settings;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Providers used for text search when nothing is configured
pub const DEFAULT_TEXT_PROVIDERS: &[&str] = &["opensubtitles", "subdl", "subsource"];

/// Providers used for hash search when nothing is configured
pub const DEFAULT_HASH_PROVIDERS: &[&str] = &["opensubtitles"];

/// Deadline for a single provider's search
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(12);

/// Set of known providers, keyed by id
///
/// Built once from a list of providers and never changed afterwards.
pub struct ProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn SubtitleProvider>>,
    /// Ids in registration order
    order: Vec<&'static str>,
    settings: Settings,
    timeout: Duration,
}

impl ProviderRegistry {
    /// Creates a registry from the given providers
    ///
    /// When two providers share an id, the later one replaces the earlier
    /// one but keeps its position.
    pub fn new<I>(settings: Settings, providers: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn SubtitleProvider>>,
    {
        let mut registry = Self {
            providers: HashMap::new(),
            order: Vec::new(),
            settings,
            timeout: PROVIDER_TIMEOUT,
        };
        for provider in providers {
            registry.insert(provider);
        }
        registry
    }

    /// Creates a registry holding OpenSubtitles, SubDL and SubSource
    pub fn with_default_providers(client: reqwest::Client, settings: Settings) -> Self {
        let providers: [Arc<dyn SubtitleProvider>; 3] = [
            Arc::new(OpenSubtitlesProvider::new(client.clone(), settings.clone())),
            Arc::new(SubdlProvider::new(client.clone(), settings.clone())),
            Arc::new(SubSourceProvider::new(client, settings.clone())),
        ];
        Self::new(settings, providers)
    }

    /// Overrides the per-provider deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn insert(&mut self, provider: Arc<dyn SubtitleProvider>) {
        let id = provider.id();
        if self.providers.insert(id, provider).is_none() {
            self.order.push(id);
        }
    }

    pub fn provider(&self, id: &str) -> Option<Arc<dyn SubtitleProvider>> {
        self.providers.get(id).cloned()
    }

    /// Ids of all registered providers in registration order
    pub fn ids(&self) -> Vec<&'static str> {
        self.order.clone()
    }

    /// Decides which provider ids take part in a search
    ///
    /// An explicit non-empty list wins, then the enabled sources from the
    /// settings, then the given defaults.
    pub fn enabled_ids(&self, explicit: Option<&[String]>, defaults: &[&str]) -> Vec<String> {
        if let Some(ids) = explicit.filter(|ids| !ids.is_empty()) {
            return ids.to_vec();
        }

        let configured = self.settings.enabled_source_ids();
        if !configured.is_empty() {
            return configured;
        }

        defaults.iter().map(|id| id.to_string()).collect()
    }

    /// Registered providers for the given ids; unknown ids are skipped
    fn resolve(&self, ids: &[String]) -> Vec<Arc<dyn SubtitleProvider>> {
        ids.iter()
            .filter_map(|id| {
                let provider = self.provider(id);
                if provider.is_none() {
                    tracing::warn!(provider = %id, "Unknown subtitle provider, skipping");
                }
                provider
            })
            .collect()
    }

    /// Configuration problems of the given providers
    ///
    /// Used to explain an empty result, e.g. a missing API key.
    pub fn configuration_issues(&self, enabled: &[String]) -> Vec<ProviderError> {
        self.resolve(enabled)
            .iter()
            .filter_map(|provider| provider.check_configuration().err())
            .collect()
    }

    /// Searches all enabled providers concurrently
    ///
    /// # Arguments
    ///
    /// * `query` - What to search for
    /// * `language` - Language code, empty for all languages
    /// * `enabled` - Explicit provider ids; falls back to settings and defaults
    ///
    /// # Returns
    ///
    /// The merged candidates, in completion order, without duplicate URLs
    pub async fn search_all(
        &self,
        query: &SearchQuery,
        language: &str,
        enabled: Option<&[String]>,
    ) -> Vec<SubtitleCandidate> {
        let ids = self.enabled_ids(enabled, DEFAULT_TEXT_PROVIDERS);
        let providers = self.resolve(&ids);
        tracing::info!(providers = ?ids, query = %query.title(), language, "Searching subtitles");

        self.fan_out(providers, |provider| {
            let query = query.clone();
            let language = language.to_string();
            async move { provider.search(&query, &language).await }
        })
        .await
    }

    /// Searches all enabled providers that support hash lookups
    pub async fn search_all_by_hash(
        &self,
        hash: &str,
        language: &str,
        enabled: Option<&[String]>,
    ) -> Vec<SubtitleCandidate> {
        let ids = self.enabled_ids(enabled, DEFAULT_HASH_PROVIDERS);
        let providers: Vec<_> = self
            .resolve(&ids)
            .into_iter()
            .filter(|p| p.supports_hash_search())
            .collect();

        if providers.is_empty() {
            tracing::info!(providers = ?ids, "No enabled provider supports hash search");
            return Vec::new();
        }
        tracing::info!(hash, language, "Searching subtitles by hash");

        self.fan_out(providers, |provider| {
            let hash = hash.to_string();
            let language = language.to_string();
            async move { provider.search_by_hash(&hash, &language).await }
        })
        .await
    }

    /// Runs one task per provider and merges what comes back in time
    async fn fan_out<F, Fut>(
        &self,
        providers: Vec<Arc<dyn SubtitleProvider>>,
        call: F,
    ) -> Vec<SubtitleCandidate>
    where
        F: Fn(Arc<dyn SubtitleProvider>) -> Fut,
        Fut: Future<Output = Vec<SubtitleCandidate>> + Send + 'static,
    {
        let mut tasks = JoinSet::new();
        for provider in providers {
            let id = provider.id();
            let search = tokio::time::timeout(self.timeout, call(provider));
            tasks.spawn(async move { (id, search.await) });
        }

        let mut merged = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(candidates))) => merged.extend(candidates),
                Ok((provider, Err(_))) => {
                    tracing::warn!(provider, timeout = ?self.timeout, "Provider search timed out");
                }
                Err(e) => tracing::error!(error = %e, "Provider search task failed"),
            }
        }

        dedupe(merged)
    }
}

/// Drops candidates whose URL was already seen
fn dedupe(candidates: Vec<SubtitleCandidate>) -> Vec<SubtitleCandidate> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|candidate| seen.insert(candidate.url.clone()))
        .collect()
}
