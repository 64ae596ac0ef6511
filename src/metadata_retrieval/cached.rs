//! Cached metadata provider implementation
//!
//! This module provides a caching wrapper for metadata providers that
//! automatically stores and retrieves identities from the metadata cache.

use super::{MediaIdentity, MediaType, MetadataProvider, MetadataRetrievalError};
use crate::cache::MetadataCache;
use async_trait::async_trait;
use std::sync::Arc;

/// A caching wrapper for metadata providers
///
/// This provider wraps another metadata provider and caches its hits to avoid
/// redundant network requests. Cache keys are prefixed with the provider name,
/// so different sources never answer for each other. Misses are not cached.
pub struct CachedMetadataProvider<P>
where
    P: MetadataProvider,
{
    /// The underlying metadata provider
    provider: P,
    /// Shared identity cache
    cache: Arc<MetadataCache>,
}

impl<P> CachedMetadataProvider<P>
where
    P: MetadataProvider,
{
    /// Creates a new cached metadata provider wrapping the given provider
    ///
    /// # Arguments
    ///
    /// * `provider` - The metadata provider to wrap
    /// * `cache` - The cache to read from and write to
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let cache = Arc::new(MetadataCache::new(settings.clone()));
    /// let tmdb = CachedMetadataProvider::new(TmdbProvider::new(client, settings), cache);
    /// ```
    pub fn new(provider: P, cache: Arc<MetadataCache>) -> Self {
        Self { provider, cache }
    }

    fn cache_title(&self, title: &str) -> String {
        format!("{}:{}", self.provider.name(), title)
    }
}

#[async_trait]
impl<P> MetadataProvider for CachedMetadataProvider<P>
where
    P: MetadataProvider,
{
    fn name(&self) -> &'static str {
        self.provider.name()
    }

    async fn fetch_identity(
        &self,
        title: &str,
        year: Option<u16>,
        media_type: Option<MediaType>,
    ) -> Result<Option<MediaIdentity>, MetadataRetrievalError> {
        let cache_title = self.cache_title(title);

        match self.cache.get(&cache_title, year, media_type) {
            Ok(Some(identity)) => return Ok(Some(identity)),
            Ok(None) => {}
            // Cache read errors fall through to the source
            Err(e) => tracing::warn!(provider = self.name(), error = %e, "Cache read failed"),
        }

        let identity = self.provider.fetch_identity(title, year, media_type).await?;

        if let Some(identity) = &identity
            && let Err(e) = self.cache.set(&cache_title, year, media_type, identity)
        {
            tracing::warn!(provider = self.name(), error = %e, "Cache write failed");
        }

        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
        answer: Option<MediaIdentity>,
    }

    #[async_trait]
    impl MetadataProvider for CountingProvider {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn fetch_identity(
            &self,
            _title: &str,
            _year: Option<u16>,
            _media_type: Option<MediaType>,
        ) -> Result<Option<MediaIdentity>, MetadataRetrievalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer.clone())
        }
    }

    fn cached(answer: Option<MediaIdentity>) -> CachedMetadataProvider<CountingProvider> {
        CachedMetadataProvider::new(
            CountingProvider {
                calls: AtomicUsize::new(0),
                answer,
            },
            Arc::new(MetadataCache::new(Settings::in_memory())),
        )
    }

    #[tokio::test]
    async fn test_hit_is_served_from_cache() {
        let identity = MediaIdentity::new("Heat", Some(1995), MediaType::Movie);
        let provider = cached(Some(identity.clone()));

        let first = provider.fetch_identity("Heat", Some(1995), None).await.unwrap();
        let second = provider.fetch_identity("heat", Some(1995), None).await.unwrap();

        assert_eq!(first, Some(identity.clone()));
        assert_eq!(second, Some(identity));
        assert_eq!(provider.provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_miss_is_not_cached() {
        let provider = cached(None);

        assert_eq!(provider.fetch_identity("Nothing", None, None).await.unwrap(), None);
        assert_eq!(provider.fetch_identity("Nothing", None, None).await.unwrap(), None);
        assert_eq!(provider.provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_keys_are_namespaced_by_provider() {
        let identity = MediaIdentity::new("Heat", Some(1995), MediaType::Movie);
        let provider = cached(Some(identity));
        provider.fetch_identity("Heat", None, None).await.unwrap();

        assert!(provider.cache.get("Heat", None, None).unwrap().is_none());
        assert!(provider.cache.get("counting:Heat", None, None).unwrap().is_some());
    }
}
