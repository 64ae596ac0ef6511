//! SubtitleScout - Find, rank and fetch subtitles for local video files
//!
//! This library provides the subtitle pipeline: parsing video filenames,
//! fingerprinting video content, resolving titles to canonical identities,
//! searching several subtitle databases at once, picking the best match and
//! installing it next to the video.

pub mod cache;
pub mod download;
pub mod file_hash;
pub mod file_resolver;
pub mod filename_parser;
pub mod metadata_retrieval;
pub mod providers;
pub mod selector;
pub mod settings;
mod temp;
pub mod transcode;

use cache::MetadataCache;
use download::{EpisodeTarget, download_subtitle};
use file_resolver::VideoFile;
use filename_parser::ParsedFilename;
use metadata_retrieval::{MediaIdentity, MetadataResolver};
use providers::{ProviderRegistry, SearchQuery, SubtitleCandidate, USER_AGENT};
use settings::Settings;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

// Re-export error types
pub use cache::CacheError;
pub use download::DownloadError;
pub use file_hash::FileHashError;
pub use file_resolver::FileResolverError;
pub use metadata_retrieval::MetadataRetrievalError;
pub use providers::ProviderError;
pub use settings::SettingsError;
pub use transcode::TranscodeError;

/// Progress event emitted during the automatic pipeline
///
/// These events allow library users to track progress and provide feedback
/// while a subtitle is being found and installed.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Fingerprinting the video
    Hashing { video_path: PathBuf },

    /// Searching the hash-capable providers
    SearchingByHash { hash: String },

    /// Resolving the parsed title to a canonical identity
    ResolvingMetadata { title: String },

    /// Metadata resolution finished
    MetadataResolved { identity: Option<MediaIdentity> },

    /// Searching by title
    SearchingByText { query: String },

    /// Candidates collected
    CandidatesFound { count: usize, by_hash: bool },

    /// Best candidate chosen
    Selected { candidate: SubtitleCandidate },

    /// Fetching the chosen subtitle
    Downloading { candidate: SubtitleCandidate },

    /// Subtitle installed
    Downloaded { path: PathBuf },

    /// Embedding the subtitle into a new video file
    Merging { output: PathBuf },

    /// Muxing progress in percent
    MergeProgress { percent: u8 },
}

/// Top-level error type for SubtitleScout operations
#[derive(Debug, Error)]
pub enum SubtitleScoutError {
    /// Error while fingerprinting a video
    #[error("Hashing error: {0}")]
    FileHash(#[from] FileHashError),

    /// Error during file resolution
    #[error("File resolution error: {0}")]
    FileResolver(#[from] FileResolverError),

    /// Error while downloading a subtitle
    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    /// Error while muxing a subtitle
    #[error("Transcode error: {0}")]
    Transcode(#[from] TranscodeError),

    /// Error reading or writing settings
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    /// Error during cache operations
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Failed to set up the HTTP client
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Options of the automatic pipeline
#[derive(Debug, Clone, Default)]
pub struct AutoMatchOptions {
    /// Subtitle language; the preferred language from the settings if None
    pub language: Option<String>,
    /// Provider ids to search; settings or defaults if None
    pub providers: Option<Vec<String>>,
    /// Also write a copy of the video with the subtitle embedded here
    pub merge_into: Option<PathBuf>,
}

/// Result of the automatic pipeline
#[derive(Debug)]
pub enum AutoMatch {
    /// A subtitle was selected and installed
    Installed {
        candidate: SubtitleCandidate,
        subtitle_path: PathBuf,
        merged_path: Option<PathBuf>,
        by_hash: bool,
    },

    /// No provider returned anything
    ///
    /// `configuration_issues` lists providers that could not search because
    /// of missing settings.
    NotFound {
        configuration_issues: Vec<ProviderError>,
    },
}

/// All long-lived services, constructed once and shared by reference
pub struct Services {
    pub settings: Settings,
    pub client: reqwest::Client,
    pub cache: Arc<MetadataCache>,
    pub resolver: MetadataResolver,
    pub registry: ProviderRegistry,
}

impl Services {
    /// Builds the standard services on top of the given settings
    pub fn new(settings: Settings) -> Result<Self, SubtitleScoutError> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        let cache = Arc::new(MetadataCache::new(settings.clone()));
        let resolver =
            MetadataResolver::with_default_sources(client.clone(), settings.clone(), cache.clone());
        let registry = ProviderRegistry::with_default_providers(client.clone(), settings.clone());

        Ok(Self::from_parts(settings, client, cache, resolver, registry))
    }

    /// Assembles services from explicit parts
    pub fn from_parts(
        settings: Settings,
        client: reqwest::Client,
        cache: Arc<MetadataCache>,
        resolver: MetadataResolver,
        registry: ProviderRegistry,
    ) -> Self {
        Self {
            settings,
            client,
            cache,
            resolver,
            registry,
        }
    }

    fn language(&self, language: Option<&str>) -> String {
        match language.map(str::trim) {
            Some(language) if !language.is_empty() => language.to_string(),
            _ => self.settings.preferred_language(),
        }
    }

    /// Builds a search query from a parsed filename, resolving its identity
    async fn query_for(&self, parsed: &ParsedFilename) -> SearchQuery {
        let identity = self
            .resolver
            .resolve(&parsed.title, parsed.year, parsed.media_type, parsed.is_anime)
            .await;

        SearchQuery {
            text: parsed.title.clone(),
            identity,
            year: parsed.year,
            media_type: parsed.media_type,
            season: parsed.season,
            episode: parsed.episode,
            is_anime: parsed.is_anime,
        }
    }

    /// Searches subtitles by the content hash of a video file
    ///
    /// # Returns
    ///
    /// The candidates of all hash-capable providers, or a FileHashError if
    /// the video cannot be read
    pub async fn search_by_hash(
        &self,
        video: &Path,
        language: Option<&str>,
        providers: Option<&[String]>,
    ) -> Result<Vec<SubtitleCandidate>, SubtitleScoutError> {
        let hash = file_hash::hash_video(video).await?;
        let language = self.language(language);
        Ok(self
            .registry
            .search_all_by_hash(&hash, &language, providers)
            .await)
    }

    /// Searches subtitles for a title or filename typed by the user
    ///
    /// The text is parsed like a filename, so `Show S01E02` searches that
    /// episode. `target` overrides the parsed season and episode.
    pub async fn search_subtitles(
        &self,
        text: &str,
        target: EpisodeTarget,
        language: Option<&str>,
        providers: Option<&[String]>,
    ) -> Vec<SubtitleCandidate> {
        let mut parsed = filename_parser::parse(text);
        if target.season.is_some() || target.episode.is_some() {
            parsed.season = target.season.or(parsed.season);
            parsed.episode = target.episode.or(parsed.episode);
            parsed.media_type = Some(metadata_retrieval::MediaType::Tv);
        }

        let query = self.query_for(&parsed).await;
        let language = self.language(language);
        self.registry
            .search_all(&query, &language, providers)
            .await
    }

    /// Finds, downloads and optionally embeds the best subtitle for a video
    ///
    /// The hash search runs first. Only when it yields nothing is the
    /// filename parsed and a title search run, with one fresh metadata
    /// resolution. The subtitle is installed next to the video as
    /// `<video stem>.<language>.<format>`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use subtitle_scout::{AutoMatch, AutoMatchOptions, ProgressEvent, Services};
    /// use subtitle_scout::settings::Settings;
    /// use std::path::Path;
    ///
    /// # async fn run() -> Result<(), subtitle_scout::SubtitleScoutError> {
    /// let services = Services::new(Settings::in_memory())?;
    /// let outcome = services
    ///     .auto_match(
    ///         Path::new("/media/Heat.1995.1080p.mkv"),
    ///         AutoMatchOptions::default(),
    ///         |event| {
    ///             if let ProgressEvent::Selected { candidate } = event {
    ///                 println!("Using {}", candidate.filename);
    ///             }
    ///         },
    ///     )
    ///     .await?;
    ///
    /// if let AutoMatch::Installed { subtitle_path, .. } = outcome {
    ///     println!("Installed {}", subtitle_path.display());
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn auto_match<F>(
        &self,
        video: &Path,
        options: AutoMatchOptions,
        mut progress: F,
    ) -> Result<AutoMatch, SubtitleScoutError>
    where
        F: FnMut(ProgressEvent),
    {
        let language = self.language(options.language.as_deref());
        let providers = options.providers.as_deref();
        let video_file = VideoFile::new(video);
        let file_name = video_file.file_name();

        progress(ProgressEvent::Hashing {
            video_path: video.to_path_buf(),
        });
        let hash = file_hash::hash_video(video).await?;

        progress(ProgressEvent::SearchingByHash { hash: hash.clone() });
        let mut candidates = self
            .registry
            .search_all_by_hash(&hash, &language, providers)
            .await;
        let by_hash = !candidates.is_empty();

        let parsed = filename_parser::parse(&file_name);
        if !by_hash {
            tracing::info!(video = %video.display(), "No hash match, falling back to title search");
            progress(ProgressEvent::ResolvingMetadata {
                title: parsed.title.clone(),
            });
            let query = self.query_for(&parsed).await;
            progress(ProgressEvent::MetadataResolved {
                identity: query.identity.clone(),
            });

            progress(ProgressEvent::SearchingByText {
                query: query.title().to_string(),
            });
            candidates = self.registry.search_all(&query, &language, providers).await;
        }

        progress(ProgressEvent::CandidatesFound {
            count: candidates.len(),
            by_hash,
        });

        let Some(best) = selector::select_best(&candidates, &file_name, &language) else {
            let enabled = self
                .registry
                .enabled_ids(providers, providers::DEFAULT_TEXT_PROVIDERS);
            return Ok(AutoMatch::NotFound {
                configuration_issues: self.registry.configuration_issues(&enabled),
            });
        };
        progress(ProgressEvent::Selected {
            candidate: best.clone(),
        });

        progress(ProgressEvent::Downloading {
            candidate: best.clone(),
        });
        let destination = video_file.subtitle_path(&language, &best.format);
        let target = EpisodeTarget {
            season: parsed.season,
            episode: parsed.episode,
        };
        let subtitle_path = self.download(&best, Some(&destination), target).await?;
        progress(ProgressEvent::Downloaded {
            path: subtitle_path.clone(),
        });

        let merged_path = match options.merge_into {
            Some(output) => {
                progress(ProgressEvent::Merging {
                    output: output.clone(),
                });
                self.merge_with_progress(video, &subtitle_path, &output, &language, &mut progress)
                    .await?;
                Some(output)
            }
            None => None,
        };

        Ok(AutoMatch::Installed {
            candidate: best,
            subtitle_path,
            merged_path,
            by_hash,
        })
    }

    /// Downloads a candidate through the provider it came from
    ///
    /// `destination` None or empty installs into the user's download
    /// directory.
    pub async fn download(
        &self,
        candidate: &SubtitleCandidate,
        destination: Option<&Path>,
        target: EpisodeTarget,
    ) -> Result<PathBuf, SubtitleScoutError> {
        let provider = self
            .registry
            .provider(&candidate.provider_id)
            .ok_or_else(|| DownloadError::UnknownProvider(candidate.provider_id.clone()))?;

        Ok(download_subtitle(&self.client, provider.as_ref(), candidate, destination, target).await?)
    }

    /// Embeds a subtitle into a copy of a video
    pub async fn merge<F>(
        &self,
        video: &Path,
        subtitle: &Path,
        output: &Path,
        language: Option<&str>,
        on_progress: F,
    ) -> Result<(), SubtitleScoutError>
    where
        F: FnMut(u8) + Send + 'static,
    {
        let language = self.language(language);
        Ok(transcode::merge_subtitle(video, subtitle, output, &language, on_progress).await?)
    }

    /// Runs a merge while forwarding its progress as events
    async fn merge_with_progress<F>(
        &self,
        video: &Path,
        subtitle: &Path,
        output: &Path,
        language: &str,
        progress: &mut F,
    ) -> Result<(), SubtitleScoutError>
    where
        F: FnMut(ProgressEvent),
    {
        let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();
        let merge = transcode::merge_subtitle(video, subtitle, output, language, move |percent| {
            let _ = sender.send(percent);
        });
        tokio::pin!(merge);

        let result = loop {
            tokio::select! {
                result = &mut merge => break result,
                Some(percent) = receiver.recv() => {
                    progress(ProgressEvent::MergeProgress { percent });
                }
            }
        };
        while let Ok(percent) = receiver.try_recv() {
            progress(ProgressEvent::MergeProgress { percent });
        }

        Ok(result?)
    }
}
