//! Subtitle download and archive extraction
//!
//! A candidate is resolved to a final URL by its provider, fetched into a
//! temporary file and installed at its destination. Downloads that turn out
//! to be zip archives are searched for the subtitle of the wanted episode
//! and only that entry is installed.

use crate::filename_parser;
use crate::providers::{ProviderError, SubtitleCandidate, SubtitleProvider, USER_AGENT};
use crate::temp::create_temp_file;
use std::fs::File;
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use zip::ZipArchive;

/// Timeout for fetching a subtitle file
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Extensions recognized as subtitle files inside archives
const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "ass", "ssa", "vtt", "sub"];

/// Errors that can occur while downloading a subtitle
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The provider could not produce a download URL
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// No provider is registered for the candidate
    #[error("Unknown subtitle provider: {0}")]
    UnknownProvider(String),

    /// HTTP request failed
    #[error("Download request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with an error status
    #[error("Download of {url} failed with HTTP {status}")]
    Http { status: u16, url: String },

    /// Reading or writing a file failed
    #[error("Failed to access {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    /// The download is a broken zip archive
    #[error("Failed to read subtitle archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// The archive holds no `.srt` or `.ass` file
    #[error("The archive does not contain a subtitle file")]
    NoSubtitleInArchive,

    /// No destination was given and the download directory is unknown
    #[error("No destination given and no download directory found")]
    NoDestination,
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> DownloadError + '_ {
    move |source| DownloadError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Season and episode a download is meant for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpisodeTarget {
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

/// Downloads a candidate and installs it at `destination`
///
/// # Arguments
///
/// * `client` - HTTP client used for the file transfer
/// * `provider` - The provider the candidate came from
/// * `candidate` - The subtitle to download
/// * `destination` - Target path; None or empty uses the download directory
/// * `target` - Episode to pick when the download is an archive
///
/// # Returns
///
/// The path the subtitle was written to. Its extension follows the
/// extracted entry when an archive held a different subtitle format.
pub async fn download_subtitle(
    client: &reqwest::Client,
    provider: &dyn SubtitleProvider,
    candidate: &SubtitleCandidate,
    destination: Option<&Path>,
    target: EpisodeTarget,
) -> Result<PathBuf, DownloadError> {
    let destination = resolve_destination(destination, candidate)?;

    let url = provider.resolve_download_url(&candidate.url).await?;
    tracing::info!(provider = provider.id(), %url, "Downloading subtitle");

    let mut request = client
        .get(&url)
        .timeout(DOWNLOAD_TIMEOUT)
        .header("User-Agent", USER_AGENT);
    for (name, value) in provider.download_headers() {
        request = request.header(name, value);
    }

    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(DownloadError::Http {
            status: response.status().as_u16(),
            url,
        });
    }
    let body = response.bytes().await?;
    tracing::debug!(bytes = body.len(), "Subtitle download finished");

    let download = create_temp_file("subtitle_download", "tmp")
        .map_err(io_error(&std::env::temp_dir()))?;
    tokio::fs::write(download.path(), &body)
        .await
        .map_err(io_error(download.path()))?;

    install_subtitle(download.path(), &destination, target)
}

/// Picks the destination path for a download
fn resolve_destination(
    destination: Option<&Path>,
    candidate: &SubtitleCandidate,
) -> Result<PathBuf, DownloadError> {
    if let Some(destination) = destination.filter(|p| !p.as_os_str().is_empty()) {
        return Ok(destination.to_path_buf());
    }

    let downloads = directories::UserDirs::new()
        .and_then(|dirs| dirs.download_dir().map(Path::to_path_buf))
        .ok_or(DownloadError::NoDestination)?;
    Ok(downloads.join(default_filename(candidate)))
}

/// File name derived from a candidate's release name and format
fn default_filename(candidate: &SubtitleCandidate) -> String {
    let cleaned: String = candidate
        .filename
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();
    let stem = if cleaned.is_empty() {
        candidate.id.clone()
    } else {
        cleaned
    };

    let suffix = format!(".{}", candidate.format.to_lowercase());
    if stem.to_lowercase().ends_with(&suffix) {
        stem
    } else {
        format!("{stem}{suffix}")
    }
}

/// Installs a downloaded file at `destination`
///
/// Zip archives are detected by opening them, not by their name. Anything
/// that does not open as an archive is installed as-is.
pub(crate) fn install_subtitle(
    download: &Path,
    destination: &Path,
    target: EpisodeTarget,
) -> Result<PathBuf, DownloadError> {
    let file = File::open(download).map_err(io_error(download))?;

    match ZipArchive::new(file) {
        Ok(mut archive) => extract_subtitle(&mut archive, destination, target),
        Err(e) => {
            tracing::debug!(error = %e, "Download is not an archive, installing as-is");
            if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(io_error(parent))?;
            }
            std::fs::copy(download, destination).map_err(io_error(destination))?;
            Ok(destination.to_path_buf())
        }
    }
}

fn extract_subtitle<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    destination: &Path,
    target: EpisodeTarget,
) -> Result<PathBuf, DownloadError> {
    let names: Vec<String> = (0..archive.len())
        .filter_map(|i| archive.by_index(i).ok().map(|entry| entry.name().to_string()))
        .collect();
    tracing::debug!(entries = ?names, "Searching archive for subtitle");

    let name = pick_entry(&names, target).ok_or(DownloadError::NoSubtitleInArchive)?;
    let extension = subtitle_extension(name).unwrap_or("srt");
    tracing::info!(entry = name, "Extracting subtitle from archive");

    let extracted =
        create_temp_file("subtitle_entry", extension).map_err(io_error(&std::env::temp_dir()))?;
    {
        let mut entry = archive.by_name(name)?;
        let mut output = File::create(extracted.path()).map_err(io_error(extracted.path()))?;
        io::copy(&mut entry, &mut output).map_err(io_error(extracted.path()))?;
    }

    let destination = match subtitle_extension(&destination.to_string_lossy()) {
        Some(current) if !current.eq_ignore_ascii_case(extension) => {
            destination.with_extension(extension)
        }
        _ => destination.to_path_buf(),
    };
    extracted
        .copy_to(&destination)
        .map_err(io_error(&destination))?;

    Ok(destination)
}

/// Lowercase subtitle extension of an entry name, if it has one
fn subtitle_extension(name: &str) -> Option<&'static str> {
    let extension = Path::new(name).extension()?.to_str()?.to_lowercase();
    SUBTITLE_EXTENSIONS
        .iter()
        .find(|known| **known == extension)
        .copied()
}

/// Chooses the archive entry to install
///
/// An entry naming the target episode wins, then the first `.srt`, then the
/// first `.ass`.
fn pick_entry(names: &[String], target: EpisodeTarget) -> Option<&str> {
    let subtitles: Vec<&str> = names
        .iter()
        .map(String::as_str)
        .filter(|name| !name.starts_with("__MACOSX/") && !name.ends_with('/'))
        .filter(|name| subtitle_extension(name).is_some())
        .collect();

    if let Some(episode) = target.episode {
        let exact = subtitles.iter().copied().find(|name| {
            let stem = Path::new(name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            let parsed = filename_parser::parse(stem);
            parsed.episode == Some(episode)
                && match (target.season, parsed.season) {
                    (Some(wanted), Some(found)) => wanted == found,
                    _ => true,
                }
        });
        if let Some(name) = exact {
            return Some(name);
        }
    }

    ["srt", "ass"].iter().find_map(|wanted| {
        subtitles
            .iter()
            .find(|name| subtitle_extension(name) == Some(*wanted))
            .copied()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, content) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|n| n.to_string()).collect()
    }

    fn candidate(filename: &str, format: &str) -> SubtitleCandidate {
        SubtitleCandidate {
            id: "42".to_string(),
            url: "https://example.invalid/42.zip".to_string(),
            source: "Test".to_string(),
            provider_id: "test".to_string(),
            language: "en".to_string(),
            format: format.to_string(),
            filename: filename.to_string(),
            downloads: 0,
            rating: 0.0,
            is_anime: false,
            owner: None,
            hearing_impaired: false,
            caption: None,
        }
    }

    #[test]
    fn test_pick_entry_prefers_episode() {
        let entries = names(&[
            "Show.S01E01.srt",
            "Show.S01E02.srt",
            "Show.S02E02.srt",
        ]);
        let target = EpisodeTarget {
            season: Some(2),
            episode: Some(2),
        };
        assert_eq!(pick_entry(&entries, target), Some("Show.S02E02.srt"));

        let anime = names(&["[Grp] Show - 11.ass", "[Grp] Show - 12.ass"]);
        let target = EpisodeTarget {
            season: None,
            episode: Some(12),
        };
        assert_eq!(pick_entry(&anime, target), Some("[Grp] Show - 12.ass"));
    }

    #[test]
    fn test_pick_entry_falls_back_to_srt_then_ass() {
        let entries = names(&["readme.txt", "styled.ass", "plain.srt"]);
        assert_eq!(pick_entry(&entries, EpisodeTarget::default()), Some("plain.srt"));

        let entries = names(&["__MACOSX/._plain.srt", "folder/", "styled.ass"]);
        assert_eq!(pick_entry(&entries, EpisodeTarget::default()), Some("styled.ass"));

        assert_eq!(pick_entry(&names(&["readme.txt"]), EpisodeTarget::default()), None);
    }

    #[test]
    fn test_install_from_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("download.tmp");
        write_zip(
            &archive,
            &[
                ("Show.S01E04.srt", "episode four"),
                ("Show.S01E05.srt", "episode five"),
            ],
        );

        let destination = dir.path().join("out").join("Show.S01E05.en.srt");
        let installed = install_subtitle(
            &archive,
            &destination,
            EpisodeTarget {
                season: Some(1),
                episode: Some(5),
            },
        )
        .unwrap();

        assert_eq!(installed, destination);
        assert_eq!(std::fs::read_to_string(&installed).unwrap(), "episode five");
    }

    #[test]
    fn test_install_adopts_extracted_extension() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("download.tmp");
        write_zip(&archive, &[("movie.ass", "[Script Info]")]);

        let installed = install_subtitle(
            &archive,
            &dir.path().join("movie.en.srt"),
            EpisodeTarget::default(),
        )
        .unwrap();
        assert_eq!(installed, dir.path().join("movie.en.ass"));
    }

    #[test]
    fn test_install_plain_file() {
        let dir = tempfile::tempdir().unwrap();
        let download = dir.path().join("download.tmp");
        std::fs::write(&download, "1\n00:00:01,000 --> 00:00:02,000\nHello\n").unwrap();

        let destination = dir.path().join("nested").join("movie.en.srt");
        let installed = install_subtitle(&download, &destination, EpisodeTarget::default()).unwrap();
        assert!(std::fs::read_to_string(installed).unwrap().contains("Hello"));
    }

    #[test]
    fn test_archive_without_subtitle() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("download.tmp");
        write_zip(&archive, &[("readme.txt", "nothing here")]);

        let result = install_subtitle(
            &archive,
            &dir.path().join("movie.srt"),
            EpisodeTarget::default(),
        );
        assert!(matches!(result, Err(DownloadError::NoSubtitleInArchive)));
    }

    #[test]
    fn test_destinations() {
        let explicit = Path::new("/tmp/subs/heat.srt");
        assert_eq!(
            resolve_destination(Some(explicit), &candidate("Heat", "srt")).unwrap(),
            explicit
        );

        assert_eq!(default_filename(&candidate("Heat.1995.1080p", "srt")), "Heat.1995.1080p.srt");
        assert_eq!(default_filename(&candidate("Heat.srt", "srt")), "Heat.srt");
        assert_eq!(default_filename(&candidate("AC/DC: Live", "ass")), "AC_DC_ Live.ass");
        assert_eq!(default_filename(&candidate("  ", "srt")), "42.srt");
    }
}
