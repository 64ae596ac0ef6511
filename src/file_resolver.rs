//! File resolver module for batch intake
//!
//! Scans directories for video files by analyzing their content using MIME
//! type detection, and derives where a video's subtitle is installed.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during file resolution
#[derive(Debug, Error)]
pub enum FileResolverError {
    /// Path is not a directory
    #[error("Path is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Failed to read directory
    #[error("Failed to read directory {path}: {source}")]
    ReadDirectoryFailed { path: PathBuf, source: io::Error },

    /// Failed to read directory entry
    #[error("Failed to read directory entry: {0}")]
    ReadEntryFailed(#[from] io::Error),
}

/// Represents a detected video file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFile {
    /// Path to the video file
    pub path: PathBuf,
}

impl VideoFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File name as used for filename parsing
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Path of the subtitle installed next to the video:
    /// `<video stem>.<language>.<format>`
    pub fn subtitle_path(&self, language: &str, format: &str) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "subtitle".to_string());

        let name = if language.is_empty() {
            format!("{stem}.{format}")
        } else {
            format!("{stem}.{language}.{format}")
        };
        self.path.with_file_name(name)
    }

    /// Whether a subtitle named after the video already exists beside it
    pub fn has_subtitle(&self) -> bool {
        let (Some(dir), Some(stem)) = (self.path.parent(), self.path.file_stem()) else {
            return false;
        };
        let stem = stem.to_string_lossy();
        let dir = if dir.as_os_str().is_empty() {
            Path::new(".")
        } else {
            dir
        };

        let Ok(entries) = fs::read_dir(dir) else {
            return false;
        };
        entries.flatten().any(|entry| {
            let name = entry.file_name().to_string_lossy().to_lowercase();
            name.starts_with(&stem.to_lowercase())
                && [".srt", ".ass", ".ssa", ".vtt"]
                    .iter()
                    .any(|ext| name.ends_with(ext))
        })
    }
}

/// Scans a directory recursively for video files
///
/// Files are detected by their content, not their extension. The result is
/// sorted by path.
///
/// # Arguments
///
/// * `dir_path` - The directory to scan
///
/// # Returns
///
/// All discovered video files, or an error if the directory cannot be read.
pub fn scan_for_videos(dir_path: &Path) -> Result<Vec<VideoFile>, FileResolverError> {
    let mut video_files = Vec::new();
    scan_directory_recursive(dir_path, &mut video_files)?;
    video_files.sort_by(|a, b| a.path.cmp(&b.path));
    tracing::debug!(directory = %dir_path.display(), count = video_files.len(), "Scanned for videos");
    Ok(video_files)
}

/// Recursively scans a directory and collects video files
fn scan_directory_recursive(
    dir_path: &Path,
    video_files: &mut Vec<VideoFile>,
) -> Result<(), FileResolverError> {
    if !dir_path.is_dir() {
        return Err(FileResolverError::NotADirectory(dir_path.to_path_buf()));
    }

    for entry in fs::read_dir(dir_path).map_err(|e| FileResolverError::ReadDirectoryFailed {
        path: dir_path.to_path_buf(),
        source: e,
    })? {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            scan_directory_recursive(&path, video_files)?;
        } else if path.is_file() && is_video_file(&path) {
            video_files.push(VideoFile { path });
        }
    }

    Ok(())
}

/// Sniffs the first 8KB of a file for a video signature
pub(crate) fn is_video_file(file_path: &Path) -> bool {
    const BUFFER_SIZE: usize = 8192;

    let Ok(mut file) = File::open(file_path) else {
        return false;
    };

    let mut buffer = vec![0u8; BUFFER_SIZE];
    let Ok(bytes_read) = file.read(&mut buffer) else {
        return false;
    };
    buffer.truncate(bytes_read);

    infer::is_video(&buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mp4_header() -> Vec<u8> {
        let mut header = vec![0x00, 0x00, 0x00, 0x20];
        header.extend_from_slice(b"ftypisom");
        header.extend_from_slice(&[0x00, 0x00, 0x02, 0x00]);
        header.extend_from_slice(b"isomiso2avc1mp41");
        header.resize(64, 0);
        header
    }

    #[test]
    fn test_scan_nonexistent_directory() {
        let result = scan_for_videos(Path::new("/nonexistent/path/that/does/not/exist"));
        assert!(result.is_err());
    }

    #[test]
    fn test_scan_file_instead_of_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.txt");
        fs::write(&file, "not a directory").unwrap();

        assert!(matches!(
            scan_for_videos(&file),
            Err(FileResolverError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_scan_detects_by_content() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("Season 1")).unwrap();
        fs::write(dir.path().join("Season 1").join("b.bin"), mp4_header()).unwrap();
        fs::write(dir.path().join("a.mp4"), mp4_header()).unwrap();
        fs::write(dir.path().join("fake.mkv"), "plain text").unwrap();

        let videos = scan_for_videos(dir.path()).unwrap();
        let names: Vec<_> = videos.iter().map(VideoFile::file_name).collect();
        assert_eq!(names, vec!["a.mp4", "b.bin"]);
    }

    #[test]
    fn test_subtitle_path() {
        let video = VideoFile::new("/media/Heat.1995.1080p.mkv");
        assert_eq!(
            video.subtitle_path("en", "srt"),
            PathBuf::from("/media/Heat.1995.1080p.en.srt")
        );
        assert_eq!(
            video.subtitle_path("", "ass"),
            PathBuf::from("/media/Heat.1995.1080p.ass")
        );
    }

    #[test]
    fn test_has_subtitle() {
        let dir = tempfile::tempdir().unwrap();
        let video = VideoFile::new(dir.path().join("Heat.mkv"));
        fs::write(&video.path, mp4_header()).unwrap();
        assert!(!video.has_subtitle());

        fs::write(dir.path().join("Heat.en.srt"), "1").unwrap();
        assert!(video.has_subtitle());
    }
}
