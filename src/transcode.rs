//! Subtitle muxing module
//!
//! Embeds a subtitle file as a soft subtitle stream into a video using
//! ffmpeg. Video and audio streams are copied; only the subtitle stream is
//! converted when the output container needs it.

use ffmpeg_sidecar::command::{FfmpegCommand, ffmpeg_is_installed};
use ffmpeg_sidecar::event::{FfmpegEvent, LogLevel};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while muxing
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// No ffmpeg binary found on the PATH
    #[error("ffmpeg is not installed or not on the PATH")]
    NotInstalled,

    /// Failed to create the output directory
    #[error("Failed to create output directory {path}: {source}")]
    CreateOutputDir { path: PathBuf, source: io::Error },

    /// Failed to start ffmpeg
    #[error("Failed to start ffmpeg: {0}")]
    Spawn(String),

    /// ffmpeg ran but did not succeed
    #[error("ffmpeg failed: {0}")]
    Failed(String),

    /// The blocking worker running ffmpeg died
    #[error("Muxing task failed: {0}")]
    Task(String),
}

/// Subtitle codec for the output container
///
/// MP4 only carries `mov_text`; Matroska keeps the original subtitle.
fn subtitle_codec(output: &Path) -> &'static str {
    match output
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .as_deref()
    {
        Some("mkv") => "copy",
        _ => "mov_text",
    }
}

/// ISO 639-2 tag for a language code; `und` when unknown
fn language_tag(language: &str) -> &'static str {
    match language.trim().to_lowercase().as_str() {
        "ar" | "ara" | "arabic" => "ara",
        "en" | "eng" | "english" => "eng",
        "es" | "spa" | "spanish" => "spa",
        "fr" | "fre" | "fra" | "french" => "fre",
        "de" | "ger" | "deu" | "german" => "ger",
        "it" | "ita" | "italian" => "ita",
        "pt" | "por" | "portuguese" => "por",
        "ru" | "rus" | "russian" => "rus",
        "tr" | "tur" | "turkish" => "tur",
        "ja" | "jpn" | "japanese" => "jpn",
        "ko" | "kor" | "korean" => "kor",
        "zh" | "chi" | "zho" | "chinese" => "chi",
        "fa" | "per" | "fas" | "farsi" => "per",
        "vi" | "vie" | "vietnamese" => "vie",
        "id" | "ind" | "indonesian" => "ind",
        _ => "und",
    }
}

/// Parses an ffmpeg timestamp (`HH:MM:SS.ms`) into seconds
fn parse_timestamp(time: &str) -> Option<f64> {
    let mut seconds = 0.0;
    for part in time.trim().split(':') {
        seconds = seconds * 60.0 + part.parse::<f64>().ok()?;
    }
    Some(seconds)
}

/// Percentage done, clamped to 0-100
fn percent(elapsed: f64, duration: f64) -> u8 {
    if duration <= 0.0 {
        return 0;
    }
    (elapsed / duration * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Embeds `subtitle` into `video`, writing the result to `output`
///
/// # Arguments
///
/// * `video` - Source video; all its video and audio streams are kept
/// * `subtitle` - Subtitle file to embed
/// * `output` - Output path; the container is chosen by its extension
/// * `language` - Language code of the subtitle, used for the stream tag
/// * `on_progress` - Called with the progress in percent (0-100)
pub async fn merge_subtitle<F>(
    video: &Path,
    subtitle: &Path,
    output: &Path,
    language: &str,
    on_progress: F,
) -> Result<(), TranscodeError>
where
    F: FnMut(u8) + Send + 'static,
{
    let video = video.to_path_buf();
    let subtitle = subtitle.to_path_buf();
    let output = output.to_path_buf();
    let language = language.to_string();

    tokio::task::spawn_blocking(move || {
        run_ffmpeg(&video, &subtitle, &output, &language, on_progress)
    })
    .await
    .map_err(|e| TranscodeError::Task(e.to_string()))?
}

fn run_ffmpeg(
    video: &Path,
    subtitle: &Path,
    output: &Path,
    language: &str,
    mut on_progress: impl FnMut(u8),
) -> Result<(), TranscodeError> {
    if !ffmpeg_is_installed() {
        return Err(TranscodeError::NotInstalled);
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| TranscodeError::CreateOutputDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let codec = subtitle_codec(output);
    let tag = format!("language={}", language_tag(language));
    tracing::info!(
        video = %video.display(),
        subtitle = %subtitle.display(),
        output = %output.display(),
        codec,
        "Merging subtitle into video"
    );

    let mut child = FfmpegCommand::new()
        .input(video.to_string_lossy().as_ref())
        .input(subtitle.to_string_lossy().as_ref())
        .args(["-map", "0:v", "-map", "0:a?", "-map", "1:0"])
        .args(["-c:v", "copy", "-c:a", "copy", "-c:s", codec])
        .args(["-metadata:s:s:0", tag.as_str()])
        .overwrite()
        .output(output.to_string_lossy().as_ref())
        .spawn()
        .map_err(|e| TranscodeError::Spawn(e.to_string()))?;

    let mut duration = None;
    let mut last_percent = None;
    let mut errors = Vec::new();

    let events = child
        .iter()
        .map_err(|e| TranscodeError::Spawn(e.to_string()))?;
    for event in events {
        match event {
            FfmpegEvent::ParsedDuration(parsed) if parsed.input_index == 0 => {
                duration = Some(parsed.duration);
            }
            FfmpegEvent::Progress(progress) => {
                let (Some(total), Some(elapsed)) = (duration, parse_timestamp(&progress.time))
                else {
                    continue;
                };
                let done = percent(elapsed, total);
                if last_percent != Some(done) {
                    last_percent = Some(done);
                    on_progress(done);
                }
            }
            FfmpegEvent::Log(LogLevel::Error | LogLevel::Fatal, message) => {
                tracing::debug!(%message, "ffmpeg error output");
                errors.push(message);
            }
            FfmpegEvent::Error(message) => errors.push(message),
            _ => {}
        }
    }

    let status = child
        .wait()
        .map_err(|e| TranscodeError::Failed(e.to_string()))?;
    if !status.success() {
        let message = errors
            .last()
            .cloned()
            .unwrap_or_else(|| format!("exit status {status}"));
        return Err(TranscodeError::Failed(message));
    }

    if last_percent != Some(100) {
        on_progress(100);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtitle_codec_by_container() {
        assert_eq!(subtitle_codec(Path::new("out/movie.mp4")), "mov_text");
        assert_eq!(subtitle_codec(Path::new("out/movie.MKV")), "copy");
        assert_eq!(subtitle_codec(Path::new("out/movie.mov")), "mov_text");
        assert_eq!(subtitle_codec(Path::new("movie")), "mov_text");
    }

    #[test]
    fn test_language_tag() {
        assert_eq!(language_tag("en"), "eng");
        assert_eq!(language_tag("AR"), "ara");
        assert_eq!(language_tag("english"), "eng");
        assert_eq!(language_tag("xx"), "und");
    }

    #[test]
    fn test_progress_parsing() {
        assert_eq!(parse_timestamp("00:01:30.50"), Some(90.5));
        assert_eq!(parse_timestamp("01:00:00.00"), Some(3600.0));
        assert_eq!(parse_timestamp("N/A"), None);

        assert_eq!(percent(45.0, 90.0), 50);
        assert_eq!(percent(120.0, 90.0), 100);
        assert_eq!(percent(10.0, 0.0), 0);
    }
}
