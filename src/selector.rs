//! Best-match selection among subtitle candidates
//!
//! Picks the candidate most likely to fit a given video file. Matching the
//! episode outweighs everything else; among equally matching candidates the
//! rating counts more than the download count.

use crate::filename_parser;
use crate::providers::{SubtitleCandidate, language_name};
use regex::Regex;
use std::sync::LazyLock;

/// Episode number patterns, tried in order on a candidate's release name
static EPISODE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"-\s*(\d{1,4})\b",
        r"(?i)\bEP\s*(\d{1,4})\b",
        r"(?i)\bEpisode\s*(\d{1,4})\b",
        r"(?i)S\d{1,2}E(\d{1,4})",
        r"(\d{1,4})\s*$",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect()
});

static RE_SUBTITLE_EXTENSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(srt|ass|ssa|sub|vtt|zip)$").unwrap());

const EPISODE_MATCH_BONUS: f64 = 100.0;

/// Selects the best candidate for a video file
///
/// # Arguments
///
/// * `candidates` - Search results from any number of providers
/// * `video_filename` - Name of the video the subtitle is meant for
/// * `preferred_language` - Language code; empty disables the language filter
///
/// # Returns
///
/// The highest scoring candidate, or None if there were no candidates
pub fn select_best(
    candidates: &[SubtitleCandidate],
    video_filename: &str,
    preferred_language: &str,
) -> Option<SubtitleCandidate> {
    let target_episode = filename_parser::parse(video_filename).episode;

    let in_language: Vec<&SubtitleCandidate> = candidates
        .iter()
        .filter(|c| language_matches(&c.language, preferred_language))
        .collect();
    let pool = if in_language.is_empty() {
        tracing::debug!(
            language = preferred_language,
            "No candidate in the preferred language, considering all"
        );
        candidates.iter().collect()
    } else {
        in_language
    };

    let matched: Vec<(&SubtitleCandidate, bool)> = pool
        .into_iter()
        .map(|c| {
            let is_match = target_episode
                .is_some_and(|target| candidate_episode(&c.filename) == Some(target));
            (c, is_match)
        })
        .collect();

    let any_match = matched.iter().any(|(_, is_match)| *is_match);
    let best = matched
        .into_iter()
        .filter(|(_, is_match)| *is_match || !any_match)
        .map(|(c, is_match)| (score(c, is_match), c))
        // Highest score first; equal scores keep the earlier candidate
        .min_by(|(a, _), (b, _)| b.total_cmp(a))
        .map(|(_, c)| c.clone());

    if let Some(best) = &best {
        tracing::info!(
            provider = %best.provider_id,
            release = %best.filename,
            episode = ?target_episode,
            "Selected subtitle"
        );
    }
    best
}

fn score(candidate: &SubtitleCandidate, episode_match: bool) -> f64 {
    let bonus = if episode_match {
        EPISODE_MATCH_BONUS
    } else {
        0.0
    };
    bonus + f64::from(candidate.rating) * 10.0 + candidate.downloads as f64 / 1000.0
}

/// Episode number named in a release name; the first matching pattern decides
fn candidate_episode(release: &str) -> Option<u32> {
    let release = RE_SUBTITLE_EXTENSION.replace(release.trim(), "");
    EPISODE_PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(&release))
        .and_then(|caps| caps[1].parse().ok())
}

/// Whether a provider's language label denotes the preferred language code
///
/// Providers report codes (`EN`, `pt-BR`) or names (`english`).
fn language_matches(label: &str, preferred: &str) -> bool {
    let preferred = preferred.trim().to_lowercase();
    if preferred.is_empty() {
        return true;
    }

    let label = label.trim().to_lowercase();
    label == preferred
        || label
            .split(['-', '_'])
            .next()
            .is_some_and(|base| base == preferred)
        || label.starts_with(&language_name(&preferred))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(url: &str, filename: &str, language: &str, rating: f32, downloads: u64) -> SubtitleCandidate {
        SubtitleCandidate {
            id: url.to_string(),
            url: url.to_string(),
            source: "Test".to_string(),
            provider_id: "test".to_string(),
            language: language.to_string(),
            format: "srt".to_string(),
            filename: filename.to_string(),
            downloads,
            rating,
            is_anime: false,
            owner: None,
            hearing_impaired: false,
            caption: None,
        }
    }

    #[test]
    fn test_episode_match_beats_popularity() {
        let candidates = vec![
            candidate("popular", "Show - 04 [1080p]", "en", 5.0, 100_000),
            candidate("exact", "Show - 05 [1080p]", "en", 2.0, 500),
        ];

        let best = select_best(&candidates, "[Group] Show - 05 (1080p).mkv", "en").unwrap();
        assert_eq!(best.url, "exact");
    }

    #[test]
    fn test_empty_and_single_input() {
        assert_eq!(select_best(&[], "Show - 05.mkv", "en"), None);

        let only = vec![candidate("only", "Something else", "de", 0.0, 0)];
        assert_eq!(select_best(&only, "Show - 05.mkv", "en").unwrap().url, "only");
    }

    #[test]
    fn test_language_filter_prefers_language_but_falls_back() {
        let candidates = vec![
            candidate("german", "Heat.1995", "de", 5.0, 9000),
            candidate("english", "Heat.1995", "english", 1.0, 10),
        ];
        assert_eq!(
            select_best(&candidates, "Heat.1995.mkv", "en").unwrap().url,
            "english"
        );
        assert_eq!(
            select_best(&candidates, "Heat.1995.mkv", "fr").unwrap().url,
            "german"
        );
    }

    #[test]
    fn test_rating_outweighs_downloads_without_episode() {
        let candidates = vec![
            candidate("downloads", "Heat.1995.1080p", "en", 3.0, 9000),
            candidate("rating", "Heat.1995.720p", "en", 4.0, 100),
        ];
        assert_eq!(
            select_best(&candidates, "Heat.1995.mkv", "en").unwrap().url,
            "rating"
        );
    }

    #[test]
    fn test_equal_scores_keep_first_candidate() {
        let candidates = vec![
            candidate("first", "Show - 05 [1080p]", "en", 4.0, 2000),
            candidate("second", "Show - 05 [720p]", "en", 4.0, 2000),
            candidate("third", "Show - 05 [480p]", "en", 4.0, 2000),
        ];

        let best = select_best(&candidates, "Show - 05.mkv", "en").unwrap();
        assert_eq!(best.url, "first");
    }

    #[test]
    fn test_candidate_episode_patterns() {
        assert_eq!(candidate_episode("[Sub] Show - 12 [720p]"), Some(12));
        assert_eq!(candidate_episode("Show EP07 1080p"), Some(7));
        assert_eq!(candidate_episode("Show Episode 3"), Some(3));
        assert_eq!(candidate_episode("Show.S02E09.WEB"), Some(9));
        assert_eq!(candidate_episode("Show 1092.srt"), Some(1092));
        assert_eq!(candidate_episode("Heat.1995.1080p.BluRay"), None);
    }

    #[test]
    fn test_language_labels() {
        assert!(language_matches("EN", "en"));
        assert!(language_matches("pt-BR", "pt"));
        assert!(language_matches("English", "en"));
        assert!(!language_matches("es", "en"));
        assert!(language_matches("anything", ""));
    }
}
