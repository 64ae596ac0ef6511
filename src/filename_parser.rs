//! Filename parser module
//!
//! Extracts the searchable title, release year and episode numbering from
//! the raw filename of a video. The heuristics run in a fixed order on a
//! working copy of the name; each step removes what it consumed so later
//! steps cannot be confused by it.

use crate::metadata_retrieval::MediaType;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static RE_EXTENSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.(mkv|mp4|m4v|avi|ts|mp3|wav|flac|aac|wma|wmv|mov|flv|webm)$").unwrap()
});

static RE_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\[(. _]((?:19|20)\d{2})(?:[\]). _]|$)").unwrap());

static RE_SQUARE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[[^\]]*\]").unwrap());

static RE_PAREN_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(([^)]*)\)").unwrap());

static RE_DIMENSIONS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{3,4}x\d{3,4}").unwrap());

static RE_RESOLUTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\d{3,4}p").unwrap());

static RE_QUALITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(BD|BluRay|WEB-?DL|WEBRip|HDTV|DVDRip|BRRip|x264|x265|H\.?264|H\.?265|HEVC|Hi10P|10bit|8bit|AAC|AC3|DTS|FLAC)\b",
    )
    .unwrap()
});

static RE_SEASON_EPISODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)S(\d{1,2})E(\d{1,3})").unwrap());

static RE_CROSS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d{1,2})x(\d{1,3})\b").unwrap());

static RE_TRAILING_DASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*-\s*(\d{1,4})\s*$").unwrap());

static RE_EPISODE_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:Episode|EP|E)\s*(\d{1,4})\b").unwrap());

static RE_SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[._]").unwrap());

static RE_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

static RE_ANIME_RESOLUTION_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\d{3,4}p\]|\(\d{3,4}p\)").unwrap());

static RE_ANIME_ENCODE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[(HEVC|x265|10bit|Hi10P)\]").unwrap());

static RE_ANIME_DASH_NUMBERING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s-\s\d{2,4}(?:\s|\.|$)").unwrap());

/// Release groups that almost exclusively publish anime
const ANIME_GROUPS: &[&str] = &[
    "SubsPlease",
    "Erai-raws",
    "HorribleSubs",
    "Commie",
    "FFF",
    "Underwater",
    "GJM",
    "Asenshi",
    "Doki",
    "UTW",
    "Coalgirls",
    "Tsundere",
    "Chihiro",
    "Vivid",
    "DameDesuYo",
    "Anime-Koi",
    "Kaitou",
    "Leopard-Raws",
    "Ohys-Raws",
    "ANK-Raws",
];

/// Information extracted from a video filename
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedFilename {
    /// Title usable as a free-text search query
    pub title: String,
    /// Title with all tags, resolutions and codec tokens removed
    pub clean_title: String,
    /// Release year, if the name carries one
    pub year: Option<u16>,
    /// Season number
    pub season: Option<u32>,
    /// Episode number
    pub episode: Option<u32>,
    /// `Tv` whenever a season or episode was found, otherwise unknown
    pub media_type: Option<MediaType>,
    /// Whether the name follows anime release conventions
    pub is_anime: bool,
}

/// Parses a filename into its searchable parts
///
/// Never fails: anything that cannot be recognized is simply left unset.
///
/// # Examples
///
/// ```
/// use subtitle_scout::filename_parser::parse;
///
/// let parsed = parse("[SubsPlease] One Piece - 1092 (1080p).mkv");
/// assert_eq!(parsed.title, "One Piece");
/// assert_eq!(parsed.episode, Some(1092));
/// assert!(parsed.is_anime);
/// ```
pub fn parse(filename: &str) -> ParsedFilename {
    let mut working = RE_EXTENSION.replace(filename, "").into_owned();

    let mut year = None;
    if let Some(caps) = RE_YEAR.captures(&working) {
        year = caps[1].parse::<u16>().ok();
        let range = caps.get(0).map(|m| m.range()).unwrap_or_default();
        working.replace_range(range, " ");
    }

    // Tags go before any episode pattern runs: group names like [Group2] carry digits
    working = RE_SQUARE_TAG.replace_all(&working, " ").into_owned();
    working = RE_PAREN_TAG
        .replace_all(&working, |caps: &regex::Captures| {
            if is_four_digit_year(&caps[1]) {
                caps[0].to_string()
            } else {
                " ".to_string()
            }
        })
        .into_owned();

    working = RE_DIMENSIONS.replace_all(&working, " ").into_owned();
    working = RE_RESOLUTION.replace_all(&working, " ").into_owned();
    working = RE_QUALITY.replace_all(&working, " ").into_owned();

    let (season, episode) = extract_episode(&mut working);
    let media_type = if season.is_some() || episode.is_some() {
        Some(MediaType::Tv)
    } else {
        None
    };

    working = RE_SEPARATORS.replace_all(&working, " ").into_owned();
    let title = RE_WHITESPACE.replace_all(&working, " ").trim().to_string();

    let parsed = ParsedFilename {
        clean_title: title.clone(),
        title,
        year,
        season,
        episode,
        media_type,
        is_anime: detect_anime(filename),
    };

    tracing::debug!(filename, ?parsed, "Parsed filename");
    parsed
}

/// Tries the episode patterns in priority order, stopping at the first hit
///
/// The matched text is removed from `working`.
fn extract_episode(working: &mut String) -> (Option<u32>, Option<u32>) {
    for re in [&*RE_SEASON_EPISODE, &*RE_CROSS] {
        if let Some(caps) = re.captures(working) {
            let season = caps[1].parse().ok();
            let episode = caps[2].parse().ok();
            let range = caps.get(0).map(|m| m.range()).unwrap_or_default();
            working.replace_range(range, " ");
            return (season, episode);
        }
    }

    for re in [&*RE_TRAILING_DASH, &*RE_EPISODE_WORD] {
        if let Some(caps) = re.captures(working) {
            let episode = caps[1].parse().ok();
            let range = caps.get(0).map(|m| m.range()).unwrap_or_default();
            working.replace_range(range, " ");
            return (None, episode);
        }
    }

    (None, None)
}

fn is_four_digit_year(inner: &str) -> bool {
    inner.len() == 4 && inner.chars().all(|c| c.is_ascii_digit())
}

/// Classifies a raw filename as anime
///
/// Looks at the unmodified name since most signals are the very tags the
/// parser strips.
pub fn detect_anime(filename: &str) -> bool {
    let known_group = ANIME_GROUPS.iter().any(|group| {
        filename.contains(&format!("[{}]", group)) || filename.contains(&format!("({})", group))
    });

    known_group
        || RE_ANIME_RESOLUTION_TAG.is_match(filename)
        || RE_ANIME_ENCODE_TAG.is_match(filename)
        || RE_ANIME_DASH_NUMBERING.is_match(filename)
        || RE_SQUARE_TAG.find_iter(filename).count() >= 3
}
