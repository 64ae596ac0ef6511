/// OpenSubtitles REST API response types for deserialization.
use serde::{Deserialize, Serialize};

/// Response of `GET /subtitles`
#[derive(Debug, Deserialize)]
pub(super) struct OsSearchResponse {
    #[serde(default)]
    pub data: Vec<OsSubtitle>,
}

/// A single subtitle entry
#[derive(Debug, Deserialize)]
pub(super) struct OsSubtitle {
    pub id: String,
    pub attributes: OsAttributes,
}

#[derive(Debug, Deserialize)]
pub(super) struct OsAttributes {
    pub language: Option<String>,
    #[serde(default, deserialize_with = "super::lenient_count")]
    pub download_count: u64,
    /// Average rating on a 0-10 scale
    pub ratings: Option<f32>,
    pub release: Option<String>,
    pub format: Option<String>,
    pub hearing_impaired: Option<bool>,
    pub comments: Option<String>,
    pub uploader: Option<OsUploader>,
    #[serde(default)]
    pub files: Vec<OsFile>,
}

#[derive(Debug, Deserialize)]
pub(super) struct OsUploader {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct OsFile {
    pub file_id: u64,
    pub file_name: Option<String>,
}

/// Body of `POST /login`
#[derive(Debug, Serialize)]
pub(super) struct OsLoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Response of `POST /login`
#[derive(Debug, Deserialize)]
pub(super) struct OsLoginResponse {
    pub token: Option<String>,
}

/// Body of `POST /download`
#[derive(Debug, Serialize)]
pub(super) struct OsDownloadRequest {
    pub file_id: u64,
}

/// Response of `POST /download`
#[derive(Debug, Deserialize)]
pub(super) struct OsDownloadResponse {
    pub link: Option<String>,
    /// Downloads left today for this account
    pub remaining: Option<i64>,
    pub message: Option<String>,
}
